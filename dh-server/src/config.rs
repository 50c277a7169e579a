//! Configuration readable from a config file.
//!
//! The server reads its configuration from a TOML file. Every field has a
//! default, so an empty file is a valid configuration:
//!
//! ```toml
//! private_key = "rsa_priv.txt"
//! dh_params = "dh_prime.txt"
//! listen = "0.0.0.0:11999"
//! personalization = "dh_server"
//! ```
//!
//! Paths starting with `~` are resolved against the user's home directory.

use std::{
    fs,
    io::Write,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::{Path, PathBuf},
};

use anyhow::ensure;
use serde::{Deserialize, Serialize};

use dh_server_util::file::{fopen_w, Visibility};

use crate::drbg::DEFAULT_PERSONALIZATION;

/// Port the server listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 11999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// path to the RSA private key file (`N, E, D, P, Q, DP, DQ, QP`)
    pub private_key: PathBuf,

    /// path to the DH parameter file (`P, G`)
    pub dh_params: PathBuf,

    /// address to accept the one connection on
    pub listen: SocketAddr,

    /// label mixed into the random number generator's seed
    pub personalization: String,

    /// path to the file which provided this configuration
    ///
    /// This item is of course not read from the TOML but is added by the algorithm that parses
    /// the config file.
    #[serde(skip)]
    pub config_file_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            private_key: "rsa_priv.txt".into(),
            dh_params: "dh_prime.txt".into(),
            listen: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            personalization: DEFAULT_PERSONALIZATION.to_owned(),
            config_file_path: PathBuf::new(),
        }
    }
}

impl ServerConfig {
    /// load configuration from a TOML file
    ///
    /// NOTE: no validation is conducted, e.g. the paths specified in the configuration are not
    /// checked whether they even exist.
    pub fn load<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(&fs::read_to_string(&p)?)?;

        use util::resolve_path_with_tilde;
        resolve_path_with_tilde(&mut config.private_key)?;
        resolve_path_with_tilde(&mut config.dh_params)?;

        config.config_file_path = p.as_ref().to_owned();
        Ok(config)
    }

    /// Write a config to a file
    pub fn store<P: AsRef<Path>>(&self, p: P) -> anyhow::Result<()> {
        let mut f = fopen_w(p, Visibility::Public)?;
        f.write_all(toml::to_string_pretty(&self)?.as_bytes())?;
        Ok(())
    }

    /// Validate a configuration
    ///
    /// Only checks that the key files exist; their contents are checked when loaded.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.private_key.is_file(),
            "could not find private-key file {:?}: no such file",
            self.private_key
        );
        ensure!(
            self.dh_params.is_file(),
            "could not find DH parameter file {:?}: no such file",
            self.dh_params
        );
        Ok(())
    }

    /// Generate an example configuration
    pub fn example_config() -> Self {
        Self {
            private_key: "/path/to/rsa_priv.txt".into(),
            dh_params: "/path/to/dh_prime.txt".into(),
            ..Self::default()
        }
    }
}

pub mod util {
    use std::path::PathBuf;

    /// takes a path that can potentially start with a `~` and resolves that `~` to the user's home directory
    ///
    /// ## Example
    /// ```
    /// use dh_server::config::util::resolve_path_with_tilde;
    /// std::env::set_var("HOME","/home/dummy");
    /// let mut path = std::path::PathBuf::from("~/rsa_priv.txt");
    /// resolve_path_with_tilde(&mut path).unwrap();
    /// assert!(path == std::path::PathBuf::from("/home/dummy/rsa_priv.txt"));
    /// ```
    pub fn resolve_path_with_tilde(path: &mut PathBuf) -> anyhow::Result<()> {
        if let Some(first_segment) = path.iter().next() {
            if !path.has_root() && first_segment == "~" {
                let home_dir = home::home_dir().ok_or_else(|| {
                    anyhow::anyhow!("config file contains \"~\" but can not determine home directory")
                })?;
                let orig_path = path.clone();
                path.clear();
                path.push(home_dir);
                for segment in orig_path.iter().skip(1) {
                    path.push(segment);
                }
            }
        }
        Ok(())
    }

}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_demo_setup() {
        let config = ServerConfig::default();
        assert_eq!(config.private_key, PathBuf::from("rsa_priv.txt"));
        assert_eq!(config.dh_params, PathBuf::from("dh_prime.txt"));
        assert_eq!(config.listen, "0.0.0.0:11999".parse().unwrap());
        assert_eq!(config.personalization, "dh_server");
    }

    #[test]
    fn empty_file_is_the_default_config() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("server.toml");
        fs::write(&path, "")?;

        let config = ServerConfig::load(&path)?;
        assert_eq!(config.config_file_path, path);
        assert_eq!(
            config,
            ServerConfig {
                config_file_path: path.clone(),
                ..ServerConfig::default()
            }
        );
        Ok(())
    }

    #[test]
    fn store_then_load() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("server.toml");

        let mut config = ServerConfig::example_config();
        config.listen = "127.0.0.1:4242".parse()?;
        config.store(&path)?;

        let loaded = ServerConfig::load(&path)?;
        config.config_file_path = path;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("server.toml");
        fs::write(&path, "secret_key = \"x\"\n")?;
        assert!(ServerConfig::load(&path).is_err());
        Ok(())
    }

    #[test]
    fn validate_requires_existing_files() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let key = tmpdir.path().join("rsa_priv.txt");
        let dh = tmpdir.path().join("dh_prime.txt");
        let config = ServerConfig {
            private_key: key.clone(),
            dh_params: dh.clone(),
            ..ServerConfig::default()
        };

        assert!(config.validate().is_err());
        fs::write(&key, "N = 01\n")?;
        assert!(config.validate().is_err());
        fs::write(&dh, "P = 17\n")?;
        config.validate()?;
        Ok(())
    }
}
