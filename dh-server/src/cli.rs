//! Contains the code used to parse command line parameters for dh-server.
//!
//! [CliArgs::run] is called by the main function and contains the bulk of
//! the bootstrapping code while the main function just sets up the basic environment

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context};
use clap::{Args, Parser, Subcommand};
use log::info;

use dh_server_util::file::LoadValue;

use crate::config::ServerConfig;
use crate::dhm::DhmParams;
use crate::handshake::Handshake;
use crate::identity::IdentityKey;
use crate::net::TcpTransport;

/// Command line arguments to the dh-server binary.
///
/// Used for parsing with [clap].
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
pub struct CliArgs {
    /// Lowest log level to show
    #[arg(long = "log-level", value_name = "LOG_LEVEL", group = "log-level")]
    log_level: Option<log::LevelFilter>,

    /// Show verbose log output – sets log level to "info"
    #[arg(short, long, group = "log-level")]
    verbose: bool,

    /// Show less log output – sets log level to "warn"
    #[arg(short, long, group = "log-level")]
    quiet: bool,

    /// The subcommand to be invoked; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<CliCommand>,

    /// Generate completion file for a shell
    ///
    /// This option is used to generate completion files for the specified shell
    #[clap(long, value_name = "shell")]
    pub print_completions: Option<clap_complete::Shell>,
}

impl CliArgs {
    /// returns the log level filter set by CLI args
    /// returns `None` if the user did not specify any log level filter via CLI
    ///
    /// NOTE: the clap feature of ["argument groups"](https://docs.rs/clap/latest/clap/_derive/_tutorial/chapter_3/index.html#argument-relations)
    /// ensures that the user can not specify more than one of the possible log level arguments.
    pub fn get_log_level(&self) -> Option<log::LevelFilter> {
        if self.verbose {
            return Some(log::LevelFilter::Info);
        }
        if self.quiet {
            return Some(log::LevelFilter::Warn);
        }
        self.log_level
    }
}

/// Settings of the `serve` subcommand
///
/// Flags take precedence over the config file, which takes precedence over
/// the built-in defaults.
#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Read settings from this TOML file
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,

    /// RSA private key file
    #[arg(long, value_name = "PATH")]
    pub private_key: Option<PathBuf>,

    /// DH parameter file
    #[arg(long, value_name = "PATH")]
    pub dh_params: Option<PathBuf>,

    /// Address to accept the connection on
    #[arg(short, long, value_name = "ADDR:PORT")]
    pub listen: Option<SocketAddr>,
}

impl ServeArgs {
    /// Assemble the effective configuration
    pub fn config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config_file {
            Some(path) => {
                ensure!(path.exists(), "config file {path:?} does not exist");
                ServerConfig::load(path)
                    .with_context(|| format!("could not load config file {path:?}"))?
            }
            None => ServerConfig::default(),
        };
        if let Some(p) = &self.private_key {
            config.private_key.clone_from(p);
        }
        if let Some(p) = &self.dh_params {
            config.dh_params.clone_from(p);
        }
        if let Some(addr) = self.listen {
            config.listen = addr;
        }
        Ok(config)
    }
}

/// represents a command specified via CLI
#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Serve a single handshake
    ///
    /// Waits for one client, runs the handshake with it and exits. The exit
    /// code tells which step failed, if any.
    Serve(ServeArgs),

    /// Generate a demo config file
    GenConfig {
        config_file: PathBuf,

        /// Forcefully overwrite existing config file
        #[clap(short, long)]
        force: bool,
    },

    /// Validate configuration files
    ///
    /// Checks that each file parses and that the key files it names exist and
    /// hold usable keys.
    Validate { config_files: Vec<PathBuf> },
}

impl CliArgs {
    /// Run dh-server with the given command line parameters
    ///
    /// A failed handshake comes back as a [crate::handshake::Abort] inside the
    /// [anyhow::Error], for the caller to pick the exit code from.
    pub fn run(self) -> anyhow::Result<()> {
        use CliCommand::*;
        match self.command.unwrap_or(Serve(ServeArgs::default())) {
            Serve(args) => {
                let config = args.config()?;
                let transport = TcpTransport::new().context("could not set up polling")?;
                let outcome = Handshake::new(config, transport).run()?;
                info!(
                    "Handshake with {} complete, sent {} byte ciphertext",
                    outcome.peer,
                    outcome.ciphertext.len()
                );
            }

            GenConfig { config_file, force } => {
                ensure!(
                    force || !config_file.exists(),
                    "config file {config_file:?} already exists"
                );
                ServerConfig::example_config().store(&config_file)?;
            }

            Validate { config_files } => {
                let mut failed = 0;
                for file in config_files.iter() {
                    match validate_config_file(file) {
                        Ok(()) => eprintln!("{file:?} has passed all checks"),
                        Err(err) => {
                            eprintln!("{file:?} is not usable: {err:#}");
                            failed += 1;
                        }
                    }
                }
                if failed > 0 {
                    bail!("{failed} of {} config files failed validation", config_files.len());
                }
            }
        }
        Ok(())
    }
}

fn validate_config_file(file: &Path) -> anyhow::Result<()> {
    let config = ServerConfig::load(file)?;
    config.validate()?;
    IdentityKey::load(&config.private_key)?;
    DhmParams::load(&config.dh_params)?;
    Ok(())
}
