//! Reading big integers from key and parameter files
//!
//! Both the identity key file and the DH parameter file hold one hexadecimal
//! integer per line, in a fixed order. A line may carry a label, as in
//! `N = C0FFEE…`; when present the label must name the expected value.
//! Blank lines are ignored.

use std::path::{Path, PathBuf};

use num_bigint_dig::BigUint;
use thiserror::Error;

use dh_server_util::file::read_nonempty_lines;
use dh_server_util::hex::{hex_decode_padded, HexError};

#[derive(Error, Debug)]
pub enum KeyFileError {
    #[error("could not read {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path:?} ends before value {name}")]
    Missing { path: PathBuf, name: &'static str },
    #[error("{path:?} line {line}: expected value {name}, found {found:?}")]
    Malformed {
        path: PathBuf,
        line: usize,
        name: &'static str,
        found: String,
    },
    #[error("{path:?} line {line}: value {name} is not a hex integer: {source}")]
    BadDigits {
        path: PathBuf,
        line: usize,
        name: &'static str,
        #[source]
        source: HexError,
    },
    #[error("{path:?}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

impl KeyFileError {
    pub(crate) fn invalid<P: AsRef<Path>, R: ToString>(path: P, reason: R) -> Self {
        Self::Invalid {
            path: path.as_ref().to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Read the integers `names` from `path`, in that order
///
/// Lines past the last requested value are ignored, so a private key file
/// can be read for just its public part.
pub fn read_mpis<P: AsRef<Path>>(
    path: P,
    names: &[&'static str],
) -> Result<Vec<BigUint>, KeyFileError> {
    let path = path.as_ref();
    let lines = read_nonempty_lines(path).map_err(|source| KeyFileError::Unreadable {
        path: path.to_owned(),
        source,
    })?;

    let mut lines = lines.into_iter();
    let mut values = Vec::with_capacity(names.len());
    for &name in names {
        let (line, text) = lines.next().ok_or_else(|| KeyFileError::Missing {
            path: path.to_owned(),
            name,
        })?;
        let malformed = || KeyFileError::Malformed {
            path: path.to_owned(),
            line,
            name,
            found: text.clone(),
        };
        let digits = parse_line(&text, name).ok_or_else(malformed)?;
        let bytes = hex_decode_padded(digits).map_err(|source| KeyFileError::BadDigits {
            path: path.to_owned(),
            line,
            name,
            source,
        })?;
        values.push(BigUint::from_bytes_be(&bytes));
    }
    Ok(values)
}

/// Extract the hex digits of one `[NAME =] HEX` line
fn parse_line<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let digits = match text.split_once('=') {
        Some((label, digits)) => {
            if !label.trim().eq_ignore_ascii_case(name) {
                return None;
            }
            digits.trim()
        }
        None => text,
    };
    digits
        .chars()
        .all(|c| c.is_ascii_hexdigit())
        .then_some(digits)
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn labelled_and_bare_values() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("dh_prime.txt");
        fs::write(&path, "P = 0B\n\n17\n")?;

        let v = read_mpis(&path, &["P", "G"])?;
        assert_eq!(v, vec![BigUint::from(11u32), BigUint::from(23u32)]);
        Ok(())
    }

    #[test]
    fn extra_lines_are_ignored() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("key.txt");
        fs::write(&path, "N = 0D\nE = 03\nD = 07\n")?;

        assert_eq!(read_mpis(&path, &["N", "E"])?.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_values_are_reported() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("dh_prime.txt");
        fs::write(&path, "P = 0B\n")?;

        assert!(matches!(
            read_mpis(&path, &["P", "G"]),
            Err(KeyFileError::Missing { name: "G", .. })
        ));
        Ok(())
    }

    #[test]
    fn wrong_label_or_digits_are_malformed() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("dh_prime.txt");

        fs::write(&path, "G = 02\nP = 0B\n")?;
        assert!(matches!(
            read_mpis(&path, &["P", "G"]),
            Err(KeyFileError::Malformed {
                name: "P",
                line: 1,
                ..
            })
        ));

        fs::write(&path, "P = 0X0B\n")?;
        assert!(matches!(
            read_mpis(&path, &["P"]),
            Err(KeyFileError::Malformed { .. })
        ));
        Ok(())
    }

    #[test]
    fn empty_value_keeps_its_cause() -> anyhow::Result<()> {
        let tmpdir = tempfile::tempdir()?;
        let path = tmpdir.path().join("dh_prime.txt");
        fs::write(&path, "P = 0B\nG =\n")?;

        let err = read_mpis(&path, &["P", "G"]).unwrap_err();
        assert!(matches!(
            err,
            KeyFileError::BadDigits {
                name: "G",
                line: 2,
                source: HexError::Empty,
                ..
            }
        ));
        assert!(std::error::Error::source(&err).is_some());
        Ok(())
    }

    #[test]
    fn absent_file_is_unreadable() {
        assert!(matches!(
            read_mpis("/nonexistent/rsa_priv.txt", &["N"]),
            Err(KeyFileError::Unreadable { .. })
        ));
    }
}
