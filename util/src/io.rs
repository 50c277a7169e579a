//! Helpers for matching on [std::io::ErrorKind]
//!
//! Matching directly on IO errors in loops tends to get repetitive:
//!
//! ```
//! use std::io::ErrorKind as EK;
//! use dh_server_util::io::IoResultKindHintExt;
//!
//! fn io_placeholder() -> std::io::Result<()> {
//!     Ok(())
//! }
//!
//! loop {
//!     match io_placeholder().io_err_kind_hint() {
//!         Ok(()) => break,
//!         Err((_, EK::Interrupted)) => continue,
//!         Err((e, _)) => return Err(e),
//!     }
//! }
//! # Ok::<_, std::io::Error>(())
//! ```
//!
//! [handle_interrupted] and [nonblocking_handle_io_errors] wrap the two loops
//! that show up most: retry on `Interrupted`, and additionally treat
//! `WouldBlock` as "no result yet".

use std::io;

/// Helper for accessing [std::io::Error::kind] in Results
pub trait IoResultKindHintExt<T>: Sized {
    fn io_err_kind_hint(self) -> Result<T, (io::Error, io::ErrorKind)>;
}

impl<T> IoResultKindHintExt<T> for io::Result<T> {
    fn io_err_kind_hint(self) -> Result<T, (io::Error, io::ErrorKind)> {
        self.map_err(|e| {
            let kind = e.kind();
            (e, kind)
        })
    }
}

/// Rerun `iofn` for as long as it fails with [io::ErrorKind::Interrupted]
///
/// ```
/// use std::io::{Error, ErrorKind};
/// use dh_server_util::io::handle_interrupted;
///
/// let mut calls = 0;
/// let res = handle_interrupted(|| {
///     calls += 1;
///     match calls {
///         1 | 2 => Err(Error::from(ErrorKind::Interrupted)),
///         _ => Ok(calls),
///     }
/// });
/// assert_eq!(res.unwrap(), 3);
/// ```
pub fn handle_interrupted<T, F>(mut iofn: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match iofn().io_err_kind_hint() {
            Ok(v) => return Ok(v),
            Err((_, io::ErrorKind::Interrupted)) => continue,
            Err((e, _)) => return Err(e),
        }
    }
}

/// Like [handle_interrupted], but [io::ErrorKind::WouldBlock] yields `Ok(None)`
pub fn nonblocking_handle_io_errors<T, F>(mut iofn: F) -> io::Result<Option<T>>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match iofn().io_err_kind_hint() {
            Ok(v) => return Ok(Some(v)),
            Err((_, io::ErrorKind::Interrupted)) => continue,
            Err((_, io::ErrorKind::WouldBlock)) => return Ok(None),
            Err((e, _)) => return Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{Error, ErrorKind};

    use super::*;

    #[test]
    fn would_block_is_no_result() {
        let r: io::Result<Option<u8>> =
            nonblocking_handle_io_errors(|| Err(Error::from(ErrorKind::WouldBlock)));
        assert!(matches!(r, Ok(None)));
    }

    #[test]
    fn other_errors_pass_through() {
        let r: io::Result<Option<u8>> =
            nonblocking_handle_io_errors(|| Err(Error::from(ErrorKind::ConnectionReset)));
        assert_eq!(r.unwrap_err().kind(), ErrorKind::ConnectionReset);
    }
}
