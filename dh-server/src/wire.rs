//! Framing of the handshake messages
//!
//! Only Message 1 carries explicit framing:
//!
//! ```text
//! [u16 BE total][params blob: n bytes][u16 BE sig len][signature]
//! ```
//!
//! Message 2 (the client's public value) and Message 3 (the ciphertext block)
//! are unframed; their lengths follow from the negotiated group size and the
//! cipher block size respectively. There is no resynchronization: a byte
//! count that differs from the expected one ends the handshake.

use thiserror::Error;

/// Size of every length field on the wire
pub const LEN_PREFIX_SIZE: usize = 2;

static_assertions::const_assert_eq!(LEN_PREFIX_SIZE, std::mem::size_of::<u16>());

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("length {0} does not fit into a 16-bit length field")]
    LengthOverflow(usize),
    #[error("expected {expected} bytes but got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("message truncated: needed {needed} more bytes")]
    Truncated { needed: usize },
}

/// Encode a length as two big-endian bytes
pub fn encode_len(len: usize) -> Result<[u8; LEN_PREFIX_SIZE], WireError> {
    u16::try_from(len)
        .map(u16::to_be_bytes)
        .map_err(|_| WireError::LengthOverflow(len))
}

pub fn decode_len(bytes: [u8; LEN_PREFIX_SIZE]) -> usize {
    usize::from(u16::from_be_bytes(bytes))
}

/// Fail unless exactly `expected` bytes were transferred
pub fn expect_len(expected: usize, actual: usize) -> Result<(), WireError> {
    if expected != actual {
        Err(WireError::LengthMismatch { expected, actual })
    } else {
        Ok(())
    }
}

/// Append `field` to `out`, preceded by its 16-bit length
pub fn put_len_prefixed(out: &mut Vec<u8>, field: &[u8]) -> Result<(), WireError> {
    out.extend_from_slice(&encode_len(field.len())?);
    out.extend_from_slice(field);
    Ok(())
}

/// Split a 16-bit length prefixed field off the front of `input`
///
/// Returns the field and whatever follows it.
pub fn take_len_prefixed(input: &[u8]) -> Result<(&[u8], &[u8]), WireError> {
    let (prefix, rest) = split_at_checked(input, LEN_PREFIX_SIZE)?;
    let len = decode_len([prefix[0], prefix[1]]);
    split_at_checked(rest, len)
}

fn split_at_checked(input: &[u8], at: usize) -> Result<(&[u8], &[u8]), WireError> {
    if input.len() < at {
        return Err(WireError::Truncated {
            needed: at - input.len(),
        });
    }
    Ok(input.split_at(at))
}

/// Builder for the body of Message 1
///
/// Starts out holding just the DH parameter blob; the signature is appended
/// after it once computed.
#[derive(Debug)]
pub struct Message1Writer {
    buf: Vec<u8>,
    params_len: usize,
    signed: bool,
}

impl Message1Writer {
    pub fn from_params(params: Vec<u8>) -> Self {
        let params_len = params.len();
        Self {
            buf: params,
            params_len,
            signed: false,
        }
    }

    /// The `n` bytes that get signed
    pub fn params(&self) -> &[u8] {
        &self.buf[..self.params_len]
    }

    pub fn params_len(&self) -> usize {
        self.params_len
    }

    /// Write the signature length at offset `n` and the signature right after it
    pub fn push_signature(&mut self, signature: &[u8]) -> Result<(), WireError> {
        self.buf.truncate(self.params_len);
        put_len_prefixed(&mut self.buf, signature)?;
        self.signed = true;
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Total body length, `n + 2 + signature length`
    pub fn body_len(&self) -> usize {
        self.buf.len()
    }

    /// The two byte prefix announcing [Self::body_len]
    pub fn len_prefix(&self) -> Result<[u8; LEN_PREFIX_SIZE], WireError> {
        encode_len(self.body_len())
    }

    pub fn body(&self) -> &[u8] {
        &self.buf
    }
}

/// Borrowed view of a received Message 1 body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message1<'a> {
    pub params: &'a [u8],
    pub signature: &'a [u8],
}

impl<'a> Message1<'a> {
    /// Split a body into parameter blob and signature given the blob length
    ///
    /// The blob length is not on the wire; a receiver learns it by parsing
    /// the DH parameters. The remainder must be exactly one length prefixed
    /// signature.
    pub fn split(body: &'a [u8], params_len: usize) -> Result<Self, WireError> {
        let (params, rest) = split_at_checked(body, params_len)?;
        let (signature, trailing) = take_len_prefixed(rest)?;
        expect_len(body.len() - trailing.len(), body.len())?;
        Ok(Self { params, signature })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lengths_are_big_endian() {
        assert_eq!(encode_len(0x0102), Ok([0x01, 0x02]));
        assert_eq!(encode_len(0), Ok([0, 0]));
        assert_eq!(encode_len(u16::MAX as usize), Ok([0xff, 0xff]));
        assert_eq!(decode_len([0x02, 0x08]), 520);
    }

    #[test]
    fn lengths_beyond_sixteen_bits_are_rejected() {
        assert_eq!(
            encode_len(u16::MAX as usize + 1),
            Err(WireError::LengthOverflow(65536))
        );
    }

    #[test]
    fn mismatching_counts_are_rejected() {
        assert!(expect_len(256, 256).is_ok());
        assert_eq!(
            expect_len(256, 255),
            Err(WireError::LengthMismatch {
                expected: 256,
                actual: 255
            })
        );
    }

    #[test]
    fn message1_layout() {
        let mut w = Message1Writer::from_params(vec![0xaa; 5]);
        w.push_signature(&[0x55; 3]).unwrap();

        assert!(w.is_signed());
        assert_eq!(w.params(), &[0xaa; 5]);
        assert_eq!(w.body_len(), 5 + 2 + 3);
        assert_eq!(w.len_prefix(), Ok([0, 10]));
        assert_eq!(
            w.body(),
            &[0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0, 3, 0x55, 0x55, 0x55]
        );

        let m = Message1::split(w.body(), w.params_len()).unwrap();
        assert_eq!(m.params, &[0xaa; 5]);
        assert_eq!(m.signature, &[0x55; 3]);
    }

    #[test]
    fn resigning_replaces_the_signature() {
        let mut w = Message1Writer::from_params(vec![1, 2]);
        w.push_signature(&[9; 4]).unwrap();
        w.push_signature(&[7; 1]).unwrap();
        assert_eq!(w.body(), &[1, 2, 0, 1, 7]);
    }

    #[test]
    fn truncated_or_padded_message1_is_rejected() {
        let body = [1u8, 2, 0, 2, 8, 9];
        assert!(Message1::split(&body, 2).is_ok());
        assert!(matches!(
            Message1::split(&body[..5], 2),
            Err(WireError::Truncated { needed: 1 })
        ));

        let mut padded = body.to_vec();
        padded.push(0);
        assert_eq!(
            Message1::split(&padded, 2),
            Err(WireError::LengthMismatch {
                expected: 6,
                actual: 7
            })
        );
    }

    #[test]
    fn len_prefixed_fields() {
        let mut out = Vec::new();
        put_len_prefixed(&mut out, &[1, 2, 3]).unwrap();
        put_len_prefixed(&mut out, &[]).unwrap();
        assert_eq!(out, vec![0, 3, 1, 2, 3, 0, 0]);

        let (a, rest) = take_len_prefixed(&out).unwrap();
        let (b, rest) = take_len_prefixed(rest).unwrap();
        assert_eq!((a, b, rest), (&[1u8, 2, 3][..], &[][..], &[][..]));
        assert!(take_len_prefixed(&[0]).is_err());
    }
}
