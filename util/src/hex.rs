use thiserror::Error;
use zeroize::Zeroize;

use std::fmt::Display;

/// Widest prefix, in bytes, that [HexDisplay::fmt_hex_prefix] can print
pub const MAX_HEX_PREFIX: usize = 64;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum HexError {
    #[error("empty hex string")]
    Empty,
    #[error(transparent)]
    Digits(#[from] hex::FromHexError),
}

/// Displays at most the first `F` bytes of a byte string as lowercase hex
///
/// The intermediate text buffer lives on the stack and is zeroized after
/// formatting, so this is fine to use on secret material. `F` may be at most
/// [MAX_HEX_PREFIX]; larger values are rejected at compile time.
pub struct HexPrefixDisplayHelper<'a, const F: usize>(&'a [u8]);

impl<const F: usize> HexPrefixDisplayHelper<'_, F> {
    const FITS: () = assert!(F <= MAX_HEX_PREFIX, "hex prefix too wide");
}

impl<const F: usize> Display for HexPrefixDisplayHelper<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = &self.0[..self.0.len().min(F)];
        let mut text = [0u8; 2 * MAX_HEX_PREFIX];
        let result = match text.get_mut(..2 * bytes.len()) {
            Some(out) => match hex::encode_to_slice(bytes, out) {
                Ok(()) => std::str::from_utf8(out)
                    .map_err(|_| std::fmt::Error)
                    .and_then(|s| f.write_str(s)),
                Err(_) => Err(std::fmt::Error),
            },
            None => Err(std::fmt::Error),
        };
        text.zeroize();
        result
    }
}

pub trait HexDisplay {
    fn fmt_hex_prefix<const F: usize>(&self) -> HexPrefixDisplayHelper<'_, F>;
}

impl<T: AsRef<[u8]> + ?Sized> HexDisplay for T {
    fn fmt_hex_prefix<const F: usize>(&self) -> HexPrefixDisplayHelper<'_, F> {
        #[allow(clippy::let_unit_value)]
        let () = HexPrefixDisplayHelper::<F>::FITS;
        HexPrefixDisplayHelper(self.as_ref())
    }
}

/// Parse a hex string into bytes, accepting an odd number of digits
///
/// Upper- and lowercase digits are both accepted; a leading zero nibble is
/// implied for odd-length input.
pub fn hex_decode_padded(input: &str) -> Result<Vec<u8>, HexError> {
    if input.is_empty() {
        return Err(HexError::Empty);
    }
    if input.len() % 2 == 1 {
        let mut padded = String::with_capacity(input.len() + 1);
        padded.push('0');
        padded.push_str(input);
        Ok(hex::decode(padded)?)
    } else {
        Ok(hex::decode(input)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefix_is_truncated() {
        let secret = [0xabu8; 32];
        assert_eq!(format!("{}", secret.fmt_hex_prefix::<4>()), "abababab");
    }

    #[test]
    fn short_input_is_printed_whole() {
        assert_eq!(format!("{}", [1u8, 2].fmt_hex_prefix::<16>()), "0102");
    }

    #[test]
    fn widest_prefix() {
        let secret = [0x5au8; 80];
        let text = format!("{}", secret.fmt_hex_prefix::<MAX_HEX_PREFIX>());
        assert_eq!(text, "5a".repeat(MAX_HEX_PREFIX));
    }

    #[test]
    fn odd_length_hex() -> anyhow::Result<()> {
        assert_eq!(hex_decode_padded("2")?, vec![0x02]);
        assert_eq!(hex_decode_padded("1FF")?, vec![0x01, 0xff]);
        assert_eq!(hex_decode_padded(""), Err(HexError::Empty));
        assert!(matches!(
            hex_decode_padded("XY"),
            Err(HexError::Digits(hex::FromHexError::InvalidHexCharacter { c: 'X', index: 0 }))
        ));
        Ok(())
    }
}
