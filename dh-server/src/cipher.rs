//! Single block AES-256 used to demonstrate possession of the shared secret
//!
//! The key is the first [KEY_LEN] bytes of the shared secret, taken as is.
//! There is no key derivation step and no mode of operation; exactly one
//! block gets encrypted per handshake.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};
use thiserror::Error;

pub const BLOCK_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

static_assertions::assert_eq_size!([u8; BLOCK_LEN], Block);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    #[error("need 32 bytes of key material, got {0}")]
    ShortKeyMaterial(usize),
}

/// AES-256 keyed from a shared secret
pub struct DemoCipher {
    aes: Aes256,
}

impl DemoCipher {
    /// Key with the first [KEY_LEN] bytes of `key_material`
    pub fn new(key_material: &[u8]) -> Result<Self, CipherError> {
        let key = key_material
            .get(..KEY_LEN)
            .ok_or(CipherError::ShortKeyMaterial(key_material.len()))?;
        let aes =
            Aes256::new_from_slice(key).map_err(|_| CipherError::ShortKeyMaterial(key.len()))?;
        Ok(Self { aes })
    }

    pub fn encrypt_block(&self, plaintext: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut block = Block::from(*plaintext);
        self.aes.encrypt_block(&mut block);
        block.into()
    }

    pub fn decrypt_block(&self, ciphertext: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut block = Block::from(*ciphertext);
        self.aes.decrypt_block(&mut block);
        block.into()
    }
}

impl std::fmt::Debug for DemoCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DemoCipher { .. }")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fips197_vector() {
        // FIPS-197 appendix C.3
        let key = hex::decode("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")
            .unwrap();
        let pt: [u8; 16] = hex::decode("00112233445566778899aabbccddeeff")
            .unwrap()
            .try_into()
            .unwrap();
        let ct = hex::decode("8ea2b7ca516745bfeafc49904b496089").unwrap();

        let cipher = DemoCipher::new(&key).unwrap();
        assert_eq!(cipher.encrypt_block(&pt).as_slice(), ct.as_slice());
        assert_eq!(cipher.decrypt_block(&cipher.encrypt_block(&pt)), pt);
    }

    #[test]
    fn only_the_key_prefix_is_used() {
        let mut long = vec![7u8; 256];
        let a = DemoCipher::new(&long).unwrap();
        long[KEY_LEN..].fill(0);
        let b = DemoCipher::new(&long).unwrap();
        let pt = *b"==Hello there!==";
        assert_eq!(a.encrypt_block(&pt), b.encrypt_block(&pt));
    }

    #[test]
    fn short_key_material_is_rejected() {
        assert_eq!(
            DemoCipher::new(&[1u8; 31]).err(),
            Some(CipherError::ShortKeyMaterial(31))
        );
        assert!(DemoCipher::new(&[]).is_err());
    }
}
