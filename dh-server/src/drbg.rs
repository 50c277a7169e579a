//! Seeded random number generator used for every random choice of the handshake

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Bytes of fresh entropy drawn per seeding
pub const ENTROPY_LEN: usize = 48;

/// Label the generator is personalized with unless configured otherwise
pub const DEFAULT_PERSONALIZATION: &str = "dh_server";

/// Where seed entropy comes from
pub trait EntropySource {
    fn fill_entropy(&mut self, dest: &mut [u8]) -> Result<(), rand::Error>;
}

/// The operating system's entropy pool
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill_entropy(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(dest)
    }
}

/// Deterministic generator seeded from an [EntropySource] and a
/// personalization label
///
/// The seed is `SHA-256(entropy || label)`; the label separates the output
/// of differently labelled instances even on identical entropy.
pub struct Drbg {
    inner: ChaCha20Rng,
}

impl Drbg {
    pub fn seed<E: EntropySource + ?Sized>(
        entropy: &mut E,
        personalization: &[u8],
    ) -> Result<Self, rand::Error> {
        let mut pool = [0u8; ENTROPY_LEN];
        let res = entropy.fill_entropy(&mut pool);
        let seeded = res.map(|()| {
            let mut hasher = Sha256::new();
            hasher.update(&pool);
            hasher.update(personalization);
            let mut seed: [u8; 32] = hasher.finalize().into();
            let inner = ChaCha20Rng::from_seed(seed);
            seed.zeroize();
            Self { inner }
        });
        pool.zeroize();
        seeded
    }
}

impl std::fmt::Debug for Drbg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Drbg { .. }")
    }
}

impl RngCore for Drbg {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

impl CryptoRng for Drbg {}
