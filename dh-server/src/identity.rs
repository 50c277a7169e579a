//! Long-term RSA identity of the server
//!
//! The private key file lists `N, E, D, P, Q, DP, DQ, QP`, one per line. The
//! public half is `N, E`; since those come first, the private key file doubles
//! as a public key file.
//!
//! Message 1 is authenticated by a PKCS#1 v1.5 signature over the SHA-1
//! digest of the DH parameter blob.

use std::path::Path;

use num_bigint_dig::BigUint;
use num_traits::One;
use rand::{CryptoRng, RngCore};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use dh_server_util::file::LoadValue;

use crate::keyfile::{read_mpis, KeyFileError};

/// Length of the digest that gets signed
pub const DIGEST_LEN: usize = 20;

const PRIVATE_KEY_FIELDS: [&str; 8] = ["N", "E", "D", "P", "Q", "DP", "DQ", "QP"];
const PUBLIC_KEY_FIELDS: [&str; 2] = ["N", "E"];

/// SHA-1 digest of a parameter blob
pub fn params_digest(blob: &[u8]) -> [u8; DIGEST_LEN] {
    Sha1::digest(blob).into()
}

fn signature_scheme() -> Pkcs1v15Sign {
    Pkcs1v15Sign::new::<Sha1>()
}

/// RSA private key used to sign Message 1
pub struct IdentityKey {
    key: RsaPrivateKey,
}

impl IdentityKey {
    /// Assemble a key from its eight components
    ///
    /// The CRT values are not taken on trust: they must match what `D`, `P`
    /// and `Q` imply.
    #[allow(clippy::too_many_arguments)]
    pub fn from_components(
        n: BigUint,
        e: BigUint,
        d: BigUint,
        p: BigUint,
        q: BigUint,
        dp: BigUint,
        dq: BigUint,
        qp: BigUint,
    ) -> Result<Self, String> {
        let one = BigUint::one();
        if p <= one || q <= one {
            return Err("prime factors must be greater than one".to_owned());
        }
        if &d % (&p - &one) != dp {
            return Err("DP does not equal D mod (P-1)".to_owned());
        }
        if &d % (&q - &one) != dq {
            return Err("DQ does not equal D mod (Q-1)".to_owned());
        }
        if (&q * &qp) % &p != one {
            return Err("QP is not the inverse of Q mod P".to_owned());
        }

        let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| format!("inconsistent key: {e}"))?;
        key.validate()
            .map_err(|e| format!("key check failed: {e}"))?;
        Ok(Self { key })
    }

    /// Modulus size in bytes; every signature has exactly this length
    pub fn len(&self) -> usize {
        self.key.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bits(&self) -> usize {
        self.key.n().bits()
    }

    pub fn public_key(&self) -> PublicIdentity {
        PublicIdentity {
            key: self.key.to_public_key(),
        }
    }

    /// Sign a SHA-1 digest
    ///
    /// `rng` blinds the private key operation.
    pub fn sign_digest<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        digest: &[u8; DIGEST_LEN],
    ) -> Result<Vec<u8>, rsa::Error> {
        self.key.sign_with_rng(rng, signature_scheme(), digest)
    }
}

impl std::fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKey")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

impl LoadValue for IdentityKey {
    type Error = KeyFileError;

    fn load<P: AsRef<Path>>(path: P) -> Result<Self, Self::Error> {
        let v = read_mpis(&path, &PRIVATE_KEY_FIELDS)?;
        let [n, e, d, p, q, dp, dq, qp]: [BigUint; 8] = v
            .try_into()
            .map_err(|_| KeyFileError::invalid(&path, "wrong number of key components"))?;
        Self::from_components(n, e, d, p, q, dp, dq, qp)
            .map_err(|reason| KeyFileError::invalid(&path, reason))
    }
}

/// RSA public key, used by peers to check Message 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIdentity {
    key: RsaPublicKey,
}

impl PublicIdentity {
    pub fn new(n: BigUint, e: BigUint) -> Result<Self, rsa::Error> {
        Ok(Self {
            key: RsaPublicKey::new(n, e)?,
        })
    }

    pub fn len(&self) -> usize {
        self.key.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn verify_digest(&self, digest: &[u8; DIGEST_LEN], signature: &[u8]) -> bool {
        self.key
            .verify(signature_scheme(), digest, signature)
            .is_ok()
    }
}

impl LoadValue for PublicIdentity {
    type Error = KeyFileError;

    fn load<P: AsRef<Path>>(path: P) -> Result<Self, Self::Error> {
        let mut v = read_mpis(&path, &PUBLIC_KEY_FIELDS)?.into_iter();
        match (v.next(), v.next()) {
            (Some(n), Some(e)) => Self::new(n, e).map_err(|e| KeyFileError::invalid(&path, e)),
            _ => Err(KeyFileError::invalid(&path, "missing N or E")),
        }
    }
}
