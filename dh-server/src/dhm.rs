//! Finite field Diffie-Hellman key agreement
//!
//! [DhmParams] holds the group (prime modulus P and generator G), loaded once.
//! [DhmContext] is the per-connection session: the own private exponent X
//! and public value GX, the peer's public value GY and the group element size
//! `len`. The same context type serves both roles; the server uses
//! [DhmContext::make_params], [DhmContext::read_public] and
//! [DhmContext::calc_secret], a peer uses [DhmContext::read_params],
//! [DhmContext::make_public] and [DhmContext::calc_secret].
//!
//! Public values, own and received, must lie in `[2, P-2]`. Zero, one and
//! `P-1` would pin the shared secret to a handful of values no matter what the
//! other side chose.

use std::path::Path;

use num_bigint_dig::{BigUint, ModInverse, RandBigInt};
use num_traits::One;
use rand::{CryptoRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use dh_server_util::file::LoadValue;

use crate::keyfile::{read_mpis, KeyFileError};
use crate::wire::{put_len_prefixed, take_len_prefixed, WireError};

#[derive(Error, Debug)]
pub enum DhmError {
    #[error("modulus must be odd and greater than 3")]
    BadModulus,
    #[error("generator is outside [2, P-2]")]
    BadGenerator,
    #[error("public value is outside [2, P-2]")]
    InvalidPublicValue,
    #[error("expected a {expected} byte public value, got {actual} bytes")]
    BadPublicLength { expected: usize, actual: usize },
    #[error("malformed parameter blob: {0}")]
    Malformed(#[from] WireError),
    #[error("no private exponent has been generated yet")]
    NoPrivateValue,
    #[error("no peer public value has been read yet")]
    NoPeerValue,
    #[error("blinding value is not invertible modulo P")]
    Blinding,
    #[error("shared secret is degenerate")]
    DegenerateSecret,
}

/// Number of bytes needed to write `v` big-endian
pub fn byte_len(v: &BigUint) -> usize {
    v.bits().div_ceil(8)
}

/// Whether `2 <= v <= p - 2`
fn in_range(v: &BigUint, p: &BigUint) -> bool {
    let two = BigUint::from(2u32);
    p > &two && v >= &two && v <= &(p - &two)
}

/// DH domain parameters
#[derive(Clone, PartialEq, Eq)]
pub struct DhmParams {
    p: BigUint,
    g: BigUint,
}

impl DhmParams {
    pub fn new(p: BigUint, g: BigUint) -> Result<Self, DhmError> {
        if p <= BigUint::from(3u32) || p.to_bytes_le()[0] & 1 == 0 {
            return Err(DhmError::BadModulus);
        }
        if !in_range(&g, &p) {
            return Err(DhmError::BadGenerator);
        }
        Ok(Self { p, g })
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// Size of a group element in bytes
    pub fn len(&self) -> usize {
        byte_len(&self.p)
    }

    pub fn bits(&self) -> usize {
        self.p.bits()
    }
}

impl std::fmt::Debug for DhmParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhmParams")
            .field("bits", &self.bits())
            .field("g", &self.g)
            .finish()
    }
}

impl LoadValue for DhmParams {
    type Error = KeyFileError;

    fn load<P: AsRef<Path>>(path: P) -> Result<Self, Self::Error> {
        let mut mpis = read_mpis(&path, &["P", "G"])?.into_iter();
        match (mpis.next(), mpis.next()) {
            (Some(p), Some(g)) => {
                Self::new(p, g).map_err(|e| KeyFileError::invalid(&path, e))
            }
            _ => Err(KeyFileError::invalid(&path, "missing P or G")),
        }
    }
}

/// Shared secret as minimal big-endian bytes; wiped when dropped
pub struct SharedSecret(Zeroizing<Vec<u8>>);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SharedSecret {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret({} bytes)", self.len())
    }
}

/// Key agreement session state
pub struct DhmContext {
    params: DhmParams,
    x: Option<BigUint>,
    gx: Option<BigUint>,
    gy: Option<BigUint>,
    len: usize,
}

impl DhmContext {
    pub fn new(params: &DhmParams) -> Self {
        Self {
            params: params.clone(),
            x: None,
            gx: None,
            gy: None,
            len: params.len(),
        }
    }

    /// Size of P, GX and GY in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn params(&self) -> &DhmParams {
        &self.params
    }

    /// Own public value, once generated
    pub fn public_value(&self) -> Option<&BigUint> {
        self.gx.as_ref()
    }

    /// Peer public value, once read
    pub fn peer_value(&self) -> Option<&BigUint> {
        self.gy.as_ref()
    }

    fn generate_keypair<R: RngCore + CryptoRng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<&BigUint, DhmError> {
        let p = &self.params.p;
        let mut x = rng.gen_biguint_range(&BigUint::from(2u32), &(p - BigUint::one()));
        let gx = self.params.g.modpow(&x, p);
        if !in_range(&gx, p) {
            x.zeroize();
            return Err(DhmError::InvalidPublicValue);
        }
        if let Some(mut old) = self.x.replace(x) {
            old.zeroize();
        }
        Ok(&*self.gx.insert(gx))
    }

    /// Generate a fresh private exponent and serialize `P`, `G` and `GX`
    ///
    /// Each integer is written as a 16-bit big-endian byte count followed by
    /// its minimal big-endian representation.
    pub fn make_params<R: RngCore + CryptoRng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<u8>, DhmError> {
        let gx = self.generate_keypair(rng)?.to_bytes_be();
        let mut blob = Vec::with_capacity(3 * (2 + self.len));
        put_len_prefixed(&mut blob, &self.params.p.to_bytes_be())?;
        put_len_prefixed(&mut blob, &self.params.g.to_bytes_be())?;
        put_len_prefixed(&mut blob, &gx)?;
        Ok(blob)
    }

    /// Parse a parameter blob produced by [Self::make_params]
    ///
    /// Returns a context holding the sender's public value as the peer value,
    /// together with the number of bytes consumed from `blob`.
    pub fn read_params(blob: &[u8]) -> Result<(Self, usize), DhmError> {
        let (p, rest) = take_len_prefixed(blob)?;
        let (g, rest) = take_len_prefixed(rest)?;
        let (gy, rest) = take_len_prefixed(rest)?;

        let params = DhmParams::new(BigUint::from_bytes_be(p), BigUint::from_bytes_be(g))?;
        let gy = BigUint::from_bytes_be(gy);
        if !in_range(&gy, params.p()) {
            return Err(DhmError::InvalidPublicValue);
        }

        let mut ctx = Self::new(&params);
        ctx.gy = Some(gy);
        Ok((ctx, blob.len() - rest.len()))
    }

    /// Generate a fresh private exponent and return `GX` as exactly
    /// [Self::len] bytes, zero padded on the left
    pub fn make_public<R: RngCore + CryptoRng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<u8>, DhmError> {
        let len = self.len;
        let gx = self.generate_keypair(rng)?.to_bytes_be();
        let mut out = vec![0u8; len - gx.len()];
        out.extend_from_slice(&gx);
        Ok(out)
    }

    /// Import the peer's public value
    ///
    /// `input` must be exactly [Self::len] bytes and the value must lie in
    /// `[2, P-2]`.
    pub fn read_public(&mut self, input: &[u8]) -> Result<(), DhmError> {
        if input.len() != self.len {
            return Err(DhmError::BadPublicLength {
                expected: self.len,
                actual: input.len(),
            });
        }
        let gy = BigUint::from_bytes_be(input);
        if !in_range(&gy, &self.params.p) {
            return Err(DhmError::InvalidPublicValue);
        }
        self.gy = Some(gy);
        Ok(())
    }

    /// Compute `K = GY^X mod P`
    ///
    /// The base is blinded with a random `Vi` and the result unblinded with
    /// `Vf = Vi^-X`, so the exponentiation never runs on the peer chosen value
    /// directly.
    pub fn calc_secret<R: RngCore + CryptoRng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<SharedSecret, DhmError> {
        let p = &self.params.p;
        let x = self.x.as_ref().ok_or(DhmError::NoPrivateValue)?;
        let gy = self.gy.as_ref().ok_or(DhmError::NoPeerValue)?;
        if !in_range(gy, p) {
            return Err(DhmError::InvalidPublicValue);
        }

        let mut vi = rng.gen_biguint_range(&BigUint::from(2u32), &(p - BigUint::one()));
        let mut vf = vi
            .clone()
            .mod_inverse(p)
            .and_then(|inv| inv.to_biguint())
            .ok_or(DhmError::Blinding)?
            .modpow(x, p);
        let mut blinded = (gy * &vi) % p;
        let mut k = (blinded.modpow(x, p) * &vf) % p;

        vi.zeroize();
        vf.zeroize();
        blinded.zeroize();

        let res = if k <= BigUint::one() {
            Err(DhmError::DegenerateSecret)
        } else {
            Ok(SharedSecret(Zeroizing::new(k.to_bytes_be())))
        };
        k.zeroize();
        res
    }
}

impl Drop for DhmContext {
    fn drop(&mut self) {
        if let Some(x) = self.x.as_mut() {
            x.zeroize();
        }
    }
}

impl std::fmt::Debug for DhmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhmContext")
            .field("len", &self.len)
            .field("has_private", &self.x.is_some())
            .field("has_peer_value", &self.gy.is_some())
            .finish()
    }
}
