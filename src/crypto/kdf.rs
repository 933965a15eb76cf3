//! # Key Derivation
//!
//! HKDF-SHA256 (extract + expand) with fixed domain-separation strings.
//! Distinct `info` values keep session secrets and per-message keys
//! cryptographically independent even when derived from related input.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Domain separation strings. Bit-exact on both peers.
pub mod domain {
    /// Combines the X3DH DH outputs into the session secret
    pub const X3DH: &[u8] = b"XelvraX3DH";
    /// Derives a per-message key from a chain key
    pub const MESSAGE_KEY: &[u8] = b"XelvraMessageKey";
}

/// Derive `okm.len()` bytes from `ikm` via HKDF-SHA256.
pub fn derive(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], okm: &mut [u8]) -> Result<()> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, okm).map_err(|_| Error::KeyDerivationFailed)
}
