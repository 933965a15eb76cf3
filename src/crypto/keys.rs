//! # Curve25519 Keypairs
//!
//! Keypair generation and raw Diffie-Hellman for the session layer.
//!
//! Private keys are Curve25519-clamped at generation time (low 3 bits of
//! byte 0 cleared; top bit of byte 31 cleared, bit 6 set) and the backing
//! bytes are overwritten with zeros on [`KeyPair::destroy`] and on drop.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Size of private keys, public keys, and DH outputs in bytes
pub const KEY_SIZE: usize = 32;

/// An owned Curve25519 keypair.
///
/// The private half lives in a fixed 32-byte array that is zeroized when the
/// pair is destroyed or dropped, so no copy outlives the owner.
pub struct KeyPair {
    private: [u8; KEY_SIZE],
    public: [u8; KEY_SIZE],
    created_at: DateTime<Utc>,
}

impl KeyPair {
    /// Generate a fresh keypair from the operating system CSPRNG.
    ///
    /// # Errors
    ///
    /// [`Error::RandomSourceUnavailable`] if the entropy source fails.
    pub fn generate() -> Result<Self> {
        let mut private = [0u8; KEY_SIZE];
        OsRng
            .try_fill_bytes(&mut private)
            .map_err(|_| Error::RandomSourceUnavailable)?;

        // Curve25519 clamping
        private[0] &= 248;
        private[31] &= 127;
        private[31] |= 64;

        let public = PublicKey::from(&StaticSecret::from(private)).to_bytes();

        Ok(Self {
            private,
            public,
            created_at: Utc::now(),
        })
    }

    /// The public half, safe to share.
    pub fn public_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.public
    }

    /// The private half. Callers must not copy it out of scope.
    pub(crate) fn private_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.private
    }

    /// When this pair was generated.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Overwrite the private key with zeros.
    ///
    /// Also runs on drop; calling it early shortens the window in which the
    /// secret exists in memory.
    pub fn destroy(&mut self) {
        self.private.zeroize();
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the private half
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// X25519 Diffie-Hellman over raw key bytes.
///
/// # Errors
///
/// - [`Error::InvalidKeySize`] unless both inputs are exactly 32 bytes.
/// - [`Error::InvalidPoint`] when the shared secret is all-zero, which
///   indicates a low-order public key.
pub fn diffie_hellman(private: &[u8], public: &[u8]) -> Result<[u8; KEY_SIZE]> {
    if private.len() != KEY_SIZE || public.len() != KEY_SIZE {
        return Err(Error::InvalidKeySize {
            private: private.len(),
            public: public.len(),
        });
    }

    let mut k = [0u8; KEY_SIZE];
    k.copy_from_slice(private);
    let mut u = [0u8; KEY_SIZE];
    u.copy_from_slice(public);

    let shared = x25519_dalek::x25519(k, u);
    k.zeroize();

    if shared == [0u8; KEY_SIZE] {
        return Err(Error::InvalidPoint);
    }
    Ok(shared)
}
