//! # Authenticated Encryption
//!
//! AES-256-GCM seal/open for message payloads.
//!
//! Wire format: `[ nonce (12 bytes) | ciphertext + tag (16 bytes) ]`.
//! A fresh random nonce is drawn per call and prepended to the output, so a
//! sealed payload is self-contained.
//!
//! AES-GCM is used (rather than a ChaCha variant) for hardware acceleration
//! on the platforms this core targets.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext`, prepending a fresh random 12-byte nonce.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| Error::RandomSourceUnavailable)?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::EncryptFailed)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (`nonce || ciphertext+tag`).
pub fn open(key: &[u8; KEY_SIZE], wire: &[u8]) -> Result<Vec<u8>> {
    if wire.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptFailed);
    }
    let (nonce, ciphertext) = wire.split_at(NONCE_SIZE);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [7u8; KEY_SIZE];
        let wire = seal(&key, b"attack at dawn").unwrap();
        assert_eq!(wire.len(), NONCE_SIZE + 14 + TAG_SIZE);
        assert_eq!(open(&key, &wire).unwrap(), b"attack at dawn");
    }

    #[test]
    fn nonces_are_fresh_per_call() {
        let key = [7u8; KEY_SIZE];
        let a = seal(&key, b"x").unwrap();
        let b = seal(&key, b"x").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn open_rejects_tampering() {
        let key = [7u8; KEY_SIZE];
        let mut wire = seal(&key, b"payload").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        assert!(matches!(open(&key, &wire), Err(Error::DecryptFailed)));
    }

    #[test]
    fn open_rejects_short_input() {
        let key = [7u8; KEY_SIZE];
        assert!(matches!(
            open(&key, &[0u8; NONCE_SIZE + TAG_SIZE - 1]),
            Err(Error::DecryptFailed)
        ));
    }

    #[test]
    fn open_rejects_wrong_key() {
        let wire = seal(&[1u8; KEY_SIZE], b"secret").unwrap();
        assert!(matches!(
            open(&[2u8; KEY_SIZE], &wire),
            Err(Error::DecryptFailed)
        ));
    }
}
