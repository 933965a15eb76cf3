//! # Identity
//!
//! The signing capability the core consumes, plus a local Ed25519-backed
//! implementation.
//!
//! The engine treats identity as an abstraction: anything that can produce a
//! DID string and sign bytes can drive the envelope layer. [`LocalIdentity`]
//! is the in-process implementation: an Ed25519 keypair whose DID is the
//! did:key encoding of its verifying key, making signature verification
//! self-contained (see [`did`]).

pub mod did;

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use crate::error::Result;

pub use did::Did;

/// A signing capability bound to a stable decentralized identifier.
pub trait Identity: Send + Sync {
    /// The decentralized identifier naming this identity.
    fn did(&self) -> &str;

    /// Sign arbitrary bytes.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// An in-process identity: an Ed25519 signing key and its did:key DID.
pub struct LocalIdentity {
    signing: SigningKey,
    did: Did,
}

impl LocalIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let did = Did::from_public_key(signing.verifying_key().as_bytes());
        Self { signing, did }
    }

    /// Rebuild an identity from a stored 32-byte secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(secret);
        let did = Did::from_public_key(signing.verifying_key().as_bytes());
        Self { signing, did }
    }

    /// The Ed25519 verifying key bytes.
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }
}

impl Identity for LocalIdentity {
    fn did(&self) -> &str {
        self.did.as_str()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing.sign(data).to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn did_encodes_the_verifying_key() {
        let identity = LocalIdentity::generate();
        let parsed = Did::parse(identity.did()).unwrap();
        assert_eq!(parsed.public_key().unwrap(), identity.verifying_key_bytes());
    }

    #[test]
    fn signatures_verify_against_the_did_key() {
        let identity = LocalIdentity::generate();
        let signature = identity.sign(b"some payload").unwrap();

        let key = Did::parse(identity.did()).unwrap().public_key().unwrap();
        let vk = VerifyingKey::from_bytes(&key).unwrap();
        let sig = Signature::from_bytes(&signature.as_slice().try_into().unwrap());
        vk.verify(b"some payload", &sig).unwrap();
    }

    #[test]
    fn secret_bytes_rebuild_the_same_identity() {
        let identity = LocalIdentity::generate();
        let rebuilt = LocalIdentity::from_secret_bytes(&identity.signing.to_bytes());
        assert_eq!(identity.did(), rebuilt.did());
    }
}
