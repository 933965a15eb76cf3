//! # Decentralized Identifiers
//!
//! `did:key` identifiers over Ed25519 verifying keys.
//!
//! ```text
//! did:key:z6MkhaXgBZDvotDUGRy7K9L7M2yvCpREH5...
//! │       ││
//! │       │└─ multicodec 0xed01 + 32-byte Ed25519 key, base58btc
//! │       └── multibase prefix for base58btc
//! └────────── W3C DID scheme + method
//! ```
//!
//! did:key is self-certifying: the identifier *is* the verifying key, so the
//! envelope layer can recover a sender's signature key from the `from` field
//! without any registry lookup.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The DID method prefix for did:key
pub const DID_KEY_PREFIX: &str = "did:key:";

/// Multicodec prefix for Ed25519 public keys (0xed01 in varint encoding)
const ED25519_MULTICODEC_PREFIX: [u8; 2] = [0xed, 0x01];

/// A decentralized identifier using the did:key method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Did {
    value: String,
}

impl Did {
    /// Create a DID from an Ed25519 verifying key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut multicodec_key = Vec::with_capacity(34);
        multicodec_key.extend_from_slice(&ED25519_MULTICODEC_PREFIX);
        multicodec_key.extend_from_slice(public_key);

        let encoded = format!("z{}", bs58::encode(&multicodec_key).into_string());
        Self {
            value: format!("{DID_KEY_PREFIX}{encoded}"),
        }
    }

    /// Parse and validate a DID string.
    pub fn parse(did_string: &str) -> Result<Self> {
        let did = Self {
            value: did_string.to_string(),
        };
        did.public_key()?;
        Ok(did)
    }

    /// Recover the Ed25519 verifying key encoded in this DID.
    pub fn public_key(&self) -> Result<[u8; 32]> {
        let identifier = self
            .value
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or_else(|| Error::InvalidDid(format!("missing '{DID_KEY_PREFIX}' prefix")))?;

        let encoded = identifier
            .strip_prefix('z')
            .ok_or_else(|| Error::InvalidDid("identifier must start with 'z' (base58btc)".into()))?;

        let decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| Error::InvalidDid(format!("invalid base58btc encoding: {e}")))?;

        if decoded.len() != 34 || decoded[..2] != ED25519_MULTICODEC_PREFIX {
            return Err(Error::InvalidDid(
                "expected 0xed01 multicodec prefix and a 32-byte key".into(),
            ));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded[2..]);
        Ok(key)
    }

    /// The full DID string.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_public_key() {
        let key = [0xABu8; 32];
        let did = Did::from_public_key(&key);
        assert!(did.as_str().starts_with("did:key:z"));

        let parsed = Did::parse(did.as_str()).unwrap();
        assert_eq!(parsed.public_key().unwrap(), key);
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(matches!(
            Did::parse("did:web:example.com"),
            Err(Error::InvalidDid(_))
        ));
    }

    #[test]
    fn rejects_missing_multibase_prefix() {
        assert!(matches!(
            Did::parse("did:key:Qm12345"),
            Err(Error::InvalidDid(_))
        ));
    }

    #[test]
    fn rejects_wrong_multicodec() {
        // 0x1205 prefix instead of 0xed01
        let mut bytes = vec![0x12, 0x05];
        bytes.extend_from_slice(&[0u8; 32]);
        let bad = format!("did:key:z{}", bs58::encode(&bytes).into_string());
        assert!(matches!(Did::parse(&bad), Err(Error::InvalidDid(_))));
    }
}
