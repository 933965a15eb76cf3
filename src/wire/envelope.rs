//! # Signed Message Envelope
//!
//! The `Message` envelope, its JSON encoding, and signature handling.
//!
//! ## Canonicalization
//!
//! The signed bytes are the JSON serialization of the message with the
//! `signature` field omitted and fields in a fixed order:
//!
//! ```text
//! id, kind, from, to, group_id (if present), content, metadata (if present), timestamp
//! ```
//!
//! Serde serializes struct fields in declaration order, so the canonical view
//! below *is* the canonical form: both peers produce byte-identical input to
//! the signature.
//!
//! ## Verification
//!
//! The sender's Ed25519 verifying key is recovered from the `from` field,
//! which is a self-certifying did:key identifier. An envelope that fails
//! verification is dropped at the stream boundary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::{Did, Identity};
use crate::wire::base64_bytes;

/// Classification of a message payload.
///
/// Encoded as an integer on the wire: `0=text, 1=file, 2=image, 3=audio,
/// 4=video, 5=system`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageKind {
    /// Plain text chat message
    Text = 0,
    /// File transfer notification
    File = 1,
    /// Inline image
    Image = 2,
    /// Audio clip
    Audio = 3,
    /// Video clip
    Video = 4,
    /// Engine/system notification
    System = 5,
}

impl MessageKind {
    /// Human-readable name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, String> {
        match value {
            0 => Ok(Self::Text),
            1 => Ok(Self::File),
            2 => Ok(Self::Image),
            3 => Ok(Self::Audio),
            4 => Ok(Self::Video),
            5 => Ok(Self::System),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// A signed message envelope.
///
/// `content` is opaque: plaintext for unencrypted messages, AEAD wire bytes
/// (nonce-prefixed) when `encrypted` is set. The signature always covers the
/// content as transmitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique per sender (UUID v4)
    pub id: String,
    /// Payload classification
    pub kind: MessageKind,
    /// Sender's DID
    pub from: String,
    /// Recipient's DID
    pub to: String,
    /// Group conversation identifier (reserved)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Payload bytes, possibly ciphertext
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    /// Free-form sender metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    /// Set at send time, never mutated
    pub timestamp: DateTime<Utc>,
    /// Ed25519 signature over the canonical form
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// Whether `content` is AEAD ciphertext
    pub encrypted: bool,
}

impl Message {
    /// Build an unsigned message with a fresh id and the current time.
    pub fn new(from: &str, to: &str, content: Vec<u8>, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            from: from.to_string(),
            to: to.to_string(),
            group_id: None,
            content,
            metadata: None,
            timestamp: Utc::now(),
            signature: Vec::new(),
            encrypted: false,
        }
    }
}

/// Field-ordered serialization view used for signing. Field order here is the
/// wire contract; do not reorder.
#[derive(Serialize)]
struct CanonicalView<'a> {
    id: &'a str,
    kind: MessageKind,
    from: &'a str,
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<&'a String>,
    #[serde(with = "base64_bytes")]
    content: &'a [u8],
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a HashMap<String, serde_json::Value>>,
    timestamp: &'a DateTime<Utc>,
}

/// The canonical bytes a signature covers.
pub fn canonical_bytes(message: &Message) -> Result<Vec<u8>> {
    let view = CanonicalView {
        id: &message.id,
        kind: message.kind,
        from: &message.from,
        to: &message.to,
        group_id: message.group_id.as_ref(),
        content: &message.content,
        metadata: message.metadata.as_ref(),
        timestamp: &message.timestamp,
    };
    Ok(serde_json::to_vec(&view)?)
}

/// Sign a message in place with the sender's identity.
pub fn sign(message: &mut Message, identity: &dyn Identity) -> Result<()> {
    message.signature = identity.sign(&canonical_bytes(message)?)?;
    Ok(())
}

/// Verify a message signature against the key encoded in its `from` DID.
pub fn verify(message: &Message) -> Result<()> {
    let key = Did::parse(&message.from)?.public_key()?;
    let verifying_key = VerifyingKey::from_bytes(&key).map_err(|_| Error::SignatureInvalid)?;

    let signature_bytes: [u8; 64] = message
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| Error::SignatureInvalid)?;
    let signature = Signature::from_bytes(&signature_bytes);

    verifying_key
        .verify(&canonical_bytes(message)?, &signature)
        .map_err(|_| Error::SignatureInvalid)
}
