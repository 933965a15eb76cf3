//! # Wire Layer
//!
//! Length-prefixed framing and the signed message envelope.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          WIRE FRAME                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   ┌──────────────────────┬──────────────────────────────────────┐       │
//! │   │  length: u32 (BE)    │  payload: `length` bytes             │       │
//! │   └──────────────────────┴──────────────────────────────────────┘       │
//! │                                                                         │
//! │   Message protocol payload: JSON `Message` envelope                     │
//! │   File protocol payload:    JSON `FileControlFrame`                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod envelope;
pub mod frame;

pub use envelope::{Message, MessageKind};

/// Largest frame accepted on the message protocol
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Largest file-transfer control frame accepted
pub const MAX_CONTROL_FRAME_SIZE: usize = 4 * 1024;

/// Largest total file size accepted for transfer
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default file chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Serde adapter: `Vec<u8>` as standard base64 in JSON.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]> + ?Sized,
    {
        serializer.serialize_str(&BASE64.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<Vec<u8>>` as standard base64 in JSON.
pub(crate) mod base64_bytes_opt {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
