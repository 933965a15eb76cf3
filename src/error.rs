//! # Error Handling
//!
//! Error types for the messaging core.
//!
//! Propagation policy:
//!
//! - **Wire validation** and **transport** failures are caught at the stream
//!   boundary (logged, frame dropped, stream closed) and never escape to the
//!   caller of [`crate::engine::MessageEngine::send`].
//! - **Crypto** failures are fatal to the affected operation and propagate.
//! - **Engine** errors (`QueueFull`, `Stopped`, `AlreadyStarted`) surface
//!   backpressure and lifecycle state to the caller.
//! - **Transfer** errors mark the transfer failed and delete partial
//!   artifacts.
//! - **Persistence** errors are logged; in-memory state is kept and the write
//!   is retried on the next sweep.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the messaging core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Cryptographic errors
    // ========================================================================
    /// The system entropy source failed
    #[error("secure random source unavailable")]
    RandomSourceUnavailable,

    /// A Diffie-Hellman input was not 32 bytes
    #[error("invalid key size: private={private}, public={public}")]
    InvalidKeySize {
        /// Length of the private-key input
        private: usize,
        /// Length of the public-key input
        public: usize,
    },

    /// The X25519 primitive rejected the input point (all-zero shared secret)
    #[error("invalid curve point")]
    InvalidPoint,

    /// An X3DH Diffie-Hellman step failed
    #[error("X3DH handshake failed at DH{step}")]
    HandshakeFailed {
        /// Index of the failed DH computation (1-based)
        step: u8,
    },

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptFailed,

    /// AEAD decryption or authentication failed
    #[error("decryption failed")]
    DecryptFailed,

    /// An AEAD nonce was seen twice within the replay window
    #[error("nonce already used within replay window")]
    NonceReplay,

    // ========================================================================
    // Wire validation errors
    // ========================================================================
    /// A frame length header exceeded the protocol limit
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared or actual payload size
        size: usize,
        /// Limit for this protocol
        max: usize,
    },

    /// A payload failed JSON (de)serialization
    #[error("malformed JSON payload: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// A file-transfer control frame carried the wrong magic number
    #[error("bad magic number: {magic:#010x}")]
    BadMagic {
        /// The magic value received
        magic: u32,
    },

    /// Envelope signature verification failed
    #[error("message signature verification failed")]
    SignatureInvalid,

    /// A decentralized identifier could not be parsed
    #[error("invalid DID: {0}")]
    InvalidDid(String),

    /// The identity provider failed to produce a signature
    #[error("signing failed: {0}")]
    SigningFailed(String),

    // ========================================================================
    // Engine lifecycle / backpressure
    // ========================================================================
    /// The outgoing channel is full; the caller should back off
    #[error("outgoing message queue full")]
    QueueFull,

    /// The engine is not running
    #[error("message engine stopped")]
    Stopped,

    /// `start` was called on an engine that is already running
    #[error("message engine already started")]
    AlreadyStarted,

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// The peer is not connected
    #[error("peer not connected: {0}")]
    TransportDisconnected(String),

    /// Opening an outbound stream failed
    #[error("failed to open stream: {0}")]
    StreamOpenFailed(String),

    /// Reading or writing a stream failed
    #[error("stream I/O error: {0}")]
    StreamIoError(#[from] std::io::Error),

    // ========================================================================
    // File transfer errors
    // ========================================================================
    /// The transfer was rejected, cancelled, or otherwise aborted
    #[error("file transfer aborted: {0}")]
    TransferAborted(String),

    /// The transfer exceeded its stream-level deadline
    #[error("file transfer timed out")]
    TransferExpired,

    /// The received file hash did not match the offered metadata
    #[error("file integrity mismatch: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch {
        /// Hash announced in the transfer metadata (hex)
        expected: String,
        /// Hash computed over the received bytes (hex)
        actual: String,
    },

    // ========================================================================
    // Persistence errors
    // ========================================================================
    /// The offline store could not be written to disk
    #[error("persistence error: {0}")]
    PersistenceError(String),
}
