//! # Xelvra Core
//!
//! The secure messaging core of a peer-to-peer messenger: Signal-style key
//! agreement, authenticated envelopes, at-most-once delivery with offline
//! queueing, and chunked file transfer, all on top of an abstract
//! peer-addressed stream transport.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        XELVRA CORE MODULES                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │   Crypto    │  │  Identity   │  │    Wire     │  │    Engine    │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - X25519    │  │ - Ed25519   │  │ - Framing   │  │ - Workers    │   │
//! │  │ - X3DH      │  │ - did:key   │  │ - Envelope  │  │ - Dispatch   │   │
//! │  │ - AES-GCM   │  │ - Signing   │  │ - Canonical │  │ - Route/queue│   │
//! │  │ - Replay    │  │             │  │   signing   │  │              │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         │                │                │                │           │
//! │         └────────────────┴───────┬────────┴────────────────┘           │
//! │                                  │                                     │
//! │  ┌─────────────┐  ┌─────────────┐ │ ┌─────────────────────────────────┐ │
//! │  │  Offline    │  │  Transfer   │ │ │          Transport              │ │
//! │  │             │  │             │ │ │                                 │ │
//! │  │ - Queues    │  │ - Chunks    │ └►│ - Abstract streams              │ │
//! │  │ - Retry     │  │ - Sessions  │   │ - Connectedness                 │ │
//! │  │ - Expiry    │  │ - Integrity │   │ - Supplied by the application   │ │
//! │  └─────────────┘  └─────────────┘   └─────────────────────────────────┘ │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire crate
//! - [`config`] - Directories, capacities, timeouts, limits
//! - [`crypto`] - Keypairs, X3DH, AEAD, replay defense
//! - [`identity`] - Signing capability and did:key identifiers
//! - [`transport`] - The abstract stream transport the engine consumes
//! - [`wire`] - Length-prefixed framing and the signed envelope
//! - [`engine`] - Workers, dispatch, route-or-queue delivery
//! - [`offline`] - Durable queues for unreachable recipients
//! - [`transfer`] - Chunked file transfer with integrity checking
//!
//! ## Security Model
//!
//! ```text
//! Layer 1: Envelope authentication. Every message is Ed25519-signed over a
//!          canonical form; the verifying key is recovered from the sender's
//!          self-certifying did:key identifier.
//! Layer 2: Payload confidentiality. AES-256-GCM under per-message keys
//!          derived from an X3DH session secret, with a sliding nonce window
//!          rejecting replays.
//! Layer 3: Key hygiene. Every secret (keypairs, session secrets, message
//!          keys) is zeroized on destruction.
//! ```

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod identity;
pub mod offline;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use config::CoreConfig;
pub use engine::{EngineState, MessageEngine, MessageHandler};
pub use error::{Error, Result};
pub use identity::{Identity, LocalIdentity};
pub use transport::{Connectedness, IncomingStream, Transport};
pub use wire::{Message, MessageKind};
