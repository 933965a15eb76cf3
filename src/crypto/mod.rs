//! # Cryptographic Core
//!
//! Primitives and session state for end-to-end message protection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         CRYPTO MODULES                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  keys        Curve25519 keypairs (clamped, zeroized) + X25519 DH        │
//! │  kdf         HKDF-SHA256 with fixed domain-separation info strings      │
//! │  encryption  AES-256-GCM seal/open, random 96-bit nonce prepended       │
//! │  session     X3DH key agreement, chain-key message crypto,              │
//! │              replay window, secret destruction                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | Confidentiality | AES-256-GCM under per-message keys |
//! | Key agreement | X3DH (three or four X25519 exchanges + HKDF) |
//! | Replay defense | Per-session sliding nonce window (5 minutes) |
//! | Key hygiene | All secret material zeroized on drop/destroy |

pub mod encryption;
pub mod kdf;
pub mod keys;
pub mod session;

pub use encryption::{open, seal, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use keys::{diffie_hellman, KeyPair};
pub use session::{DoubleRatchetState, NonceWindow, SessionCrypto, SessionSecret, X3dhBundle};
