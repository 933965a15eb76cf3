//! # Transport Abstraction
//!
//! The peer-addressed stream transport the engine consumes.
//!
//! The core does not mandate a concrete transport; it assumes ordered,
//! reliable in-stream byte delivery, streams keyed by a protocol identifier,
//! and a connectedness query. The embedding application supplies the
//! implementation (libp2p, an overlay, a relay; the engine does not care).
//!
//! Recipient identifiers are currently handed to the transport verbatim as
//! peer identifiers; resolving a DID to a transport address is a deployment
//! concern that lives outside this crate.

#[cfg(test)]
pub(crate) mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Connection state of a remote peer as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectedness {
    /// A live connection to the peer exists
    Connected,
    /// No live connection
    NotConnected,
}

/// A bidirectional byte stream to a remote peer.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

/// An inbound stream accepted by the transport.
pub struct IncomingStream {
    /// Identifier of the remote peer that opened the stream
    pub peer: String,
    /// The stream itself; the handler owns it and must close it on all paths
    pub io: Box<dyn PeerStream>,
}

/// Callback invoked for each inbound stream on a registered protocol.
///
/// Handlers must not block the transport; the engine's handlers spawn a task
/// per stream.
pub type StreamHandler = Arc<dyn Fn(IncomingStream) + Send + Sync>;

/// A peer-addressed bidirectional stream transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Report whether a live connection to `peer` exists.
    fn connectedness(&self, peer: &str) -> Connectedness;

    /// Open an outbound stream to `peer` on `protocol`.
    async fn open_stream(&self, peer: &str, protocol: &str) -> Result<Box<dyn PeerStream>>;

    /// Register `handler` for inbound streams on `protocol`, replacing any
    /// previous registration.
    fn set_stream_handler(&self, protocol: &str, handler: StreamHandler);
}
