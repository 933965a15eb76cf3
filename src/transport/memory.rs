//! In-memory transport for end-to-end tests.
//!
//! A [`MemoryHub`] connects any number of [`MemoryTransport`] peers; opening
//! a stream hands the far end of a `tokio::io::duplex` pipe to the remote
//! peer's registered protocol handler. Peers can be toggled offline to
//! exercise the route-or-queue path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::transport::{Connectedness, IncomingStream, PeerStream, StreamHandler, Transport};

const STREAM_BUFFER: usize = 256 * 1024;

/// Registry wiring test peers together.
#[derive(Default)]
pub struct MemoryHub {
    peers: Mutex<HashMap<String, Arc<MemoryTransport>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a peer to the hub, returning its transport.
    pub fn join(self: &Arc<Self>, peer: &str) -> Arc<MemoryTransport> {
        let transport = Arc::new(MemoryTransport {
            peer: peer.to_string(),
            hub: Arc::downgrade(self),
            handlers: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        });
        self.peers
            .lock()
            .insert(peer.to_string(), transport.clone());
        transport
    }

    fn get(&self, peer: &str) -> Option<Arc<MemoryTransport>> {
        self.peers.lock().get(peer).cloned()
    }
}

/// One peer's view of the hub.
pub struct MemoryTransport {
    peer: String,
    hub: Weak<MemoryHub>,
    handlers: RwLock<HashMap<String, StreamHandler>>,
    online: AtomicBool,
}

impl MemoryTransport {
    /// Toggle this peer's connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn connectedness(&self, peer: &str) -> Connectedness {
        let Some(hub) = self.hub.upgrade() else {
            return Connectedness::NotConnected;
        };
        match hub.get(peer) {
            Some(remote) if self.is_online() && remote.is_online() => Connectedness::Connected,
            _ => Connectedness::NotConnected,
        }
    }

    async fn open_stream(&self, peer: &str, protocol: &str) -> Result<Box<dyn PeerStream>> {
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| Error::TransportDisconnected(peer.to_string()))?;
        let remote = hub
            .get(peer)
            .ok_or_else(|| Error::TransportDisconnected(peer.to_string()))?;
        if !self.is_online() || !remote.is_online() {
            return Err(Error::TransportDisconnected(peer.to_string()));
        }

        let handler = remote
            .handlers
            .read()
            .get(protocol)
            .cloned()
            .ok_or_else(|| {
                Error::StreamOpenFailed(format!("no handler for {protocol} on {peer}"))
            })?;

        let (local, remote_io) = tokio::io::duplex(STREAM_BUFFER);
        handler(IncomingStream {
            peer: self.peer.clone(),
            io: Box::new(remote_io),
        });
        Ok(Box::new(local))
    }

    fn set_stream_handler(&self, protocol: &str, handler: StreamHandler) {
        self.handlers.write().insert(protocol.to_string(), handler);
    }
}
