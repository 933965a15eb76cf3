//! # Message Engine
//!
//! Bidirectional per-peer messaging on top of the stream transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MESSAGE ENGINE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  send() ──► outgoing channel (100) ──► outbound dispatcher             │
//! │                                          │                              │
//! │                                          ├── connected ──► new stream,  │
//! │                                          │                 framed JSON  │
//! │                                          └── offline ────► OfflineStore │
//! │                                                              ▲          │
//! │                                          offline sweeper ────┘          │
//! │                                          (every 30 s, retries ≤ 5)      │
//! │                                                                         │
//! │  inbound stream ──► verify ──► decrypt? ──► incoming channel (100)      │
//! │                                                │                        │
//! │                                                ▼                        │
//! │                                     inbound dispatcher ──► handler      │
//! │                                                            by kind      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three long-lived workers (inbound dispatcher, outbound dispatcher,
//! offline sweeper) share a shutdown signal and communicate with producers
//! through bounded channels; `send` never blocks, it surfaces `QueueFull`.
//! Each inbound stream runs on its own task, so one slow peer cannot stall
//! the rest, and a panicking worker is isolated to its task.
//!
//! Lifecycle: `Idle → Running → Stopping → Stopped`. Only `Running` accepts
//! `send`; `start` a second time and `stop` a second time are errors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::config::CoreConfig;
use crate::crypto::SessionCrypto;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::offline::OfflineStore;
use crate::transfer::{self, TransferRegistry};
use crate::transport::{Connectedness, IncomingStream, Transport};
use crate::wire::{envelope, frame, Message, MessageKind};

use tokio::io::AsyncWriteExt;

/// Protocol identifiers registered with the transport. Bit-exact.
pub mod protocol_ids {
    /// Direct message protocol
    pub const MESSAGE: &str = "/xelvra/message/1.0.0";
    /// File transfer protocol
    pub const FILE: &str = "/xelvra/file/1.0.0";
    /// Group messaging protocol (reserved)
    pub const GROUP: &str = "/xelvra/group/1.0.0";
}

/// Handler invoked for verified (and, where applicable, decrypted) inbound
/// messages of one kind.
///
/// Handlers run on the inbound dispatcher task: they must not block, and
/// they must be idempotent on `message.id`, since a crash between offline
/// delivery and persistence can replay a message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one inbound message.
    async fn handle_message(&self, message: &Message) -> Result<()>;
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, workers not yet running
    Idle,
    /// Workers running; `send` accepted
    Running,
    /// Shutdown in progress
    Stopping,
    /// Workers drained; terminal
    Stopped,
}

struct EngineInner {
    transport: Arc<dyn Transport>,
    identity: Arc<dyn Identity>,
    config: CoreConfig,
    state: RwLock<EngineState>,
    incoming_tx: mpsc::Sender<Message>,
    incoming_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    outgoing_tx: mpsc::Sender<Message>,
    outgoing_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    handlers: RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>,
    chain_keys: RwLock<HashMap<String, Zeroizing<[u8; 32]>>>,
    session: SessionCrypto,
    offline: OfflineStore,
    transfers: TransferRegistry,
}

/// The messaging engine: signed envelopes over per-peer streams with
/// route-or-queue delivery and chunked file transfer.
pub struct MessageEngine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl MessageEngine {
    /// Build an engine and register its stream handlers with the transport.
    ///
    /// The offline store is loaded from disk here; workers do not run until
    /// [`start`](Self::start).
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: Arc<dyn Identity>,
        config: CoreConfig,
    ) -> Result<Self> {
        let (incoming_tx, incoming_rx) = mpsc::channel(config.channel_capacity);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.channel_capacity);
        let offline = OfflineStore::open(&config);
        let session = SessionCrypto::with_nonce_window(config.nonce_window)?;

        let inner = Arc::new(EngineInner {
            transport,
            identity,
            config,
            state: RwLock::new(EngineState::Idle),
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            handlers: RwLock::new(HashMap::new()),
            chain_keys: RwLock::new(HashMap::new()),
            session,
            offline,
            transfers: TransferRegistry::new(),
        });
        install_stream_handlers(&inner);

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner,
            workers: Mutex::new(Vec::new()),
            shutdown,
        })
    }

    /// Launch the inbound dispatcher, outbound dispatcher, and offline
    /// sweeper. Starting a running engine is an error.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            match *state {
                EngineState::Idle => *state = EngineState::Running,
                EngineState::Running | EngineState::Stopping => return Err(Error::AlreadyStarted),
                EngineState::Stopped => return Err(Error::Stopped),
            }
        }
        tracing::info!("starting message engine");

        let incoming_rx = self
            .inner
            .incoming_rx
            .lock()
            .take()
            .ok_or(Error::AlreadyStarted)?;
        let outgoing_rx = self
            .inner
            .outgoing_rx
            .lock()
            .take()
            .ok_or(Error::AlreadyStarted)?;

        let mut workers = self.workers.lock();
        workers.push(tokio::spawn(inbound_worker(
            self.inner.clone(),
            incoming_rx,
            self.shutdown.subscribe(),
        )));
        workers.push(tokio::spawn(outbound_worker(
            self.inner.clone(),
            outgoing_rx,
            self.shutdown.subscribe(),
        )));
        workers.push(tokio::spawn(sweep_worker(
            self.inner.clone(),
            self.shutdown.subscribe(),
        )));

        tracing::info!("message engine started");
        Ok(())
    }

    /// Signal shutdown and wait for every worker to drain. Callable once.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            match *state {
                EngineState::Running => *state = EngineState::Stopping,
                _ => return Err(Error::Stopped),
            }
        }
        tracing::info!("stopping message engine");

        let _ = self.shutdown.send(true);
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "engine worker terminated abnormally");
            }
        }

        *self.inner.state.write() = EngineState::Stopped;
        tracing::info!("message engine stopped");
        Ok(())
    }

    /// Build, sign, and enqueue a message for delivery.
    ///
    /// If a chain key is registered for `to`, the content is encrypted first
    /// and the envelope is marked accordingly; the signature always covers
    /// the content as transmitted. Non-blocking: a full outgoing queue
    /// surfaces [`Error::QueueFull`].
    pub fn send(&self, to: &str, content: &[u8], kind: MessageKind) -> Result<()> {
        if *self.inner.state.read() != EngineState::Running {
            return Err(Error::Stopped);
        }

        let mut message = Message::new(self.inner.identity.did(), to, content.to_vec(), kind);

        let chain_key = self.inner.chain_keys.read().get(to).cloned();
        if let Some(key) = chain_key {
            message.content = self.inner.session.encrypt_message(&message.content, &*key)?;
            message.encrypted = true;
        }

        envelope::sign(&mut message, self.inner.identity.as_ref())?;

        self.inner.outgoing_tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::Stopped,
        })
    }

    /// Register the handler for one message kind, replacing any previous one.
    pub fn register_handler(&self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.inner.handlers.write().insert(kind, handler);
    }

    /// Install the AEAD chain key used with `peer`: encrypt on send,
    /// decrypt on receive. Typically the X3DH session secret.
    pub fn set_chain_key(&self, peer: &str, key: [u8; 32]) {
        self.inner
            .chain_keys
            .write()
            .insert(peer.to_string(), Zeroizing::new(key));
    }

    /// Send a file to a connected peer over a dedicated file stream.
    /// Returns the transfer id; progress is visible via [`transfers`](Self::transfers).
    pub async fn send_file(&self, peer: &str, path: &Path) -> Result<String> {
        if *self.inner.state.read() != EngineState::Running {
            return Err(Error::Stopped);
        }
        let stream = self
            .inner
            .transport
            .open_stream(peer, protocol_ids::FILE)
            .await?;
        transfer::send_file(&self.inner.transfers, &self.inner.config, stream, peer, path).await
    }

    /// Run one offline-delivery pass immediately, outside the sweeper's
    /// regular cadence.
    pub async fn sweep_offline(&self) {
        sweep(&self.inner).await;
    }

    /// The session crypto instance backing this engine (X3DH, chain keys).
    pub fn session(&self) -> &SessionCrypto {
        &self.inner.session
    }

    /// Snapshot handle onto the file-transfer registry.
    pub fn transfers(&self) -> TransferRegistry {
        self.inner.transfers.clone()
    }

    /// Queued offline messages for one recipient.
    pub fn offline_pending(&self, peer: &str) -> usize {
        self.inner.offline.pending_for(peer)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.read()
    }
}

// ============================================================================
// STREAM HANDLERS
// ============================================================================

fn install_stream_handlers(inner: &Arc<EngineInner>) {
    // Handlers hold weak references: the transport outliving the engine must
    // not keep the engine alive, and dropping the engine detaches them.
    let message_inner: Weak<EngineInner> = Arc::downgrade(inner);
    inner.transport.set_stream_handler(
        protocol_ids::MESSAGE,
        Arc::new(move |incoming| {
            if let Some(inner) = message_inner.upgrade() {
                tokio::spawn(handle_message_stream(inner, incoming));
            }
        }),
    );

    let file_inner: Weak<EngineInner> = Arc::downgrade(inner);
    inner.transport.set_stream_handler(
        protocol_ids::FILE,
        Arc::new(move |incoming| {
            if let Some(inner) = file_inner.upgrade() {
                tokio::spawn(handle_file_stream(inner, incoming));
            }
        }),
    );

    inner.transport.set_stream_handler(
        protocol_ids::GROUP,
        Arc::new(|incoming: IncomingStream| {
            tracing::debug!(peer = %incoming.peer, "group protocol stream received, closing (reserved)");
        }),
    );
}

async fn handle_message_stream(inner: Arc<EngineInner>, mut incoming: IncomingStream) {
    let peer = incoming.peer.clone();
    tracing::debug!(peer = %peer, "handling message stream");
    if let Err(e) = process_message_stream(&inner, &mut incoming).await {
        tracing::warn!(peer = %peer, error = %e, "dropping inbound frame");
    }
    // The stream closes when `incoming` drops here, on every path.
}

async fn process_message_stream(inner: &EngineInner, incoming: &mut IncomingStream) -> Result<()> {
    let payload = frame::read_frame(&mut incoming.io, inner.config.max_message_size).await?;
    let mut message: Message = serde_json::from_slice(&payload)?;

    envelope::verify(&message)?;

    if message.encrypted {
        let chain_key = inner.chain_keys.read().get(&message.from).cloned();
        let Some(key) = chain_key else {
            return Err(Error::DecryptFailed);
        };
        message.content = inner.session.decrypt_message(&message.content, &*key)?;
        message.encrypted = false;
    }

    tracing::info!(
        message_id = %message.id,
        from = %message.from,
        kind = %message.kind,
        size = payload.len(),
        "message received"
    );

    match inner.incoming_tx.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(message)) => {
            tracing::warn!(message_id = %message.id, "incoming message queue full, dropping message");
        }
        Err(TrySendError::Closed(_)) => {}
    }
    Ok(())
}

async fn handle_file_stream(inner: Arc<EngineInner>, incoming: IncomingStream) {
    tracing::debug!(peer = %incoming.peer, "handling file stream");
    // Failures are logged and the session marked failed inside the transfer
    // module; nothing propagates past the stream boundary.
    let _ = transfer::handle_incoming(
        &inner.transfers,
        &inner.config,
        incoming.io,
        &incoming.peer,
    )
    .await;
}

// ============================================================================
// WORKERS
// ============================================================================

async fn inbound_worker(
    inner: Arc<EngineInner>,
    mut rx: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            received = rx.recv() => match received {
                Some(message) => dispatch_incoming(&inner, message).await,
                None => return,
            },
        }
    }
}

async fn dispatch_incoming(inner: &EngineInner, message: Message) {
    let handler = inner.handlers.read().get(&message.kind).cloned();
    match handler {
        Some(handler) => {
            if let Err(e) = handler.handle_message(&message).await {
                tracing::error!(message_id = %message.id, error = %e, "message handler failed");
            }
        }
        None => {
            tracing::warn!(kind = %message.kind, "no handler registered for message kind");
        }
    }
}

async fn outbound_worker(
    inner: Arc<EngineInner>,
    mut rx: mpsc::Receiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            received = rx.recv() => match received {
                Some(message) => handle_outgoing(&inner, message).await,
                None => return,
            },
        }
    }
}

async fn handle_outgoing(inner: &EngineInner, message: Message) {
    let peer = message.to.clone();

    if inner.transport.connectedness(&peer) != Connectedness::Connected {
        tracing::info!(
            peer = %peer,
            message_id = %message.id,
            "peer not connected, storing message for offline delivery"
        );
        inner.offline.store(message);
        return;
    }

    match deliver(inner, &message).await {
        Ok(()) => {
            tracing::info!(message_id = %message.id, to = %peer, "message sent");
        }
        Err(e) => {
            tracing::warn!(
                message_id = %message.id,
                error = %e,
                "delivery failed, storing message for offline delivery"
            );
            inner.offline.store(message);
        }
    }
}

/// Open a message stream to the recipient and write one framed envelope,
/// bounded by the per-message timeout.
async fn deliver(inner: &EngineInner, message: &Message) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    let delivery = async {
        let mut stream = inner
            .transport
            .open_stream(&message.to, protocol_ids::MESSAGE)
            .await?;
        frame::write_frame(&mut stream, &payload, inner.config.max_message_size).await?;
        stream.shutdown().await?;
        Ok(())
    };
    tokio::time::timeout(inner.config.message_timeout, delivery)
        .await
        .map_err(|_| Error::StreamOpenFailed("message delivery timed out".into()))?
}

async fn sweep_worker(inner: Arc<EngineInner>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.config.sweep_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => sweep(&inner).await,
        }
    }
}

/// One redelivery pass: for every reconnected recipient, attempt each queued
/// entry in insertion order. Failures increment the attempt counter and
/// requeue; the store drops exhausted and expired entries. The store file is
/// rewritten once at the end of the pass, after every drained entry has been
/// delivered or requeued, so a crash mid-pass leaves the previous on-disk
/// queue intact and redelivers rather than losing.
async fn sweep(inner: &EngineInner) {
    let mut processed = false;
    for peer in inner.offline.recipients() {
        if inner.transport.connectedness(&peer) != Connectedness::Connected {
            continue;
        }
        processed = true;
        for mut entry in inner.offline.drain_due(&peer) {
            match deliver(inner, &entry.message).await {
                Ok(()) => {
                    tracing::info!(message_id = %entry.message.id, "offline message delivered");
                }
                Err(e) => {
                    entry.attempts += 1;
                    tracing::debug!(
                        message_id = %entry.message.id,
                        attempts = entry.attempts,
                        error = %e,
                        "offline delivery attempt failed"
                    );
                    inner.offline.requeue(entry);
                }
            }
        }
    }
    if processed {
        inner.offline.persist();
    }
}
