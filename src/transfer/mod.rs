//! # File Transfer
//!
//! Chunked file transfer over a dedicated per-transfer stream.
//!
//! ## Protocol
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      FILE TRANSFER PROTOCOL                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Initiator                              Receiver                        │
//! │  ─────────                              ────────                        │
//! │                                                                         │
//! │  1. request (metadata) ───────────────►  validate limits                │
//! │                         ◄─────────────  2. accept / reject (reason?)    │
//! │  3. chunk (id, data) ─────────────────►  append, track progress         │
//! │     … repeated in order …                                               │
//! │  4. complete ─────────────────────────►  5. verify SHA-256 vs metadata  │
//! │                                                                         │
//! │  Every frame: BE-u32 length ‖ JSON FileControlFrame (magic-checked)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The whole transfer runs on the one stream the initiator opened, so frames
//! cannot race across streams and the receiver never has to guess which
//! transfer a chunk belongs to.
//!
//! On `complete` the receiver hashes what it wrote and compares against the
//! offered metadata; a mismatch deletes the partial file and fails the
//! transfer. Limit violations, wrong magic, and out-of-order frames are
//! fatal to the transfer but never to the engine.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::wire::{base64_bytes_opt, frame, MAX_CONTROL_FRAME_SIZE};

/// Magic number carried by every control frame ("XELV")
pub const FILE_TRANSFER_MAGIC: u32 = 0x5845_4C56;

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Tag of a control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// Offer to send a file
    Request,
    /// Receiver accepts the offer
    Accept,
    /// Receiver declines; the transfer aborts
    Reject,
    /// One slab of file data
    Chunk,
    /// Initiator has sent every chunk
    Complete,
}

/// Descriptor of the offered file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Transfer identifier (UUID v4)
    pub id: String,
    /// File name; the receiver materializes `downloads/<name>`
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    /// MIME type hint
    pub mime: String,
    /// Hex SHA-256 of the complete file
    pub sha256: String,
    /// Slab size the initiator will use
    pub chunk_size: usize,
}

/// One frame of the file sub-protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileControlFrame {
    /// Always [`FILE_TRANSFER_MAGIC`]
    pub magic: u32,
    /// Frame tag
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Chunk ordinal (chunk frames)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<u64>,
    /// Chunk payload (chunk frames)
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes_opt")]
    pub data: Option<Vec<u8>>,
    /// Why the receiver declined (reject frames)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// File descriptor (request frames)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
}

impl FileControlFrame {
    fn bare(frame_type: FrameType) -> Self {
        Self {
            magic: FILE_TRANSFER_MAGIC,
            frame_type,
            chunk_id: None,
            data: None,
            reason: None,
            metadata: None,
        }
    }

    /// An offer frame.
    pub fn request(metadata: FileMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Self::bare(FrameType::Request)
        }
    }

    /// An acceptance frame.
    pub fn accept() -> Self {
        Self::bare(FrameType::Accept)
    }

    /// A rejection frame.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::bare(FrameType::Reject)
        }
    }

    /// A data frame.
    pub fn chunk(chunk_id: u64, data: Vec<u8>) -> Self {
        Self {
            chunk_id: Some(chunk_id),
            data: Some(data),
            ..Self::bare(FrameType::Chunk)
        }
    }

    /// The end-of-data frame.
    pub fn complete() -> Self {
        Self::bare(FrameType::Complete)
    }
}

/// Write one control frame.
pub async fn write_control_frame<W>(io: &mut W, frame_value: &FileControlFrame, limit: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(frame_value)?;
    frame::write_frame(io, &payload, limit).await
}

/// Read and validate one control frame.
pub async fn read_control_frame<R>(io: &mut R, limit: usize) -> Result<FileControlFrame>
where
    R: AsyncRead + Unpin,
{
    let payload = frame::read_frame(io, limit).await?;
    let frame_value: FileControlFrame = serde_json::from_slice(&payload)?;
    if frame_value.magic != FILE_TRANSFER_MAGIC {
        return Err(Error::BadMagic {
            magic: frame_value.magic,
        });
    }
    Ok(frame_value)
}

/// Frame limit during the chunk phase: base64-expanded slab plus JSON
/// headroom. Control frames fit comfortably under this as well.
fn chunk_frame_limit(chunk_size: usize) -> usize {
    (chunk_size + 2) / 3 * 4 + MAX_CONTROL_FRAME_SIZE
}

// ============================================================================
// SESSIONS
// ============================================================================

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Offered, not yet accepted
    Pending,
    /// Chunks are flowing
    Active,
    /// All bytes delivered and verified
    Completed,
    /// Aborted with an error
    Failed,
    /// Cancelled locally
    Cancelled,
}

impl TransferStatus {
    /// Whether the transfer can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Direction of a transfer relative to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// We are receiving
    Inbound,
    /// We are sending
    Outbound,
}

/// Tracked state of one transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    /// Transfer identifier (same as `metadata.id`)
    pub id: String,
    /// Remote peer
    pub peer: String,
    /// The offered file
    pub metadata: FileMetadata,
    /// Inbound or outbound
    pub direction: TransferDirection,
    /// Current lifecycle state
    pub status: TransferStatus,
    /// Chunk ordinals transferred so far
    pub chunks_acked: HashSet<u64>,
    /// Bytes transferred so far
    pub bytes_done: u64,
    /// When the transfer was registered
    pub started_at: DateTime<Utc>,
    /// When the transfer reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure description when `status` is `Failed`
    pub error: Option<String>,
}

impl TransferSession {
    fn new(peer: &str, metadata: FileMetadata, direction: TransferDirection) -> Self {
        Self {
            id: metadata.id.clone(),
            peer: peer.to_string(),
            metadata,
            direction,
            status: TransferStatus::Pending,
            chunks_acked: HashSet::new(),
            bytes_done: 0,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    /// Fraction of the file transferred, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.metadata.size == 0 {
            return 1.0;
        }
        self.bytes_done as f64 / self.metadata.size as f64
    }
}

/// Shared registry of transfer sessions, keyed by transfer id.
#[derive(Clone, Default)]
pub struct TransferRegistry {
    inner: Arc<RwLock<HashMap<String, TransferSession>>>,
}

impl TransferRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, session: TransferSession) {
        self.inner.write().insert(session.id.clone(), session);
    }

    /// Snapshot of one session.
    pub fn get(&self, id: &str) -> Option<TransferSession> {
        self.inner.read().get(id).cloned()
    }

    /// Current status of one session.
    pub fn status(&self, id: &str) -> Option<TransferStatus> {
        self.inner.read().get(id).map(|t| t.status)
    }

    /// Non-terminal sessions involving `peer`.
    pub fn active_for_peer(&self, peer: &str) -> Vec<TransferSession> {
        self.inner
            .read()
            .values()
            .filter(|t| t.peer == peer && !t.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Request cancellation of a transfer. The owning task notices at its
    /// next chunk boundary. Returns false for unknown or finished transfers.
    pub fn cancel(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.get_mut(id) {
            Some(session) if !session.status.is_terminal() => {
                session.status = TransferStatus::Cancelled;
                session.ended_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    fn with_mut(&self, id: &str, update: impl FnOnce(&mut TransferSession)) {
        if let Some(session) = self.inner.write().get_mut(id) {
            update(session);
        }
    }

    fn mark_active(&self, id: &str) {
        self.with_mut(id, |s| s.status = TransferStatus::Active);
    }

    fn mark_completed(&self, id: &str) {
        self.with_mut(id, |s| {
            s.status = TransferStatus::Completed;
            s.ended_at = Some(Utc::now());
        });
    }

    fn mark_failed(&self, id: &str, error: String) {
        self.with_mut(id, |s| {
            if !s.status.is_terminal() {
                s.status = TransferStatus::Failed;
            }
            s.ended_at = Some(Utc::now());
            s.error = Some(error);
        });
    }
}

// ============================================================================
// RECEIVER
// ============================================================================

/// Current inbound policy: accept every offer.
///
/// TODO(policy): route this through a prompt or per-peer allowlist before the
/// auto-accept behavior is exposed to untrusted networks.
fn accept_policy(_peer: &str, _metadata: &FileMetadata) -> bool {
    true
}

#[derive(Default)]
struct ReceiveState {
    transfer_id: Option<String>,
    dest: Option<PathBuf>,
}

/// Drive the receiver side of one inbound file stream to completion.
///
/// Applies the transfer deadline; on any failure the partial file is deleted
/// and the session is marked failed.
pub async fn handle_incoming<S>(
    registry: &TransferRegistry,
    config: &CoreConfig,
    mut io: S,
    peer: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut state = ReceiveState::default();
    let outcome = match tokio::time::timeout(
        config.file_timeout,
        receive_loop(registry, config, &mut io, peer, &mut state),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::TransferExpired),
    };

    if let Err(ref e) = outcome {
        if let Some(id) = &state.transfer_id {
            registry.mark_failed(id, e.to_string());
        }
        if let Some(dest) = &state.dest {
            let _ = tokio::fs::remove_file(dest).await;
        }
        tracing::warn!(peer, error = %e, "inbound file transfer failed");
    }
    outcome
}

async fn receive_loop<S>(
    registry: &TransferRegistry,
    config: &CoreConfig,
    io: &mut S,
    peer: &str,
    state: &mut ReceiveState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let offer = read_control_frame(io, config.max_control_frame).await?;
    if offer.frame_type != FrameType::Request {
        return Err(Error::TransferAborted("expected request frame".into()));
    }
    let metadata = offer
        .metadata
        .ok_or_else(|| Error::TransferAborted("request frame missing metadata".into()))?;

    if let Err(reason) = validate_offer(config, &metadata) {
        write_control_frame(io, &FileControlFrame::reject(reason.clone()), config.max_control_frame)
            .await?;
        return Err(Error::TransferAborted(reason));
    }
    let file_name = safe_file_name(&metadata.name)
        .ok_or_else(|| Error::TransferAborted("unusable file name in offer".into()))?;

    if !accept_policy(peer, &metadata) {
        write_control_frame(
            io,
            &FileControlFrame::reject("transfer declined"),
            config.max_control_frame,
        )
        .await?;
        return Ok(());
    }

    tracing::info!(
        peer,
        file_name = %metadata.name,
        file_size = metadata.size,
        "received file transfer request"
    );

    let transfer_id = metadata.id.clone();
    registry.insert(TransferSession::new(peer, metadata.clone(), TransferDirection::Inbound));
    state.transfer_id = Some(transfer_id.clone());

    write_control_frame(io, &FileControlFrame::accept(), config.max_control_frame).await?;

    let downloads = config.downloads_dir();
    tokio::fs::create_dir_all(&downloads).await?;
    let dest = downloads.join(file_name);
    let mut file = tokio::fs::File::create(&dest).await?;
    state.dest = Some(dest.clone());
    registry.mark_active(&transfer_id);

    tracing::info!(transfer_id = %transfer_id, dest = %dest.display(), "file transfer accepted, receiving");

    let mut hasher = Sha256::new();
    let mut chunks: HashSet<u64> = HashSet::new();
    let mut bytes_done: u64 = 0;
    let frame_limit = chunk_frame_limit(metadata.chunk_size);

    loop {
        if registry.status(&transfer_id) == Some(TransferStatus::Cancelled) {
            return Err(Error::TransferAborted("transfer cancelled".into()));
        }

        let next = read_control_frame(io, frame_limit).await?;
        match next.frame_type {
            FrameType::Chunk => {
                let chunk_id = next
                    .chunk_id
                    .ok_or_else(|| Error::TransferAborted("chunk frame missing chunk_id".into()))?;
                let data = next
                    .data
                    .ok_or_else(|| Error::TransferAborted("chunk frame missing data".into()))?;
                if data.len() > metadata.chunk_size {
                    return Err(Error::TransferAborted("chunk larger than negotiated size".into()));
                }
                bytes_done += data.len() as u64;
                if bytes_done > metadata.size {
                    return Err(Error::TransferAborted("more data than offered".into()));
                }

                hasher.update(&data);
                file.write_all(&data).await?;
                chunks.insert(chunk_id);

                registry.with_mut(&transfer_id, |s| {
                    s.bytes_done = bytes_done;
                    s.chunks_acked.insert(chunk_id);
                });
                tracing::debug!(
                    transfer_id = %transfer_id,
                    chunk_id,
                    chunk_size = data.len(),
                    progress = %format!("{:.1}%", bytes_done as f64 / metadata.size.max(1) as f64 * 100.0),
                    "received file chunk"
                );
            }
            FrameType::Complete => {
                file.flush().await?;
                drop(file);

                let expected_chunks = metadata.size.div_ceil(metadata.chunk_size as u64);
                if bytes_done != metadata.size || chunks.len() as u64 != expected_chunks {
                    return Err(Error::TransferAborted("transfer completed with missing chunks".into()));
                }

                let actual = hex::encode(hasher.finalize());
                let expected = metadata.sha256.to_lowercase();
                if actual != expected {
                    return Err(Error::IntegrityMismatch { expected, actual });
                }

                registry.mark_completed(&transfer_id);
                tracing::info!(
                    transfer_id = %transfer_id,
                    file_name = %metadata.name,
                    bytes_received = bytes_done,
                    "file transfer completed"
                );
                return Ok(());
            }
            _ => {
                return Err(Error::TransferAborted("unexpected frame during transfer".into()));
            }
        }
    }
}

fn validate_offer(config: &CoreConfig, metadata: &FileMetadata) -> std::result::Result<(), String> {
    if metadata.size > config.max_file_size {
        return Err(format!(
            "file size {} exceeds limit {}",
            metadata.size, config.max_file_size
        ));
    }
    if metadata.chunk_size == 0 || metadata.chunk_size > config.chunk_size {
        return Err(format!(
            "chunk size {} outside accepted range (1..={})",
            metadata.chunk_size, config.chunk_size
        ));
    }
    Ok(())
}

/// Strip any path components from an offered name.
fn safe_file_name(offered: &str) -> Option<&std::ffi::OsStr> {
    let name = Path::new(offered).file_name()?;
    if name == ".." || offered.is_empty() {
        return None;
    }
    Some(name)
}

// ============================================================================
// INITIATOR
// ============================================================================

/// Send `path` to `peer` over an already-open file stream.
///
/// Returns the transfer id. Applies the transfer deadline; failures mark the
/// session failed (the source file is left untouched).
pub async fn send_file<S>(
    registry: &TransferRegistry,
    config: &CoreConfig,
    mut io: S,
    peer: &str,
    path: &Path,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut transfer_id: Option<String> = None;
    let outcome = match tokio::time::timeout(
        config.file_timeout,
        send_loop(registry, config, &mut io, peer, path, &mut transfer_id),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::TransferExpired),
    };

    match outcome {
        Ok(id) => Ok(id),
        Err(e) => {
            if let Some(id) = &transfer_id {
                registry.mark_failed(id, e.to_string());
            }
            tracing::warn!(peer, error = %e, "outbound file transfer failed");
            Err(e)
        }
    }
}

async fn send_loop<S>(
    registry: &TransferRegistry,
    config: &CoreConfig,
    io: &mut S,
    peer: &str,
    path: &Path,
    transfer_id: &mut Option<String>,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::TransferAborted("source path has no usable file name".into()))?;
    let size = tokio::fs::metadata(path).await?.len();
    if size > config.max_file_size {
        return Err(Error::TransferAborted(format!(
            "file size {size} exceeds limit {}",
            config.max_file_size
        )));
    }

    // First pass: hash the file so the receiver can verify what it got.
    let mut hasher = Sha256::new();
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; config.chunk_size];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let metadata = FileMetadata {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        size,
        mime: "application/octet-stream".to_string(),
        sha256: hex::encode(hasher.finalize()),
        chunk_size: config.chunk_size,
    };
    let id = metadata.id.clone();
    *transfer_id = Some(id.clone());

    tracing::info!(peer, file_name = name, file_size = size, transfer_id = %id, "initiating file transfer");
    registry.insert(TransferSession::new(peer, metadata.clone(), TransferDirection::Outbound));

    write_control_frame(io, &FileControlFrame::request(metadata), config.max_control_frame).await?;

    let response = read_control_frame(io, config.max_control_frame).await?;
    match response.frame_type {
        FrameType::Accept => {}
        FrameType::Reject => {
            let reason = response
                .reason
                .unwrap_or_else(|| "rejected by peer".to_string());
            return Err(Error::TransferAborted(reason));
        }
        _ => {
            return Err(Error::TransferAborted("unexpected response to transfer request".into()));
        }
    }
    registry.mark_active(&id);

    // Second pass: stream the chunks.
    let mut file = tokio::fs::File::open(path).await?;
    let frame_limit = chunk_frame_limit(config.chunk_size);
    let mut chunk_id: u64 = 0;
    let mut sent: u64 = 0;

    while sent < size {
        if registry.status(&id) == Some(TransferStatus::Cancelled) {
            return Err(Error::TransferAborted("transfer cancelled".into()));
        }

        let slab = usize::try_from((size - sent).min(config.chunk_size as u64))
            .unwrap_or(config.chunk_size);
        file.read_exact(&mut buf[..slab]).await?;

        write_control_frame(
            io,
            &FileControlFrame::chunk(chunk_id, buf[..slab].to_vec()),
            frame_limit,
        )
        .await?;

        sent += slab as u64;
        registry.with_mut(&id, |s| {
            s.bytes_done = sent;
            s.chunks_acked.insert(chunk_id);
        });
        tracing::debug!(transfer_id = %id, chunk_id, chunk_size = slab, "sent file chunk");
        chunk_id += 1;
    }

    write_control_frame(io, &FileControlFrame::complete(), config.max_control_frame).await?;
    registry.mark_completed(&id);
    tracing::info!(transfer_id = %id, bytes_sent = sent, "file transfer sent");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> CoreConfig {
        CoreConfig {
            config_dir: dir.to_path_buf(),
            ..CoreConfig::default()
        }
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn transfer_happy_path_delivers_and_verifies() {
        let sender_dir = tempfile::tempdir().unwrap();
        let receiver_dir = tempfile::tempdir().unwrap();
        let sender_config = test_config(sender_dir.path());
        let receiver_config = test_config(receiver_dir.path());

        let content = patterned(150 * 1024);
        let source = sender_dir.path().join("photo.bin");
        std::fs::write(&source, &content).unwrap();

        let (initiator_io, receiver_io) = tokio::io::duplex(512 * 1024);
        let send_registry = TransferRegistry::new();
        let recv_registry = TransferRegistry::new();

        let recv_registry_task = recv_registry.clone();
        let receiver = tokio::spawn(async move {
            handle_incoming(&recv_registry_task, &receiver_config, receiver_io, "did:key:zAlice").await
        });

        let id = send_file(&send_registry, &sender_config, initiator_io, "did:key:zBob", &source)
            .await
            .unwrap();
        receiver.await.unwrap().unwrap();

        // Three chunks: 65536 + 65536 + 22528
        let sent = send_registry.get(&id).unwrap();
        assert_eq!(sent.status, TransferStatus::Completed);
        assert_eq!(sent.chunks_acked.len(), 3);
        assert_eq!(sent.bytes_done, content.len() as u64);

        let received = recv_registry.get(&id).unwrap();
        assert_eq!(received.status, TransferStatus::Completed);
        assert!((received.progress() - 1.0).abs() < f64::EPSILON);

        let materialized =
            std::fs::read(receiver_dir.path().join("downloads").join("photo.bin")).unwrap();
        assert_eq!(materialized, content);
    }

    #[tokio::test]
    async fn integrity_mismatch_deletes_partial_file() {
        let receiver_dir = tempfile::tempdir().unwrap();
        let receiver_config = test_config(receiver_dir.path());

        let (mut initiator_io, receiver_io) = tokio::io::duplex(512 * 1024);
        let registry = TransferRegistry::new();

        let registry_task = registry.clone();
        let receiver = tokio::spawn(async move {
            handle_incoming(&registry_task, &receiver_config, receiver_io, "did:key:zAlice").await
        });

        let metadata = FileMetadata {
            id: "transfer-1".into(),
            name: "notes.txt".into(),
            size: 4,
            mime: "text/plain".into(),
            sha256: hex::encode(Sha256::digest(b"good")),
            chunk_size: 64 * 1024,
        };
        write_control_frame(&mut initiator_io, &FileControlFrame::request(metadata), 4096)
            .await
            .unwrap();
        let response = read_control_frame(&mut initiator_io, 4096).await.unwrap();
        assert_eq!(response.frame_type, FrameType::Accept);

        write_control_frame(
            &mut initiator_io,
            &FileControlFrame::chunk(0, b"evil".to_vec()),
            128 * 1024,
        )
        .await
        .unwrap();
        write_control_frame(&mut initiator_io, &FileControlFrame::complete(), 4096)
            .await
            .unwrap();

        let err = receiver.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch { .. }));

        assert_eq!(registry.status("transfer-1"), Some(TransferStatus::Failed));
        assert!(!receiver_dir
            .path()
            .join("downloads")
            .join("notes.txt")
            .exists());
    }

    #[tokio::test]
    async fn oversized_offer_is_rejected() {
        let receiver_dir = tempfile::tempdir().unwrap();
        let receiver_config = test_config(receiver_dir.path());

        let (mut initiator_io, receiver_io) = tokio::io::duplex(64 * 1024);
        let registry = TransferRegistry::new();

        let registry_task = registry.clone();
        let receiver = tokio::spawn(async move {
            handle_incoming(&registry_task, &receiver_config, receiver_io, "did:key:zAlice").await
        });

        let metadata = FileMetadata {
            id: "transfer-2".into(),
            name: "huge.iso".into(),
            size: 200 * 1024 * 1024,
            mime: "application/octet-stream".into(),
            sha256: String::new(),
            chunk_size: 64 * 1024,
        };
        write_control_frame(&mut initiator_io, &FileControlFrame::request(metadata), 4096)
            .await
            .unwrap();

        let response = read_control_frame(&mut initiator_io, 4096).await.unwrap();
        assert_eq!(response.frame_type, FrameType::Reject);
        assert!(response.reason.unwrap().contains("exceeds limit"));
        assert!(matches!(
            receiver.await.unwrap().unwrap_err(),
            Error::TransferAborted(_)
        ));
    }

    #[tokio::test]
    async fn wrong_magic_is_fatal() {
        let receiver_dir = tempfile::tempdir().unwrap();
        let receiver_config = test_config(receiver_dir.path());

        let (mut initiator_io, receiver_io) = tokio::io::duplex(64 * 1024);
        let registry = TransferRegistry::new();

        let receiver = tokio::spawn(async move {
            handle_incoming(&registry, &receiver_config, receiver_io, "did:key:zAlice").await
        });

        let mut bogus = FileControlFrame::accept();
        bogus.magic = 0xDEAD_BEEF;
        write_control_frame(&mut initiator_io, &bogus, 4096).await.unwrap();

        assert!(matches!(
            receiver.await.unwrap().unwrap_err(),
            Error::BadMagic { magic: 0xDEAD_BEEF }
        ));
    }

    #[tokio::test]
    async fn offered_names_cannot_escape_downloads() {
        assert!(safe_file_name("../../etc/passwd").is_some_and(|n| n == "passwd"));
        assert!(safe_file_name("..").is_none());
        assert!(safe_file_name("").is_none());
        assert!(safe_file_name("notes.txt").is_some_and(|n| n == "notes.txt"));
    }

    #[test]
    fn control_frame_wire_names_are_fixed() {
        let frame_value = FileControlFrame::chunk(7, vec![1, 2, 3]);
        let value: serde_json::Value = serde_json::to_value(&frame_value).unwrap();
        assert_eq!(value["magic"], FILE_TRANSFER_MAGIC);
        assert_eq!(value["type"], "chunk");
        assert_eq!(value["chunk_id"], 7);
        assert!(value["data"].is_string());
    }
}
