//! # Core Configuration
//!
//! Policy knobs for the messaging core: directories, channel capacities,
//! timeouts, retry bounds, and wire-size limits. Every value has the
//! production default; tests override `config_dir` with a temp directory and
//! shrink the intervals.

use std::path::PathBuf;
use std::time::Duration;

use crate::wire;

/// Configuration for the messaging core
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root directory for persisted state (default `~/.xelvra`)
    pub config_dir: PathBuf,

    /// Capacity of the incoming and outgoing message channels
    pub channel_capacity: usize,

    /// Interval between offline-delivery sweeps
    pub sweep_interval: Duration,

    /// Delivery attempts before an offline entry is dropped
    pub max_delivery_attempts: u32,

    /// Lifetime of an offline entry before it expires
    pub offline_expiry: Duration,

    /// Soft cap on queued offline entries per recipient; the oldest entry is
    /// dropped when a recipient's queue is full
    pub offline_soft_cap: usize,

    /// Deadline for a single outbound message delivery
    pub message_timeout: Duration,

    /// Deadline for a complete file transfer
    pub file_timeout: Duration,

    /// Sliding window for AEAD nonce replay detection
    pub nonce_window: Duration,

    /// Maximum payload size on the message protocol
    pub max_message_size: usize,

    /// Maximum size of a file-transfer control frame
    pub max_control_frame: usize,

    /// Maximum total file size accepted for transfer
    pub max_file_size: u64,

    /// Chunk size used when sending files
    pub chunk_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_dir: home.join(".xelvra"),
            channel_capacity: 100,
            sweep_interval: Duration::from_secs(30),
            max_delivery_attempts: 5,
            offline_expiry: Duration::from_secs(7 * 24 * 60 * 60),
            offline_soft_cap: 256,
            message_timeout: Duration::from_secs(30),
            file_timeout: Duration::from_secs(5 * 60),
            nonce_window: Duration::from_secs(5 * 60),
            max_message_size: wire::MAX_MESSAGE_SIZE,
            max_control_frame: wire::MAX_CONTROL_FRAME_SIZE,
            max_file_size: wire::MAX_FILE_SIZE,
            chunk_size: wire::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl CoreConfig {
    /// Directory holding the offline message store
    pub fn offline_dir(&self) -> PathBuf {
        self.config_dir.join("offline_messages")
    }

    /// Path of the offline message store file
    pub fn offline_store_path(&self) -> PathBuf {
        self.offline_dir().join("messages.json")
    }

    /// Directory where received files are materialized
    pub fn downloads_dir(&self) -> PathBuf {
        self.config_dir.join("downloads")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_protocol() {
        let config = CoreConfig::default();
        assert_eq!(config.channel_capacity, 100);
        assert_eq!(config.max_message_size, 64 * 1024);
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.max_delivery_attempts, 5);
    }

    #[test]
    fn derived_paths_live_under_config_dir() {
        let mut config = CoreConfig::default();
        config.config_dir = PathBuf::from("/tmp/xelvra-test");
        assert_eq!(
            config.offline_store_path(),
            PathBuf::from("/tmp/xelvra-test/offline_messages/messages.json")
        );
        assert_eq!(
            config.downloads_dir(),
            PathBuf::from("/tmp/xelvra-test/downloads")
        );
    }
}
