//! # Offline Store
//!
//! Durable per-recipient queues of undelivered messages.
//!
//! A message lands here when its recipient is unreachable at send time. The
//! engine's sweeper drains queues for reconnected peers; each entry carries
//! an attempt counter (dropped after 5 failures) and an expiry (7 days).
//!
//! The whole map is persisted as one JSON file, `mode 0600`, rewritten via
//! write-temp-then-rename while the write lock is held, so the in-memory and
//! on-disk views stay coherent and a crash never leaves a torn file.
//! Enqueueing persists immediately; sweep-time removals stay in memory until
//! [`OfflineStore::persist`] runs once at the end of the pass. The on-disk
//! queue therefore always holds a superset of the undelivered entries:
//! a crash mid-sweep redelivers, it never loses. Delivery is at-most-once
//! per attempt but not exactly-once across crashes; if the process dies
//! between delivery and the end-of-pass rewrite, the recipient sees a
//! duplicate on the next sweep, so inbound handlers must be idempotent on
//! `message.id`.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::wire::Message;

/// A message queued for a currently unreachable recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineEntry {
    /// The undelivered message
    pub message: Message,
    /// Failed delivery attempts so far
    pub attempts: u32,
    /// When the entry was queued
    pub created_at: DateTime<Utc>,
    /// When the entry lapses
    pub expires_at: DateTime<Utc>,
}

/// Recipient-keyed offline message queues with atomic JSON persistence.
pub struct OfflineStore {
    entries: RwLock<HashMap<String, Vec<OfflineEntry>>>,
    path: PathBuf,
    expiry: chrono::Duration,
    soft_cap: usize,
    max_attempts: u32,
}

impl OfflineStore {
    /// Open the store, loading any persisted queues.
    ///
    /// A missing file is a fresh store; a corrupt file is logged and treated
    /// as empty rather than blocking startup.
    pub fn open(config: &CoreConfig) -> Self {
        let dir = config.offline_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::error!(error = %e, dir = %dir.display(), "failed to create offline messages directory");
        }

        let path = config.offline_store_path();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, Vec<OfflineEntry>>>(&bytes)
            {
                Ok(entries) => {
                    let total: usize = entries.values().map(Vec::len).sum();
                    tracing::info!(count = total, "loaded offline messages from disk");
                    entries
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to parse offline messages file");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::error!(error = %e, "failed to read offline messages file");
                HashMap::new()
            }
        };

        Self {
            entries: RwLock::new(entries),
            path,
            expiry: chrono::Duration::from_std(config.offline_expiry)
                .unwrap_or_else(|_| chrono::Duration::days(7)),
            soft_cap: config.offline_soft_cap,
            max_attempts: config.max_delivery_attempts,
        }
    }

    /// Queue a message for later delivery.
    ///
    /// When the recipient's queue is at the soft cap, the oldest entry is
    /// dropped to make room.
    pub fn store(&self, message: Message) {
        let now = Utc::now();
        let recipient = message.to.clone();
        let id = message.id.clone();

        let mut entries = self.entries.write();
        let queue = entries.entry(recipient.clone()).or_default();
        if queue.len() >= self.soft_cap {
            if let Some(evicted) = queue.first() {
                tracing::warn!(
                    recipient = %recipient,
                    evicted = %evicted.message.id,
                    cap = self.soft_cap,
                    "offline queue full, dropping oldest entry"
                );
                queue.remove(0);
            }
        }
        queue.push(OfflineEntry {
            message,
            attempts: 0,
            created_at: now,
            expires_at: now + self.expiry,
        });
        self.write_locked(&entries);

        tracing::info!(message_id = %id, to = %recipient, "message stored for offline delivery");
    }

    /// Recipients that currently have queued messages.
    pub fn recipients(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Remove and return a recipient's deliverable entries, in insertion
    /// order. Expired entries are dropped here, not returned.
    ///
    /// In-memory only: the on-disk queue keeps the entries until
    /// [`persist`](Self::persist) runs after the sweep pass, so a crash
    /// mid-delivery redelivers instead of losing.
    pub fn drain_due(&self, recipient: &str) -> Vec<OfflineEntry> {
        let now = Utc::now();
        let queue = self
            .entries
            .write()
            .remove(recipient)
            .unwrap_or_default();

        let (due, expired): (Vec<_>, Vec<_>) =
            queue.into_iter().partition(|entry| entry.expires_at > now);
        for entry in &expired {
            tracing::info!(message_id = %entry.message.id, "offline message expired");
        }
        due
    }

    /// Put a failed entry back, unless its attempts are exhausted.
    ///
    /// The caller increments `attempts` before requeueing, and runs
    /// [`persist`](Self::persist) once the sweep pass completes.
    pub fn requeue(&self, entry: OfflineEntry) {
        if entry.attempts >= self.max_attempts {
            tracing::warn!(
                message_id = %entry.message.id,
                attempts = entry.attempts,
                "offline message dropped after max delivery attempts"
            );
            return;
        }
        let recipient = entry.message.to.clone();
        self.entries.write().entry(recipient).or_default().push(entry);
    }

    /// Rewrite the store file from the current in-memory state.
    ///
    /// Called once per sweep pass, after every drained entry has either been
    /// delivered or requeued.
    pub fn persist(&self) {
        let entries = self.entries.write();
        self.write_locked(&entries);
    }

    /// Number of entries queued for one recipient.
    pub fn pending_for(&self, recipient: &str) -> usize {
        self.entries.read().get(recipient).map_or(0, Vec::len)
    }

    /// Total queued entries across all recipients.
    pub fn total_pending(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    /// Whether any entries are queued.
    pub fn is_empty(&self) -> bool {
        self.total_pending() == 0
    }

    /// Rewrite the store file while the caller holds the write lock.
    /// Failures keep the in-memory state; the next mutation retries.
    fn write_locked(&self, entries: &HashMap<String, Vec<OfflineEntry>>) {
        if let Err(e) = self.try_write(entries) {
            tracing::error!(error = %e, "failed to persist offline messages");
        }
    }

    fn try_write(&self, entries: &HashMap<String, Vec<OfflineEntry>>) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| Error::PersistenceError(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| Error::PersistenceError(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::PersistenceError(e.to_string()))?;
        }

        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::PersistenceError(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MessageKind;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> CoreConfig {
        CoreConfig {
            config_dir: dir.to_path_buf(),
            ..CoreConfig::default()
        }
    }

    fn message(to: &str, body: &[u8]) -> Message {
        Message::new("did:key:zSender", to, body.to_vec(), MessageKind::Text)
    }

    #[test]
    fn stored_entries_survive_reopen_with_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        {
            let store = OfflineStore::open(&config);
            store.store(message("did:key:zBob", b"m1"));
            let mut entry = store.drain_due("did:key:zBob").remove(0);
            entry.attempts += 1;
            store.requeue(entry);
            store.persist();
        }

        let store = OfflineStore::open(&config);
        assert_eq!(store.pending_for("did:key:zBob"), 1);
        let entries = store.drain_due("did:key:zBob");
        assert_eq!(entries[0].attempts, 1, "attempts must not reset on reload");
    }

    #[test]
    fn drain_alone_leaves_the_disk_queue_intact() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        {
            let store = OfflineStore::open(&config);
            store.store(message("did:key:zBob", b"m1"));
            let drained = store.drain_due("did:key:zBob");
            assert_eq!(drained.len(), 1);
            // No persist: simulates a crash after delivery started.
        }

        // The entry is still on disk, so it is redelivered, never lost.
        let store = OfflineStore::open(&config);
        assert_eq!(store.pending_for("did:key:zBob"), 1);
    }

    #[test]
    fn drain_preserves_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = OfflineStore::open(&test_config(dir.path()));

        store.store(message("did:key:zBob", b"m1"));
        store.store(message("did:key:zBob", b"m2"));

        let drained = store.drain_due("did:key:zBob");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message.content, b"m1");
        assert_eq!(drained[1].message.content, b"m2");
        assert!(store.is_empty());
    }

    #[test]
    fn empty_store_persists_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = OfflineStore::open(&config);

        store.store(message("did:key:zBob", b"m1"));
        store.drain_due("did:key:zBob");
        store.persist();

        let contents = std::fs::read_to_string(config.offline_store_path()).unwrap();
        assert_eq!(contents.trim(), "{}");
    }

    #[test]
    fn expired_entries_are_dropped_on_drain() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.offline_expiry = Duration::from_secs(0);

        let store = OfflineStore::open(&config);
        store.store(message("did:key:zBob", b"stale"));
        assert!(store.drain_due("did:key:zBob").is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn requeue_drops_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let store = OfflineStore::open(&test_config(dir.path()));

        store.store(message("did:key:zBob", b"m1"));
        let mut entry = store.drain_due("did:key:zBob").remove(0);
        entry.attempts = 5;
        store.requeue(entry);
        assert_eq!(store.pending_for("did:key:zBob"), 0);
    }

    #[test]
    fn zero_soft_cap_stores_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.offline_soft_cap = 0;

        let store = OfflineStore::open(&config);
        store.store(message("did:key:zBob", b"m1"));
        store.store(message("did:key:zBob", b"m2"));

        let drained = store.drain_due("did:key:zBob");
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message.content, b"m2");
    }

    #[test]
    fn soft_cap_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.offline_soft_cap = 2;

        let store = OfflineStore::open(&config);
        store.store(message("did:key:zBob", b"m1"));
        store.store(message("did:key:zBob", b"m2"));
        store.store(message("did:key:zBob", b"m3"));

        let drained = store.drain_due("did:key:zBob");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message.content, b"m2");
        assert_eq!(drained[1].message.content, b"m3");
    }

    #[cfg(unix)]
    #[test]
    fn store_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let store = OfflineStore::open(&config);
        store.store(message("did:key:zBob", b"m1"));

        let mode = std::fs::metadata(config.offline_store_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
