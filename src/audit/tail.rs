//! Tail Hash Store
//!
//! Keyed store of the last hash written to each partition. Every
//! partition gets its own async mutex; holding it serializes appends to
//! that partition while other partitions proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::audit::entry::{AuditEvent, GENESIS_HASH};
use crate::audit::partition::PartitionId;
use crate::audit::store::PartitionStore;
use crate::error::{AuditError, AuditResult};

/// Chain head of one partition, as of a known partition size
#[derive(Debug, Default)]
pub struct Tail {
    loaded: bool,
    hash: String,
    records: u64,
    size: u64,
}

impl Tail {
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Loaded and nothing has been written since, by us or anyone else
    pub fn is_current(&self, size: u64) -> bool {
        self.loaded && self.size == size
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Recover the head from the last stored record, or start a new chain
    pub fn load(&mut self, store: &dyn PartitionStore, partition: &PartitionId) -> AuditResult<()> {
        // Size first: a write racing the read leaves us stale, never ahead.
        let size = store.size(partition)?;
        let records = store.read_partition(partition)?;
        self.hash = match records.last() {
            Some(line) => AuditEvent::from_json_line(line)
                .map_err(|e| {
                    AuditError::StorageError(format!(
                        "Cannot resume chain of {}: last record is unreadable: {}",
                        partition, e
                    ))
                })?
                .hash,
            None => GENESIS_HASH.to_string(),
        };
        self.records = records.len() as u64;
        self.size = size;
        self.loaded = true;
        Ok(())
    }

    /// Reload unless the cached head still matches the stored partition
    pub fn refresh(&mut self, store: &dyn PartitionStore, partition: &PartitionId) -> AuditResult<()> {
        let size = store.size(partition)?;
        if !self.is_current(size) {
            if self.loaded {
                debug!("Partition {} changed outside this writer, reloading tail", partition);
            }
            self.load(store, partition)?;
        }
        Ok(())
    }

    /// Record an append that left the partition at `size`
    pub fn advance(&mut self, hash: &str, size: u64) {
        self.hash = hash.to_string();
        self.records += 1;
        self.size = size;
    }

    /// Forget the head so the next append reloads it from storage
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub type TailGuard = OwnedMutexGuard<Tail>;

#[derive(Debug, Default)]
pub struct TailStore {
    tails: Mutex<HashMap<PartitionId, Arc<AsyncMutex<Tail>>>>,
}

impl TailStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the tail of a partition, waiting for any append in flight
    pub async fn lock(&self, partition: &PartitionId) -> TailGuard {
        let slot = {
            let mut tails = self.tails.lock().unwrap_or_else(|e| e.into_inner());
            tails.entry(*partition).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Number of partitions with a tracked tail
    pub fn tracked(&self) -> usize {
        self.tails.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::EventFields;
    use crate::audit::store::FileStore;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn day(s: &str) -> PartitionId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_same_partition_is_exclusive() {
        let store = Arc::new(TailStore::new());
        let guard = store.lock(&day("2024-01-01")).await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move { store.lock(&day("2024-01-01")).await.records() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_different_partitions_are_independent() {
        let store = TailStore::new();
        let _first = store.lock(&day("2024-01-01")).await;
        let second = tokio::time::timeout(Duration::from_millis(100), store.lock(&day("2024-01-02"))).await;
        assert!(second.is_ok());
        assert_eq!(store.tracked(), 2);
    }

    #[tokio::test]
    async fn test_advance_and_reset() {
        let store = TailStore::new();
        let mut tail = store.lock(&day("2024-01-01")).await;
        assert!(!tail.is_loaded());

        tail.advance("sha256:abc", 120);
        assert_eq!(tail.hash(), "sha256:abc");
        assert_eq!(tail.records(), 1);
        assert!(!tail.is_current(120));

        tail.reset();
        assert!(!tail.is_loaded());
        assert_eq!(tail.records(), 0);
    }

    #[tokio::test]
    async fn test_refresh_follows_outside_writes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        let partition = day("2024-01-01");
        let mut tail = Tail::default();

        tail.refresh(&store, &partition).unwrap();
        assert!(tail.is_current(0));
        assert_eq!(tail.hash(), GENESIS_HASH);

        let event = EventFields::new("alice", "read", "doc/1")
            .with_timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap())
            .seal(GENESIS_HASH)
            .unwrap();
        let lock = store.lock(&partition).unwrap();
        let size = store.append(&lock, &event.to_json_line().unwrap()).unwrap();
        drop(lock);

        assert!(!tail.is_current(size));
        tail.refresh(&store, &partition).unwrap();
        assert!(tail.is_current(size));
        assert_eq!(tail.hash(), event.hash);
        assert_eq!(tail.records(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_last_record_blocks_resume() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        let partition = day("2024-01-01");
        std::fs::write(store.partition_path(&partition), "{\"event_id\":\"torn").unwrap();

        let err = Tail::default().load(&store, &partition).unwrap_err();
        assert!(matches!(err, AuditError::StorageError(_)));
        assert!(err.to_string().contains("Cannot resume chain"));
    }
}
