//! Audit Logger
//!
//! Appends events to day-partitioned, append-only storage, chaining each
//! event to the previous one in its partition.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::audit::entry::{AuditEvent, EventFields};
use crate::audit::partition::PartitionId;
use crate::audit::store::{Disposition, FileStore, PartitionStore};
use crate::audit::tail::TailStore;
use crate::audit::verify::{verify_records, VerificationReport};
use crate::error::{AuditError, AuditResult};
use crate::forwarding::ForwardingPublisher;

/// What the logger removed on behalf of the retention sweeper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedPartition {
    pub partition: PartitionId,
    pub disposition: Disposition,
    pub records: usize,
    pub tail_hash: Option<String>,
}

/// Hash-chained audit log writer
#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn PartitionStore>,
    tails: Arc<TailStore>,
    forwarder: Option<ForwardingPublisher>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn PartitionStore>) -> Self {
        Self::with_tail_store(store, Arc::new(TailStore::new()))
    }

    /// Create a logger sharing an existing tail store
    pub fn with_tail_store(store: Arc<dyn PartitionStore>, tails: Arc<TailStore>) -> Self {
        Self {
            store,
            tails,
            forwarder: None,
        }
    }

    /// Logger over a JSONL partition directory
    pub fn open(log_dir: impl Into<PathBuf>) -> AuditResult<Self> {
        let store = FileStore::new(log_dir)?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Offer every appended event to a forwarder
    pub fn with_forwarder(mut self, forwarder: ForwardingPublisher) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn store(&self) -> &Arc<dyn PartitionStore> {
        &self.store
    }

    /// Validate, chain and durably append an event
    pub async fn append(&self, fields: EventFields) -> AuditResult<AuditEvent> {
        fields.validate()?;
        let timestamp = fields
            .timestamp
            .ok_or_else(|| AuditError::missing_field("timestamp"))?;
        let partition = PartitionId::for_timestamp(&timestamp);

        let mut tail = self.tails.lock(&partition).await;
        // Other processes may append to the same directory; the file lock
        // orders us with them and `refresh` picks up what they wrote.
        let held = self.store.lock(&partition)?;
        tail.refresh(self.store.as_ref(), &partition)?;

        let event = fields.seal(tail.hash())?;
        let line = event.to_json_line()?;

        let size = match self.store.append(&held, &line) {
            Ok(size) => size,
            Err(e) => {
                error!("Failed to append audit event to {}: {}", partition, e);
                return Err(e);
            }
        };
        tail.advance(&event.hash, size);
        drop(held);
        drop(tail);

        debug!("Appended audit event: {}", event.summary());

        if let Some(forwarder) = &self.forwarder {
            forwarder.offer(&event);
        }

        Ok(event)
    }

    /// Current chain head of a partition
    pub async fn head_hash(&self, partition: &PartitionId) -> AuditResult<String> {
        let mut tail = self.tails.lock(partition).await;
        tail.refresh(self.store.as_ref(), partition)?;
        Ok(tail.hash().to_string())
    }

    /// Number of events in a partition
    pub async fn entry_count(&self, partition: &PartitionId) -> AuditResult<u64> {
        let mut tail = self.tails.lock(partition).await;
        tail.refresh(self.store.as_ref(), partition)?;
        Ok(tail.records())
    }

    pub fn partitions(&self) -> AuditResult<Vec<PartitionId>> {
        self.store.partitions()
    }

    /// All events of a partition in chain order
    pub fn read_partition(&self, partition: &PartitionId) -> AuditResult<Vec<AuditEvent>> {
        self.store
            .read_partition(partition)?
            .iter()
            .map(|line| AuditEvent::from_json_line(line))
            .collect()
    }

    /// Replay a partition's chain, failing at the first tampered record
    pub async fn verify(&self, partition: &PartitionId) -> AuditResult<VerificationReport> {
        let _tail = self.tails.lock(partition).await;
        let records = self.store.read_partition(partition)?;
        verify_records(partition, &records)
    }

    /// Verify every stored partition, returning the first failure
    pub async fn verify_all(&self) -> AuditResult<Vec<VerificationReport>> {
        let mut reports = Vec::new();
        for partition in self.partitions()? {
            reports.push(self.verify(&partition).await?);
        }
        info!("Verified {} audit partitions", reports.len());
        Ok(reports)
    }

    /// Remove a whole partition. Returns `None` if it is already gone.
    pub(crate) async fn remove_partition(
        &self,
        partition: &PartitionId,
    ) -> AuditResult<Option<RemovedPartition>> {
        let mut tail = self.tails.lock(partition).await;
        if !self.store.exists(partition)? {
            return Ok(None);
        }

        let records = self.store.read_partition(partition)?;
        let tail_hash = records
            .last()
            .and_then(|line| AuditEvent::from_json_line(line).ok())
            .map(|event| event.hash);

        let disposition = self.store.remove_partition(partition)?;
        tail.reset();

        Ok(Some(RemovedPartition {
            partition: *partition,
            disposition,
            records: records.len(),
            tail_hash,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::GENESIS_HASH;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn fields_on(day: u32, action: &str) -> EventFields {
        EventFields::new("alice", action, "employee/42")
            .with_timestamp(Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_append_chains_events() {
        let temp_dir = tempdir().unwrap();
        let logger = AuditLogger::open(temp_dir.path()).unwrap();

        let first = logger.append(fields_on(1, "read")).await.unwrap();
        let second = logger.append(fields_on(1, "update")).await.unwrap();

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);

        let partition = PartitionId::for_timestamp(&first.timestamp);
        assert_eq!(logger.entry_count(&partition).await.unwrap(), 2);
        assert_eq!(logger.head_hash(&partition).await.unwrap(), second.hash);
    }

    #[tokio::test]
    async fn test_partitions_chain_independently() {
        let temp_dir = tempdir().unwrap();
        let logger = AuditLogger::open(temp_dir.path()).unwrap();

        logger.append(fields_on(1, "read")).await.unwrap();
        let other_day = logger.append(fields_on(2, "read")).await.unwrap();

        assert_eq!(other_day.prev_hash, GENESIS_HASH);
        assert_eq!(logger.partitions().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_event_writes_nothing() {
        let temp_dir = tempdir().unwrap();
        let logger = AuditLogger::open(temp_dir.path()).unwrap();

        let mut fields = fields_on(1, "read");
        fields.action = None;
        let err = logger.append(fields).await.unwrap_err();

        assert!(matches!(err, AuditError::ValidationError(_)));
        assert!(logger.partitions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopened_logger_continues_chain() {
        let temp_dir = tempdir().unwrap();
        let first = {
            let logger = AuditLogger::open(temp_dir.path()).unwrap();
            logger.append(fields_on(1, "read")).await.unwrap()
        };

        let logger = AuditLogger::open(temp_dir.path()).unwrap();
        let second = logger.append(fields_on(1, "read")).await.unwrap();
        assert_eq!(second.prev_hash, first.hash);

        let partition = PartitionId::for_timestamp(&first.timestamp);
        let report = logger.verify(&partition).await.unwrap();
        assert_eq!(report.records, 2);
    }

    #[tokio::test]
    async fn test_remove_partition_resets_tail() {
        let temp_dir = tempdir().unwrap();
        let logger = AuditLogger::open(temp_dir.path()).unwrap();
        let event = logger.append(fields_on(1, "read")).await.unwrap();
        let partition = PartitionId::for_timestamp(&event.timestamp);

        let removed = logger.remove_partition(&partition).await.unwrap().unwrap();
        assert_eq!(removed.records, 1);
        assert_eq!(removed.tail_hash.as_deref(), Some(event.hash.as_str()));
        assert_eq!(removed.disposition, Disposition::Delete);

        assert!(logger.remove_partition(&partition).await.unwrap().is_none());
        assert_eq!(logger.head_hash(&partition).await.unwrap(), GENESIS_HASH);
    }
}
