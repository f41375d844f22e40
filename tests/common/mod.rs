#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use compliance_audit::audit::{
    AuditLogger, Disposition, EventFields, FileStore, PartitionId, PartitionLock, PartitionStore,
};
use compliance_audit::error::{AuditError, AuditResult};
use compliance_audit::retention::CancelFlag;

/// Midday UTC on the given date
pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

pub fn day(s: &str) -> PartitionId {
    s.parse().unwrap()
}

pub fn test_logger(dir: &Path) -> AuditLogger {
    AuditLogger::open(dir).expect("Failed to open test audit log")
}

/// Append `count` read events at `when`
pub async fn seed_events(logger: &AuditLogger, when: DateTime<Utc>, count: usize) {
    for i in 0..count {
        logger
            .append(
                EventFields::new(format!("user-{}", i), "read", format!("employee/{}/record", i))
                    .with_timestamp(when)
                    .with_purpose("payroll"),
            )
            .await
            .expect("Failed to seed audit event");
    }
}

/// File store whose removals fail for selected partitions, or that
/// cancels a sweep once it has removed something
pub struct FlakyStore {
    inner: FileStore,
    failing: BTreeSet<PartitionId>,
    cancel_after_remove: Option<CancelFlag>,
}

impl FlakyStore {
    pub fn new(dir: &Path, failing: &[PartitionId]) -> Arc<Self> {
        Arc::new(Self {
            inner: FileStore::new(dir).unwrap(),
            failing: failing.iter().copied().collect(),
            cancel_after_remove: None,
        })
    }

    /// Store that raises `cancel` as soon as the first partition is removed
    pub fn cancelling(dir: &Path, cancel: CancelFlag) -> Arc<Self> {
        Arc::new(Self {
            inner: FileStore::new(dir).unwrap(),
            failing: BTreeSet::new(),
            cancel_after_remove: Some(cancel),
        })
    }
}

impl PartitionStore for FlakyStore {
    fn lock(&self, partition: &PartitionId) -> AuditResult<PartitionLock> {
        self.inner.lock(partition)
    }

    fn append(&self, lock: &PartitionLock, record: &str) -> AuditResult<u64> {
        self.inner.append(lock, record)
    }

    fn read_partition(&self, partition: &PartitionId) -> AuditResult<Vec<String>> {
        self.inner.read_partition(partition)
    }

    fn size(&self, partition: &PartitionId) -> AuditResult<u64> {
        self.inner.size(partition)
    }

    fn partitions(&self) -> AuditResult<Vec<PartitionId>> {
        self.inner.partitions()
    }

    fn exists(&self, partition: &PartitionId) -> AuditResult<bool> {
        self.inner.exists(partition)
    }

    fn remove_partition(&self, partition: &PartitionId) -> AuditResult<Disposition> {
        if let Some(cancel) = &self.cancel_after_remove {
            let removed = self.inner.remove_partition(partition);
            cancel.cancel();
            return removed;
        }
        if self.failing.contains(partition) {
            return Err(AuditError::StorageError(format!(
                "simulated failure removing {}",
                partition
            )));
        }
        self.inner.remove_partition(partition)
    }
}
