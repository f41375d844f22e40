//! Retention Sweeper
//!
//! One `sweep` call scans the stored partitions, removes the expired
//! ones not under legal hold, expires consent records, and writes a
//! chained `retention_delete` event for every removal or failed removal.
//! A run moves through `Idle -> Scanning -> {Deleting, Skipping}* ->
//! Reporting -> Idle` and always ends with a report, even when
//! individual removals fail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audit::entry::{EventFields, EventStatus};
use crate::audit::logger::AuditLogger;
use crate::audit::partition::PartitionId;
use crate::audit::store::Disposition;
use crate::consent::{ConsentRecord, ConsentStore};
use crate::error::{AuditError, AuditResult};
use crate::retention::holds::LegalHolds;
use crate::retention::policy::RetentionPolicy;

pub const SWEEPER_ACTOR: &str = "system:retention-sweeper";
pub const RETENTION_DELETE: &str = "retention_delete";
pub const RETENTION_SWEEP: &str = "retention_sweep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepPhase {
    Idle,
    Scanning,
    Deleting,
    Skipping,
    Reporting,
}

/// Cooperative cancellation, checked between partitions
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweptPartition {
    pub partition: PartitionId,
    pub disposition: Disposition,
    pub records: usize,
    /// Hash of the `retention_delete` event, if it could be written
    pub audit_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub resource: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub now: DateTime<Utc>,
    pub retention_days: u32,
    pub deleted: Vec<SweptPartition>,
    pub expired_consents: Vec<String>,
    pub failed: Vec<SweepFailure>,
    pub held: Vec<String>,
    /// Expired partitions and consents left for the next run because of
    /// cancellation, by resource name
    pub deferred: Vec<String>,
    pub scan_error: Option<String>,
    pub cancelled: bool,
}

impl SweepReport {
    fn new(now: DateTime<Utc>, retention_days: u32) -> Self {
        Self {
            now,
            retention_days,
            deleted: Vec::new(),
            expired_consents: Vec::new(),
            failed: Vec::new(),
            held: Vec::new(),
            deferred: Vec::new(),
            scan_error: None,
            cancelled: false,
        }
    }

    /// Nothing was removed and nothing failed
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.expired_consents.is_empty() && self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} partitions removed, {} consents expired, {} failed, {} held, {} deferred",
            self.deleted.len(),
            self.expired_consents.len(),
            self.failed.len(),
            self.held.len(),
            self.deferred.len()
        )
    }
}

pub struct RetentionSweeper {
    logger: AuditLogger,
    consents: Option<ConsentStore>,
    holds: LegalHolds,
    run_lock: Mutex<()>,
    phase: std::sync::Mutex<SweepPhase>,
}

impl RetentionSweeper {
    pub fn new(logger: AuditLogger, holds: LegalHolds) -> Self {
        Self {
            logger,
            consents: None,
            holds,
            run_lock: Mutex::new(()),
            phase: std::sync::Mutex::new(SweepPhase::Idle),
        }
    }

    /// Also expire consent records on every run
    pub fn with_consents(mut self, consents: ConsentStore) -> Self {
        self.consents = Some(consents);
        self
    }

    pub fn phase(&self) -> SweepPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, phase: SweepPhase) {
        let mut current = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *current != phase {
            debug!("Retention sweep phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }

    /// Run one sweep to completion
    pub async fn sweep(&self, now: DateTime<Utc>, retention_days: u32) -> AuditResult<SweepReport> {
        self.sweep_with_cancel(now, retention_days, &CancelFlag::new()).await
    }

    /// Run one sweep, stopping between items once `cancel` is set
    pub async fn sweep_with_cancel(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
        cancel: &CancelFlag,
    ) -> AuditResult<SweepReport> {
        let _run = self
            .run_lock
            .try_lock()
            .map_err(|_| AuditError::SweepInProgress)?;

        let policy = RetentionPolicy::new(retention_days);
        let mut report = SweepReport::new(now, retention_days);
        info!(
            "Retention sweep started at {} (keeping partitions from {})",
            now,
            policy.oldest_retained(&now)
        );

        self.enter(SweepPhase::Scanning);
        let expired: Vec<PartitionId> = match self.logger.partitions() {
            Ok(partitions) => partitions
                .into_iter()
                .filter(|p| policy.is_expired(p, &now))
                .collect(),
            Err(e) => {
                error!("Retention sweep could not list partitions: {}", e);
                report.scan_error = Some(e.to_string());
                Vec::new()
            }
        };

        for (i, partition) in expired.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Retention sweep cancelled, deferring {} partitions", expired.len() - i);
                report.cancelled = true;
                report
                    .deferred
                    .extend(
                        expired[i..]
                            .iter()
                            .filter(|p| !self.holds.holds_partition(p))
                            .map(PartitionId::resource_name),
                    );
                break;
            }

            if self.holds.holds_partition(partition) {
                self.enter(SweepPhase::Skipping);
                info!("Partition {} is under legal hold, skipping", partition);
                report.held.push(partition.resource_name());
                continue;
            }

            self.enter(SweepPhase::Deleting);
            self.sweep_partition(partition, &policy, now, &mut report).await;
        }

        self.expire_consents(&policy, now, cancel, &mut report).await;

        self.enter(SweepPhase::Reporting);
        if !report.is_empty() {
            let summary = EventFields::new(SWEEPER_ACTOR, RETENTION_SWEEP, "audit_log")
                .with_timestamp(now)
                .with_reason(policy.reason())
                .with_detail("retention_days", retention_days)
                .with_detail("partitions_removed", report.deleted.len())
                .with_detail("consents_expired", report.expired_consents.len())
                .with_detail("failures", report.failed.len());
            if let Err(e) = self.logger.append(summary).await {
                error!("Failed to record retention sweep summary: {}", e);
            }
        }

        info!("Retention sweep finished: {}", report.summary());
        self.enter(SweepPhase::Idle);
        Ok(report)
    }

    async fn sweep_partition(
        &self,
        partition: &PartitionId,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        match self.logger.remove_partition(partition).await {
            Ok(None) => {
                debug!("Partition {} already removed", partition);
            }
            Ok(Some(removed)) => {
                let fields = deletion_event(&partition.resource_name(), policy, now)
                    .with_detail("disposition", removed.disposition)
                    .with_detail("records_removed", removed.records)
                    .with_detail(
                        "partition_tail_hash",
                        removed.tail_hash.as_deref().unwrap_or("unknown"),
                    );
                let audit_hash = self.record(fields).await;

                report.deleted.push(SweptPartition {
                    partition: *partition,
                    disposition: removed.disposition,
                    records: removed.records,
                    audit_hash,
                });
            }
            Err(e) => {
                error!("Failed to remove audit partition {}: {}", partition, e);
                self.record_failure(&partition.resource_name(), policy, now, &e, report)
                    .await;
            }
        }
    }

    async fn expire_consents(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
        report: &mut SweepReport,
    ) {
        let Some(consents) = &self.consents else {
            return;
        };

        let records = match consents.removable(now, policy.retention_days) {
            Ok(records) => records,
            Err(e) => {
                error!("Retention sweep could not list consent records: {}", e);
                report.failed.push(SweepFailure {
                    resource: "consent".to_string(),
                    error: e.to_string(),
                });
                return;
            }
        };

        for (i, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                if !report.cancelled {
                    warn!("Retention sweep cancelled, deferring {} consent records", records.len() - i);
                }
                report.cancelled = true;
                report
                    .deferred
                    .extend(
                        records[i..]
                            .iter()
                            .filter(|r| !self.holds.holds_record(&r.subject_id, &r.resource_name()))
                            .map(ConsentRecord::resource_name),
                    );
                break;
            }

            let resource = record.resource_name();
            if self.holds.holds_record(&record.subject_id, &resource) {
                self.enter(SweepPhase::Skipping);
                info!("Consent {} is under legal hold, skipping", record.subject_id);
                report.held.push(resource);
                continue;
            }

            self.enter(SweepPhase::Deleting);
            match consents.remove(&record.subject_id) {
                Ok(true) => {
                    let fields = deletion_event(&resource, policy, now)
                        .with_detail("expired_at", record.expires_at.to_rfc3339());
                    self.record(fields).await;
                    report.expired_consents.push(record.subject_id.clone());
                }
                Ok(false) => debug!("Consent {} already removed", record.subject_id),
                Err(e) => {
                    error!("Failed to remove consent {}: {}", record.subject_id, e);
                    self.record_failure(&resource, policy, now, &e, report).await;
                }
            }
        }
    }

    async fn record_failure(
        &self,
        resource: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        err: &AuditError,
        report: &mut SweepReport,
    ) {
        let fields = deletion_event(resource, policy, now)
            .with_status(EventStatus::Failure)
            .with_detail("error", err);
        self.record(fields).await;

        report.failed.push(SweepFailure {
            resource: resource.to_string(),
            error: err.to_string(),
        });
    }

    /// Append a sweeper event; a write failure is logged, never fatal to the run
    async fn record(&self, fields: EventFields) -> Option<String> {
        match self.logger.append(fields).await {
            Ok(event) => Some(event.hash),
            Err(e) => {
                error!("Failed to record retention event: {}", e);
                None
            }
        }
    }
}

fn deletion_event(resource: &str, policy: &RetentionPolicy, now: DateTime<Utc>) -> EventFields {
    EventFields::new(SWEEPER_ACTOR, RETENTION_DELETE, resource)
        .with_timestamp(now)
        .with_reason(policy.reason())
        .with_purpose("retention_enforcement")
        .with_detail("retention_days", policy.retention_days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 3, 0, 0).unwrap()
    }

    async fn seed(logger: &AuditLogger, when: DateTime<Utc>, count: usize) {
        for i in 0..count {
            logger
                .append(EventFields::new("alice", "read", format!("doc/{}", i)).with_timestamp(when))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_sweep_ends_idle() {
        let temp_dir = tempdir().unwrap();
        let logger = AuditLogger::open(temp_dir.path()).unwrap();
        seed(&logger, at(2024, 1, 1), 2).await;

        let sweeper = RetentionSweeper::new(logger, LegalHolds::default());
        assert_eq!(sweeper.phase(), SweepPhase::Idle);

        let report = sweeper.sweep(at(2024, 5, 1), 90).await.unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.deleted[0].records, 2);
        assert!(report.deleted[0].audit_hash.is_some());
        assert_eq!(sweeper.phase(), SweepPhase::Idle);
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let logger = AuditLogger::open(temp_dir.path()).unwrap();
        let sweeper = RetentionSweeper::new(logger, LegalHolds::default());

        let _running = sweeper.run_lock.lock().await;
        let err = sweeper.sweep(at(2024, 5, 1), 90).await.unwrap_err();
        assert!(matches!(err, AuditError::SweepInProgress));
    }

    #[tokio::test]
    async fn test_cancelled_sweep_defers_everything() {
        let temp_dir = tempdir().unwrap();
        let logger = AuditLogger::open(temp_dir.path()).unwrap();
        seed(&logger, at(2024, 1, 1), 1).await;
        seed(&logger, at(2024, 1, 2), 1).await;

        let sweeper = RetentionSweeper::new(logger.clone(), LegalHolds::default());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = sweeper
            .sweep_with_cancel(at(2024, 5, 1), 90, &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.is_empty());
        assert_eq!(report.deferred.len(), 2);
        assert_eq!(logger.partitions().unwrap().len(), 2);

        // The next run picks the deferred partitions up.
        let report = sweeper.sweep(at(2024, 5, 1), 90).await.unwrap();
        assert_eq!(report.deleted.len(), 2);
    }

    #[tokio::test]
    async fn test_held_partition_is_kept() {
        let temp_dir = tempdir().unwrap();
        let logger = AuditLogger::open(temp_dir.path()).unwrap();
        seed(&logger, at(2024, 1, 1), 1).await;

        let held: PartitionId = "2024-01-01".parse().unwrap();
        let sweeper = RetentionSweeper::new(logger.clone(), LegalHolds::default().hold_partition(held));

        let report = sweeper.sweep(at(2024, 5, 1), 90).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.held, vec!["audit_partition/2024-01-01".to_string()]);
        assert!(logger.store().exists(&held).unwrap());
    }
}
