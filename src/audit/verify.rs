//! Audit Log Verification
//!
//! Replays a partition's hash chain and reports the first record that
//! does not match what the chain says it should be.

use std::path::Path;
use tracing::{error, info};

use crate::audit::entry::{AuditEvent, GENESIS_HASH};
use crate::audit::partition::PartitionId;
use crate::error::{AuditError, AuditResult};

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub partition: PartitionId,
    pub records: usize,
    pub head_hash: String,
}

impl VerificationReport {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{}: {} records, head {}",
            self.partition, self.records, self.head_hash
        )
    }
}

/// Verify the serialized records of one partition, in stored order
pub fn verify_records(partition: &PartitionId, records: &[String]) -> AuditResult<VerificationReport> {
    let mut expected_prev = GENESIS_HASH.to_string();

    for (index, line) in records.iter().enumerate() {
        let event = AuditEvent::from_json_line(line).map_err(|e| {
            tampered(partition, index, format!("unparseable record: {}", e))
        })?;
        check_event(partition, index, &event, &expected_prev)?;
        expected_prev = event.hash;
    }

    info!(
        "Audit partition {} verified: {} records",
        partition,
        records.len()
    );
    Ok(VerificationReport {
        partition: *partition,
        records: records.len(),
        head_hash: expected_prev,
    })
}

/// Verify already-parsed events of one partition
pub fn verify_events(partition: &PartitionId, events: &[AuditEvent]) -> AuditResult<VerificationReport> {
    let mut expected_prev = GENESIS_HASH;

    for (index, event) in events.iter().enumerate() {
        check_event(partition, index, event, expected_prev)?;
        expected_prev = event.hash.as_str();
    }

    Ok(VerificationReport {
        partition: *partition,
        records: events.len(),
        head_hash: expected_prev.to_string(),
    })
}

fn check_event(
    partition: &PartitionId,
    index: usize,
    event: &AuditEvent,
    expected_prev: &str,
) -> AuditResult<()> {
    if event.prev_hash != expected_prev {
        return Err(tampered(
            partition,
            index,
            format!(
                "chain broken: expected prev_hash {}, found {}",
                expected_prev, event.prev_hash
            ),
        ));
    }

    if !event.verify_hash() {
        return Err(tampered(partition, index, "stored hash does not match content"));
    }

    let actual = PartitionId::for_timestamp(&event.timestamp);
    if actual != *partition {
        return Err(tampered(
            partition,
            index,
            format!("record dated {} stored in wrong partition", actual),
        ));
    }

    Ok(())
}

fn tampered(partition: &PartitionId, index: usize, detail: impl Into<String>) -> AuditError {
    let err = AuditError::tamper(*partition, index, detail);
    error!("AUDIT LOG TAMPERING DETECTED: {}", err);
    err
}

/// Verify a partition file directly, without a logger
pub fn verify_partition_file(path: &Path) -> AuditResult<VerificationReport> {
    let partition = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(PartitionId::from_file_name)
        .ok_or_else(|| {
            AuditError::ValidationError(format!("Not an audit partition file: {:?}", path))
        })?;

    let contents = std::fs::read_to_string(path)
        .map_err(|e| AuditError::StorageError(format!("Failed to read {:?}: {}", path, e)))?;
    let records: Vec<String> = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    verify_records(&partition, &records)
}

/// Indices of records whose own hash no longer matches their content
pub fn find_tampered_entries(events: &[AuditEvent]) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, event)| !event.verify_hash())
        .map(|(i, _)| i)
        .collect()
}
