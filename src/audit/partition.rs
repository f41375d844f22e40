//! Day Partitions
//!
//! Audit events are grouped into one append-only partition per UTC
//! calendar day. A partition is identified by its date.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuditError;

const FILE_PREFIX: &str = "audit_log_";
const FILE_SUFFIX: &str = ".jsonl";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Identifier of a day partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionId(NaiveDate);

impl PartitionId {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Partition an event with this timestamp belongs to
    pub fn for_timestamp(timestamp: &DateTime<Utc>) -> Self {
        Self(timestamp.date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Storage file name, e.g. `audit_log_2024-01-01.jsonl`
    pub fn file_name(&self) -> String {
        format!("{}{}{}", FILE_PREFIX, self, FILE_SUFFIX)
    }

    /// Parse a partition back out of its storage file name
    pub fn from_file_name(name: &str) -> Option<Self> {
        name.strip_prefix(FILE_PREFIX)?
            .strip_suffix(FILE_SUFFIX)?
            .parse()
            .ok()
    }

    /// Glob pattern matching every partition file name
    pub fn file_pattern() -> String {
        format!("{}*{}", FILE_PREFIX, FILE_SUFFIX)
    }

    /// Whole days elapsed between this partition and `now`
    pub fn age_in_days(&self, now: &DateTime<Utc>) -> i64 {
        (now.date_naive() - self.0).num_days()
    }

    /// Reference used by records that talk about this partition
    pub fn resource_name(&self) -> String {
        format!("audit_partition/{}", self)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for PartitionId {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Self)
            .map_err(|e| AuditError::ValidationError(format!("Invalid partition date {:?}: {}", s, e)))
    }
}

impl TryFrom<String> for PartitionId {
    type Error = AuditError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PartitionId> for String {
    fn from(value: PartitionId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_round_trip() {
        let partition: PartitionId = "2024-01-01".parse().unwrap();
        assert_eq!(partition.file_name(), "audit_log_2024-01-01.jsonl");
        assert_eq!(
            PartitionId::from_file_name("audit_log_2024-01-01.jsonl"),
            Some(partition)
        );
    }

    #[test]
    fn test_foreign_file_names_are_ignored() {
        assert_eq!(PartitionId::from_file_name("audit_log_latest.jsonl"), None);
        assert_eq!(PartitionId::from_file_name("2024-01-01.jsonl"), None);
        assert_eq!(PartitionId::from_file_name("audit_log_2024-01-01.json"), None);
    }

    #[test]
    fn test_partition_for_timestamp_uses_utc_date() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(PartitionId::for_timestamp(&ts).to_string(), "2024-03-09");
    }

    #[test]
    fn test_age_in_days() {
        let partition: PartitionId = "2024-01-01".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 30, 0).unwrap();
        assert_eq!(partition.age_in_days(&now), 91);
    }

    #[test]
    fn test_invalid_partition_rejected() {
        assert!("2024-13-01".parse::<PartitionId>().is_err());
        assert!("yesterday".parse::<PartitionId>().is_err());
    }
}
