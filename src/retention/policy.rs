//! Retention window arithmetic

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::partition::PartitionId;

pub const DEFAULT_RETENTION_DAYS: u32 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub retention_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DAYS)
    }
}

impl RetentionPolicy {
    pub fn new(retention_days: u32) -> Self {
        Self { retention_days }
    }

    /// Oldest partition date still inside the window at `now`
    pub fn oldest_retained(&self, now: &DateTime<Utc>) -> NaiveDate {
        now.date_naive()
            .checked_sub_signed(Duration::days(i64::from(self.retention_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// A partition is kept through day `retention_days` of its age and
    /// expires on day `retention_days + 1`.
    pub fn is_expired(&self, partition: &PartitionId, now: &DateTime<Utc>) -> bool {
        partition.date() < self.oldest_retained(now)
    }

    /// Reason recorded on deletion events
    pub fn reason(&self) -> String {
        format!(
            "retention policy: records older than {} days are removed",
            self.retention_days
        )
    }
}
