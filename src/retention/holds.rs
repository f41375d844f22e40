//! Legal Holds
//!
//! Identifiers exempt from retention deletion regardless of age. Loaded
//! from a YAML file of the form:
//!
//! ```yaml
//! partitions:
//!   - 2024-01-01
//! records:
//!   - emp123
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use crate::audit::partition::PartitionId;
use crate::config::loader::load_yaml;
use crate::error::AuditResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalHolds {
    #[serde(default)]
    pub partitions: BTreeSet<PartitionId>,
    /// Consent subject ids, or full resource names such as `consent/emp123`
    #[serde(default)]
    pub records: BTreeSet<String>,
}

impl LegalHolds {
    pub fn load(path: &Path) -> AuditResult<Self> {
        let holds: Self = load_yaml(path)?;
        info!(
            "Loaded legal holds: {} partitions, {} records",
            holds.partitions.len(),
            holds.records.len()
        );
        Ok(holds)
    }

    /// Load the file if a path is configured, otherwise hold nothing
    pub fn load_optional(path: Option<&Path>) -> AuditResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn hold_partition(mut self, partition: PartitionId) -> Self {
        self.partitions.insert(partition);
        self
    }

    pub fn hold_record(mut self, record: impl Into<String>) -> Self {
        self.records.insert(record.into());
        self
    }

    pub fn holds_partition(&self, partition: &PartitionId) -> bool {
        self.partitions.contains(partition)
    }

    pub fn holds_record(&self, subject_id: &str, resource: &str) -> bool {
        self.records.contains(subject_id) || self.records.contains(resource)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty() && self.records.is_empty()
    }
}
