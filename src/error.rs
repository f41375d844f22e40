use thiserror::Error;

use crate::audit::partition::PartitionId;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(format!("I/O error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Tamper detected in partition {partition} at record {index}: {detail}")]
    TamperError {
        partition: PartitionId,
        index: usize,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Forwarding error: {0}")]
    ForwardingError(String),

    #[error("Retention sweep already in progress")]
    SweepInProgress,
}

pub type AuditResult<T> = Result<T, AuditError>;

impl AuditError {
    pub fn missing_field(field: &str) -> Self {
        Self::ValidationError(format!("Missing required field: {}", field))
    }

    pub fn tamper(partition: PartitionId, index: usize, detail: impl Into<String>) -> Self {
        Self::TamperError {
            partition,
            index,
            detail: detail.into(),
        }
    }

    /// Index of the first tampered record, if this is a tamper error
    pub fn tamper_index(&self) -> Option<usize> {
        match self {
            Self::TamperError { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for AuditError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}
