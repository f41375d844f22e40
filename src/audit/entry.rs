//! Audit Event
//!
//! Defines the structure of tamper-evident audit events and the
//! canonical form their SHA-256 chain digest is computed over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{AuditError, AuditResult};

/// `prev_hash` of the first event in every partition
pub const GENESIS_HASH: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

/// Outcome of the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Caller-supplied fields of an event before it is chained.
///
/// `timestamp`, `actor`, `action`, `resource` and `status` are mandatory;
/// the writer rejects the event if any of them is absent or blank.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFields {
    pub timestamp: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub status: Option<EventStatus>,
    pub reason: Option<String>,
    pub purpose: Option<String>,
    pub endpoint: Option<String>,
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl EventFields {
    /// Successful action happening now
    pub fn new(actor: impl Into<String>, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            actor: Some(actor.into()),
            action: Some(action.into()),
            resource: Some(resource.into()),
            status: Some(EventStatus::Success),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_source_address(mut self, source_address: impl Into<String>) -> Self {
        self.source_address = Some(source_address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    /// Check mandatory fields without consuming the fields
    pub fn validate(&self) -> AuditResult<()> {
        if self.timestamp.is_none() {
            return Err(AuditError::missing_field("timestamp"));
        }
        if self.status.is_none() {
            return Err(AuditError::missing_field("status"));
        }
        required("actor", &self.actor)?;
        required("action", &self.action)?;
        required("resource", &self.resource)?;
        Ok(())
    }

    /// Validate and chain onto `prev_hash`
    pub(crate) fn seal(self, prev_hash: &str) -> AuditResult<AuditEvent> {
        self.validate()?;

        let mut event = AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            timestamp: self.timestamp.ok_or_else(|| AuditError::missing_field("timestamp"))?,
            actor: required("actor", &self.actor)?,
            action: required("action", &self.action)?,
            resource: required("resource", &self.resource)?,
            status: self.status.ok_or_else(|| AuditError::missing_field("status"))?,
            reason: self.reason,
            purpose: self.purpose,
            endpoint: self.endpoint,
            source_address: self.source_address,
            user_agent: self.user_agent,
            details: self.details,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        event.hash = event.calculate_hash()?;
        Ok(event)
    }
}

fn required(field: &str, value: &Option<String>) -> AuditResult<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AuditError::missing_field(field)),
    }
}

/// Chained audit event as stored, one JSON object per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub status: EventStatus,
    pub reason: Option<String>,
    pub purpose: Option<String>,
    pub endpoint: Option<String>,
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub prev_hash: String,
    pub hash: String,
}

/// Every field except `hash`, in fixed order
#[derive(Serialize)]
struct CanonicalEvent<'a> {
    event_id: &'a str,
    timestamp: &'a DateTime<Utc>,
    actor: &'a str,
    action: &'a str,
    resource: &'a str,
    status: EventStatus,
    reason: &'a Option<String>,
    purpose: &'a Option<String>,
    endpoint: &'a Option<String>,
    source_address: &'a Option<String>,
    user_agent: &'a Option<String>,
    details: &'a BTreeMap<String, String>,
}

impl AuditEvent {
    /// Canonical serialization the digest covers (excludes both hashes)
    pub fn canonical_string(&self) -> AuditResult<String> {
        let canonical = CanonicalEvent {
            event_id: &self.event_id,
            timestamp: &self.timestamp,
            actor: &self.actor,
            action: &self.action,
            resource: &self.resource,
            status: self.status,
            reason: &self.reason,
            purpose: &self.purpose,
            endpoint: &self.endpoint,
            source_address: &self.source_address,
            user_agent: &self.user_agent,
            details: &self.details,
        };
        Ok(serde_json::to_string(&canonical)?)
    }

    /// SHA-256 over `prev_hash` followed by the canonical form
    pub fn calculate_hash(&self) -> AuditResult<String> {
        let canonical = self.canonical_string()?;
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(canonical.as_bytes());
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// Verify this event's own hash
    pub fn verify_hash(&self) -> bool {
        matches!(self.calculate_hash(), Ok(hash) if hash == self.hash)
    }

    pub fn to_json_line(&self) -> AuditResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_line(line: &str) -> AuditResult<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} {} {} ({}) by {}",
            self.timestamp.to_rfc3339(),
            self.action,
            self.resource,
            self.status,
            self.actor
        )
    }
}
