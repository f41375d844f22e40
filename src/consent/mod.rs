//! Consent Records
//!
//! Stores per-subject monitoring consent as one JSON file each. Every
//! read and change goes through the audit logger. Expired records are
//! removed by the retention sweeper.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::audit::entry::EventFields;
use crate::audit::logger::AuditLogger;
use crate::error::{AuditError, AuditResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub subject_id: String,
    pub monitoring_enabled: bool,
    pub scopes: Vec<String>,
    pub retention_days: u32,
    pub granted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub updated_by: String,
}

impl ConsentRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now <= self.expires_at
    }

    /// Expired, or revoked longer ago than the retention window
    pub fn is_removable(&self, now: DateTime<Utc>, retention_days: u32) -> bool {
        if now > self.expires_at {
            return true;
        }
        self.revoked_at
            .map(|revoked| now - revoked > Duration::days(i64::from(retention_days)))
            .unwrap_or(false)
    }

    pub fn resource_name(&self) -> String {
        resource_name(&self.subject_id)
    }
}

fn resource_name(subject_id: &str) -> String {
    format!("consent/{}", subject_id)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub subject_id: String,
    pub monitoring_enabled: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub retention_days: Option<u32>,
}

#[derive(Clone)]
pub struct ConsentStore {
    dir: PathBuf,
    logger: AuditLogger,
    default_retention_days: u32,
}

impl ConsentStore {
    pub fn new(dir: impl Into<PathBuf>, logger: AuditLogger, default_retention_days: u32) -> AuditResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            AuditError::StorageError(format!("Failed to create consent directory {:?}: {}", dir, e))
        })?;
        info!("Consent store at {:?}", dir);
        Ok(Self {
            dir,
            logger,
            default_retention_days,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create or replace a subject's consent
    pub async fn set_consent(&self, request: ConsentRequest, requester: &str) -> AuditResult<ConsentRecord> {
        validate_subject_id(&request.subject_id)?;
        let now = Utc::now();
        let retention_days = request.retention_days.unwrap_or(self.default_retention_days);
        let expires_at = Duration::try_days(i64::from(retention_days))
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| {
                AuditError::ValidationError(format!(
                    "retention_days {} puts the consent expiry out of range",
                    retention_days
                ))
            })?;
        let scopes = if request.scopes.is_empty() {
            vec!["all".to_string()]
        } else {
            request.scopes
        };
        let granted_at = self
            .read(&request.subject_id)?
            .filter(|existing| existing.revoked_at.is_none())
            .map(|existing| existing.granted_at)
            .unwrap_or(now);

        let record = ConsentRecord {
            subject_id: request.subject_id,
            monitoring_enabled: request.monitoring_enabled,
            scopes,
            retention_days,
            granted_at,
            updated_at: now,
            expires_at,
            revoked_at: None,
            updated_by: requester.to_string(),
        };
        self.write(&record)?;

        self.logger
            .append(
                EventFields::new(requester, "set_consent", record.resource_name())
                    .with_timestamp(now)
                    .with_detail("monitoring_enabled", record.monitoring_enabled)
                    .with_detail("retention_days", retention_days)
                    .with_detail("scopes", record.scopes.join(",")),
            )
            .await?;

        info!(
            "Updated consent for {}: monitoring_enabled={}",
            record.subject_id, record.monitoring_enabled
        );
        Ok(record)
    }

    /// Read a subject's consent; the access itself is audited
    pub async fn get_consent(&self, subject_id: &str, requester: &str) -> AuditResult<Option<ConsentRecord>> {
        validate_subject_id(subject_id)?;
        let record = self.read(subject_id)?;

        self.logger
            .append(
                EventFields::new(requester, "access_consent", resource_name(subject_id))
                    .with_detail("found", record.is_some()),
            )
            .await?;

        Ok(record)
    }

    /// Mark a subject's consent as revoked
    pub async fn revoke_consent(&self, subject_id: &str, requester: &str) -> AuditResult<Option<ConsentRecord>> {
        validate_subject_id(subject_id)?;
        let Some(mut record) = self.read(subject_id)? else {
            return Ok(None);
        };

        let now = Utc::now();
        record.monitoring_enabled = false;
        record.revoked_at = Some(now);
        record.updated_at = now;
        record.updated_by = requester.to_string();
        self.write(&record)?;

        self.logger
            .append(
                EventFields::new(requester, "revoke_consent", record.resource_name())
                    .with_timestamp(now),
            )
            .await?;

        info!("Revoked consent for {}", subject_id);
        Ok(Some(record))
    }

    /// Whether monitoring is allowed right now; missing consent means no
    pub async fn is_monitoring_allowed(&self, subject_id: &str, requester: &str) -> AuditResult<bool> {
        let allowed = match self.get_consent(subject_id, requester).await? {
            Some(record) if record.is_active(Utc::now()) => record.monitoring_enabled,
            Some(_) => {
                warn!("Consent for {} has expired or was revoked", subject_id);
                false
            }
            None => false,
        };
        Ok(allowed)
    }

    pub fn list_consents(&self, active_only: bool, now: DateTime<Utc>) -> AuditResult<Vec<ConsentRecord>> {
        let mut records = self.load_all()?;
        if active_only {
            records.retain(|r| r.is_active(now));
        }
        Ok(records)
    }

    /// Records the retention sweeper may remove at `now`
    pub fn removable(&self, now: DateTime<Utc>, retention_days: u32) -> AuditResult<Vec<ConsentRecord>> {
        let mut records = self.load_all()?;
        records.retain(|r| r.is_removable(now, retention_days));
        Ok(records)
    }

    /// Delete a subject's record. Returns false if it was already gone.
    pub(crate) fn remove(&self, subject_id: &str) -> AuditResult<bool> {
        validate_subject_id(subject_id)?;
        let path = self.path_for(subject_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .map_err(|e| AuditError::StorageError(format!("Failed to delete {:?}: {}", path, e)))?;
        debug!("Deleted consent record {:?}", path);
        Ok(true)
    }

    fn path_for(&self, subject_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", subject_id))
    }

    fn read(&self, subject_id: &str) -> AuditResult<Option<ConsentRecord>> {
        let path = self.path_for(subject_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| AuditError::StorageError(format!("Failed to read {:?}: {}", path, e)))?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn write(&self, record: &ConsentRecord) -> AuditResult<()> {
        let path = self.path_for(&record.subject_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(record)?)
            .map_err(|e| AuditError::StorageError(format!("Failed to write {:?}: {}", tmp, e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| AuditError::StorageError(format!("Failed to replace {:?}: {}", path, e)))?;
        Ok(())
    }

    fn load_all(&self) -> AuditResult<Vec<ConsentRecord>> {
        let pattern = self.dir.join("*.json");
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern)
            .map_err(|e| AuditError::StorageError(format!("Invalid consent pattern: {}", e)))?;

        let mut records = Vec::new();
        for path in paths.flatten() {
            let parsed = fs::read_to_string(&path)
                .map_err(AuditError::from)
                .and_then(|contents| Ok(serde_json::from_str::<ConsentRecord>(&contents)?));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable consent file {:?}: {}", path, e),
            }
        }

        records.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        Ok(records)
    }
}

fn validate_subject_id(subject_id: &str) -> AuditResult<()> {
    let valid = !subject_id.is_empty()
        && !subject_id.starts_with('.')
        && subject_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(AuditError::ValidationError(format!(
            "Invalid subject id: {:?}",
            subject_id
        )))
    }
}
