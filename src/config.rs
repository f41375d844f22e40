pub mod loader;

use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audit::store::{Disposition, FileStore};
use crate::error::{AuditError, AuditResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub audit: AuditConfig,
    pub retention: RetentionConfig,
    pub consent: ConsentConfig,
    pub forwarding: ForwardingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub retention_days: u32,
    pub disposition: Disposition,
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    #[serde(default)]
    pub legal_holds_path: Option<PathBuf>,
    pub sweep_interval_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentConfig {
    pub enabled: bool,
    pub storage_dir: PathBuf,
    pub default_retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub queue_capacity: usize,
    pub timeout_secs: u64,
}

impl AppConfig {
    /// Load from `COMPLIANCE_AUDIT_CONFIG` (if set) and the environment
    pub fn load() -> AuditResult<Self> {
        let path = env::var("COMPLIANCE_AUDIT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Defaults, then the optional config file, then environment overrides
    pub fn load_from(path: Option<&Path>) -> AuditResult<Self> {
        let mut builder = Config::builder()
            .set_default("audit.log_dir", "audit_logs")?
            .set_default("retention.retention_days", 90i64)?
            .set_default("retention.disposition", "delete")?
            .set_default("retention.sweep_interval_hours", 24i64)?
            .set_default("consent.enabled", true)?
            .set_default("consent.storage_dir", "data/consent")?
            .set_default("consent.default_retention_days", 90i64)?
            .set_default("forwarding.enabled", false)?
            .set_default("forwarding.queue_capacity", 1024i64)?
            .set_default("forwarding.timeout_secs", 10i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let forward_url = env::var("AUDIT_FORWARD_URL").ok();
        builder = builder
            .set_override_option("retention.retention_days", parse_days(env::var("RETENTION_DAYS").ok())?)?
            .set_override_option("audit.log_dir", env::var("AUDIT_LOG_DIR").ok())?
            .set_override_option("consent.storage_dir", env::var("CONSENT_DIR").ok())?
            .set_override_option("retention.legal_holds_path", env::var("LEGAL_HOLDS_PATH").ok())?
            .set_override_option("forwarding.enabled", forward_url.as_ref().map(|_| true))?
            .set_override_option("forwarding.webhook_url", forward_url)?;

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.retention.disposition == Disposition::Archive && self.retention.archive_dir.is_none() {
            return Err(AuditError::ConfigError(
                "retention.disposition = archive requires retention.archive_dir".to_string(),
            ));
        }

        if self.retention.sweep_interval_hours == 0 {
            return Err(AuditError::ConfigError(
                "retention.sweep_interval_hours must be > 0".to_string(),
            ));
        }

        if self.forwarding.enabled {
            if self.forwarding.webhook_url.as_deref().map_or(true, str::is_empty) {
                return Err(AuditError::ConfigError(
                    "forwarding.enabled requires forwarding.webhook_url".to_string(),
                ));
            }
            if self.forwarding.queue_capacity == 0 {
                return Err(AuditError::ConfigError(
                    "forwarding.queue_capacity must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Partition store honouring the configured disposition
    pub fn partition_store(&self) -> AuditResult<FileStore> {
        let store = FileStore::new(&self.audit.log_dir)?;
        match (&self.retention.disposition, &self.retention.archive_dir) {
            (Disposition::Archive, Some(archive_dir)) => store.with_archive_dir(archive_dir),
            _ => Ok(store),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_hours * 3600)
    }

    pub fn forwarding_timeout(&self) -> Duration {
        Duration::from_secs(self.forwarding.timeout_secs)
    }
}

fn parse_days(raw: Option<String>) -> AuditResult<Option<i64>> {
    raw.map(|value| {
        value
            .trim()
            .parse::<u32>()
            .map(i64::from)
            .map_err(|e| AuditError::ConfigError(format!("RETENTION_DAYS={:?} is not a valid day count: {}", value, e)))
    })
    .transpose()
}
