use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use compliance_audit::audit::AuditLogger;
use compliance_audit::config::AppConfig;
use compliance_audit::consent::ConsentStore;
use compliance_audit::retention::{LegalHolds, RetentionSweeper};

/// Run one retention sweep, for use from an external scheduler
#[derive(Parser, Debug)]
#[command(name = "retention-sweep", version)]
struct Args {
    /// Configuration file (TOML or YAML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured retention window
    #[arg(long, value_name = "DAYS")]
    retention_days: Option<u32>,

    /// Sweep as of this RFC 3339 instant instead of now
    #[arg(long, value_name = "TIMESTAMP")]
    now: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compliance_audit=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load_from(Some(path.as_path()))?,
        None => AppConfig::load()?,
    };

    let logger = AuditLogger::new(Arc::new(config.partition_store()?));
    let holds = LegalHolds::load_optional(config.retention.legal_holds_path.as_deref())?;
    let mut sweeper = RetentionSweeper::new(logger.clone(), holds);
    if config.consent.enabled {
        sweeper = sweeper.with_consents(ConsentStore::new(
            &config.consent.storage_dir,
            logger,
            config.consent.default_retention_days,
        )?);
    }

    let retention_days = args.retention_days.unwrap_or(config.retention.retention_days);
    let now = args.now.unwrap_or_else(Utc::now);
    info!("Running retention sweep at {} with a {} day window", now, retention_days);

    let report = sweeper.sweep(now, retention_days).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed.is_empty() {
        std::process::exit(2);
    }
    Ok(())
}
