use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use compliance_audit::audit::{AuditLogger, EventFields};
use compliance_audit::config::AppConfig;
use compliance_audit::consent::ConsentStore;
use compliance_audit::forwarding::{spawn_forwarder, WebhookSink};
use compliance_audit::retention::{CancelFlag, LegalHolds, RetentionSweeper};

#[derive(Parser, Debug)]
#[command(name = "compliance-audit", version, about = "Tamper-evident audit log service with retention enforcement")]
struct Args {
    /// Configuration file (TOML or YAML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Skip verifying existing partitions at startup
    #[arg(long)]
    skip_verify: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compliance_audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("Starting compliance audit service");

    // Load configuration
    let config = match &args.config {
        Some(path) => AppConfig::load_from(Some(path.as_path()))?,
        None => AppConfig::load()?,
    };
    info!("Configuration loaded (retention {} days)", config.retention.retention_days);

    // Initialize audit logger
    let store = Arc::new(config.partition_store()?);
    let mut logger = AuditLogger::new(store);

    // Event forwarding
    let forwarder = match (config.forwarding.enabled, config.forwarding.webhook_url.as_deref()) {
        (true, Some(url)) => {
            let sink = WebhookSink::new(url, config.forwarding_timeout())?;
            let (publisher, handle) = spawn_forwarder(Arc::new(sink), config.forwarding.queue_capacity);
            logger = logger.with_forwarder(publisher);
            Some(handle)
        }
        _ => None,
    };

    if args.skip_verify {
        warn!("Skipping startup verification of audit partitions");
    } else if let Err(e) = logger.verify_all().await {
        error!("Audit log integrity check FAILED, operator attention required: {}", e);
    }

    // Retention sweeper
    let holds = LegalHolds::load_optional(config.retention.legal_holds_path.as_deref())?;
    let mut sweeper = RetentionSweeper::new(logger.clone(), holds);
    if config.consent.enabled {
        let consents = ConsentStore::new(
            &config.consent.storage_dir,
            logger.clone(),
            config.consent.default_retention_days,
        )?;
        sweeper = sweeper.with_consents(consents);
    }
    let sweeper = Arc::new(sweeper);

    let cancel = CancelFlag::new();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let sweep_task = {
        let sweeper = sweeper.clone();
        let cancel = cancel.clone();
        let retention_days = config.retention.retention_days;
        let sweep_interval = config.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                match sweeper.sweep_with_cancel(Utc::now(), retention_days, &cancel).await {
                    Ok(report) => info!("Retention sweep report: {}", report.summary()),
                    Err(e) => warn!("Retention sweep did not run: {}", e),
                }

                if cancel.is_cancelled() {
                    break;
                }
            }
        })
    };
    info!(
        "Retention sweeper scheduled every {} hours",
        config.retention.sweep_interval_hours
    );

    logger
        .append(EventFields::new("system", "service_start", "compliance-audit"))
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    cancel.cancel();
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweep_task.await {
        error!("Retention sweeper task failed: {}", e);
    }

    if let Err(e) = logger
        .append(EventFields::new("system", "service_stop", "compliance-audit"))
        .await
    {
        error!("Failed to record service stop: {}", e);
    }

    // Dropping every logger handle closes the forwarding queue.
    drop(sweeper);
    drop(logger);
    if let Some(handle) = forwarder {
        match tokio::time::timeout(Duration::from_secs(10), handle).await {
            Ok(Ok(stats)) => info!("Forwarder drained: {} delivered, {} failed", stats.delivered, stats.failed),
            Ok(Err(e)) => error!("Forwarder task failed: {}", e),
            Err(_) => warn!("Forwarder did not drain within 10s"),
        }
    }

    info!("Compliance audit service stopped");
    Ok(())
}
