use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

use compliance_audit::audit::{verify_partition_file, AuditLogger, PartitionId, VerificationReport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("verify-audit-log")
        .version("1.0.0")
        .about("Verify audit log partition integrity")
        .arg(
            Arg::new("log-dir")
                .short('d')
                .long("log-dir")
                .value_name("DIR")
                .help("Directory holding audit_log_YYYY-MM-DD.jsonl partitions")
                .conflicts_with("file"),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("PATH")
                .help("Single partition file to verify"),
        )
        .arg(
            Arg::new("partition")
                .short('p')
                .long("partition")
                .value_name("YYYY-MM-DD")
                .help("Only verify this partition of --log-dir")
                .requires("log-dir"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let reports = if let Some(file) = matches.get_one::<String>("file") {
        verify_file(Path::new(file))
    } else if let Some(log_dir) = matches.get_one::<String>("log-dir") {
        let partition = matches
            .get_one::<String>("partition")
            .map(|p| p.parse::<PartitionId>())
            .transpose()?;
        verify_directory(Path::new(log_dir), partition, verbose).await
    } else {
        Err(anyhow!("Either --log-dir or --file is required"))
    };

    match reports {
        Ok(reports) => {
            if !quiet {
                for report in &reports {
                    println!("✓ {}", report.summary());
                }
                println!("✓ Audit log verification completed successfully ({} partitions)", reports.len());
            }
            Ok(())
        }
        Err(e) => {
            error!("Audit log verification failed: {}", e);
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    }
}

fn verify_file(path: &Path) -> Result<Vec<VerificationReport>> {
    info!("Verifying audit partition file: {:?}", path);
    if !path.exists() {
        return Err(anyhow!("Audit partition file not found: {:?}", path));
    }
    Ok(vec![verify_partition_file(path)?])
}

async fn verify_directory(
    log_dir: &Path,
    only: Option<PartitionId>,
    verbose: bool,
) -> Result<Vec<VerificationReport>> {
    info!("Verifying audit log directory: {:?}", log_dir);
    if !log_dir.is_dir() {
        return Err(anyhow!("Audit log directory not found: {:?}", log_dir));
    }

    let logger = AuditLogger::open(log_dir)?;
    let partitions = match only {
        Some(partition) => vec![partition],
        None => logger.partitions()?,
    };

    if partitions.is_empty() {
        return Err(anyhow!("No audit partitions found in {:?}", log_dir));
    }

    let mut reports = Vec::with_capacity(partitions.len());
    for partition in &partitions {
        if !logger.store().exists(partition)? {
            return Err(anyhow!("Partition {} not found", partition));
        }
        reports.push(logger.verify(partition).await?);
    }

    if verbose {
        print_action_distribution(&logger, &partitions)?;
    }

    Ok(reports)
}

fn print_action_distribution(logger: &AuditLogger, partitions: &[PartitionId]) -> Result<()> {
    let mut actions: BTreeMap<String, usize> = BTreeMap::new();
    for partition in partitions {
        for event in logger.read_partition(partition)? {
            *actions.entry(event.action).or_insert(0) += 1;
        }
    }

    println!("\nAction distribution:");
    for (action, count) in actions {
        println!("  {}: {}", action, count);
    }
    Ok(())
}
