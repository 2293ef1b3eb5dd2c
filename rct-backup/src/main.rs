//! RCT Backup - Main entry point
//!
//! Backs up a virtual disk from a change-tracking service into a local raw image.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rct_backup::executor::tracking;
use rct_backup::remote::http::HttpDiskService;
use rct_backup::utils::{self, shutdown::ShutdownCoordinator};
use rct_backup::{BackupRequest, BackupRunner, Config};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Change-tracking service URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Auth key for the service (overrides config)
    #[arg(long)]
    auth_key: Option<String>,

    /// PEM certificate the server must present
    #[arg(long, value_name = "PEM")]
    cert_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show disk info and change tracking status
    Info {
        /// Path of the virtual disk (VHD or VHDX) on the service host
        #[arg(long)]
        disk: String,
    },

    /// Enable change tracking for a disk
    Enable {
        #[arg(long)]
        disk: String,
    },

    /// Disable change tracking for a disk
    Disable {
        #[arg(long)]
        disk: String,
    },

    /// Copy changed ranges into a local raw image
    Backup {
        #[arg(long)]
        disk: String,

        /// Local raw image path
        #[arg(long, value_name = "FILE")]
        local_path: PathBuf,

        /// Checkpoint to diff against (defaults to the most recent one)
        #[arg(long)]
        rct_id: Option<String>,

        /// Byte budget per content request, 0 for one request per range (overrides config)
        #[arg(long)]
        max_bytes: Option<u64>,

        /// Update an existing image in place instead of starting from an empty one
        #[arg(long)]
        preserve_existing: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        config.service.base_url = base_url;
    }
    if let Some(auth_key) = args.auth_key {
        config.service.auth_key = auth_key;
    }
    if let Some(cert_path) = args.cert_path {
        config.service.cert_path = Some(cert_path);
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    config.validate()?;
    tracing::debug!(
        "Starting rct-backup v{} against {}",
        env!("CARGO_PKG_VERSION"),
        config.service.base_url
    );

    let service = HttpDiskService::from_config(&config.service)?;

    match args.command {
        Command::Info { disk } => {
            tracking::show_status(&service, &disk).await?;
        }
        Command::Enable { disk } => {
            tracking::set_change_tracking(&service, &disk, true).await?;
        }
        Command::Disable { disk } => {
            tracking::set_change_tracking(&service, &disk, false).await?;
        }
        Command::Backup {
            disk,
            local_path,
            rct_id,
            max_bytes,
            preserve_existing,
        } => {
            let shutdown = ShutdownCoordinator::new();
            let max_bytes = max_bytes.unwrap_or(config.transfer.max_bytes_per_request);
            let runner = BackupRunner::with_cancel(service, max_bytes, shutdown.token());
            let request = BackupRequest {
                disk_path: disk,
                checkpoint_id: rct_id,
                local_path,
                preserve_existing,
            };

            // A signal cancels the runner's token; the run then stops with `Cancelled`.
            let signal_handle = tokio::spawn(async move {
                shutdown.wait_for_signal().await;
            });
            let report = runner.run(&request).await;
            signal_handle.abort();

            match report {
                Ok(report) => tracing::info!(
                    "Backed up {} bytes of {} in {} batch(es) from checkpoint {}",
                    report.bytes_transferred,
                    request.disk_path,
                    report.batches,
                    report.checkpoint_id
                ),
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!("Backup failed (retryable): {}", e);
                    } else {
                        tracing::error!("Backup failed: {}", e);
                    }
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
