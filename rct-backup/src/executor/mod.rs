//! Backup executor - Orchestrates an incremental disk backup.
//!
//! Ties together:
//! - Disk metadata and change tracking queries
//! - Range batching
//! - Content streaming and demultiplexing into the local image
//! - Progress reporting
//!
//! Batches run strictly one after another. If a batch fails the run stops;
//! batches already written are left on disk.

pub mod tracking;

use crate::fs::DiskImage;
use crate::remote::{ChangeDescriptor, DiskService};
use crate::transfer::progress::{format_bytes, format_duration, format_speed, BatchProgress};
use crate::transfer::progress_stream::{ProgressCallback, ProgressStream};
use crate::transfer::{batch_ranges, demux, Batch};
use crate::{BackupError, Result, Stage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backup job configuration
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Disk path as known to the remote service
    pub disk_path: String,

    /// Checkpoint to diff against; the most recent one when `None`
    pub checkpoint_id: Option<String>,

    /// Local raw image
    pub local_path: PathBuf,

    /// Keep the content of an existing local image instead of truncating it
    pub preserve_existing: bool,
}

/// Backup execution result
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub virtual_size: u64,
    pub checkpoint_id: String,
    pub ranges: usize,
    pub batches: usize,
    pub bytes_transferred: u64,
    pub duration: Duration,
}

/// Main backup executor
pub struct BackupRunner<S> {
    service: S,
    max_bytes_per_request: u64,
    cancel_token: CancellationToken,
}

impl<S: DiskService> BackupRunner<S> {
    /// Create a new backup runner (no cancellation support)
    pub fn new(service: S, max_bytes_per_request: u64) -> Self {
        Self::with_cancel(service, max_bytes_per_request, CancellationToken::new())
    }

    /// Create a new backup runner with cancellation support
    pub fn with_cancel(
        service: S,
        max_bytes_per_request: u64,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            service,
            max_bytes_per_request,
            cancel_token,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Execute a backup
    pub async fn run(&self, request: &BackupRequest) -> Result<BackupReport> {
        let disk = request.disk_path.as_str();

        let disk_info = self
            .service
            .disk_info(disk)
            .await
            .map_err(|e| e.during(Stage::DiskInfo))?;
        info!(
            "Virtual disk info: size {} ({} bytes), parent {:?}",
            format_bytes(disk_info.virtual_size),
            disk_info.virtual_size,
            disk_info.parent_path
        );

        let status = self
            .service
            .change_tracking_status(disk)
            .await
            .map_err(|e| e.during(Stage::ChangeTrackingStatus))?;
        info!(
            "RCT status: enabled={}, newer_changes={}, most_recent_id={}",
            status.enabled, status.newer_changes, status.most_recent_id
        );

        if !status.enabled {
            return Err(BackupError::ChangeTrackingDisabled {
                disk: disk.to_string(),
            });
        }

        let checkpoint_id = request
            .checkpoint_id
            .clone()
            .unwrap_or(status.most_recent_id);

        let changes = self
            .service
            .changes(disk, &checkpoint_id)
            .await
            .and_then(|changes| checked_ranges(changes, disk_info.virtual_size))
            .map_err(|e| e.during(Stage::ChangeList))?;
        let total_bytes: u64 = changes.iter().map(|c| c.length).sum();
        info!(
            "Disk changes since {}: {} ranges, {} bytes",
            checkpoint_id,
            changes.len(),
            total_bytes
        );

        let mut image = if request.preserve_existing {
            DiskImage::open_existing(&request.local_path, disk_info.virtual_size).await
        } else {
            DiskImage::create(&request.local_path, disk_info.virtual_size).await
        }
        .map_err(|e| BackupError::from(e).during(Stage::LocalImage))?;

        let batches = batch_ranges(&changes, self.max_bytes_per_request);
        info!(
            "Fetching {} ranges in {} batch(es) into {}",
            changes.len(),
            batches.len(),
            request.local_path.display()
        );

        let mut progress = BatchProgress::new(total_bytes, batches.len());

        for (i, batch) in batches.iter().enumerate() {
            let stage = Stage::Batch {
                index: i + 1,
                total: batches.len(),
            };

            if self.cancel_token.is_cancelled() {
                return Err(BackupError::Cancelled.during(stage));
            }

            debug!(
                "Requesting batch {}/{}: {} ranges, {} bytes, first offset {}",
                i + 1,
                batches.len(),
                batch.len(),
                batch.total_bytes(),
                batch.ranges.first().map(|r| r.offset).unwrap_or(0)
            );

            let written = self
                .transfer_batch(disk, batch, &mut image)
                .await
                .map_err(|e| e.during(stage))?;

            info!("Wrote {}", progress.batch_written(written));
        }

        image
            .finish()
            .await
            .map_err(|e| BackupError::from(e).during(Stage::LocalImage))?;

        let transferred = progress.written_bytes();
        let duration = progress.elapsed();
        info!(
            "Backup complete: {} in {} ranges, {} ({})",
            format_bytes(transferred),
            changes.len(),
            format_duration(duration.as_secs()),
            format_speed(progress.average_speed())
        );

        Ok(BackupReport {
            virtual_size: disk_info.virtual_size,
            checkpoint_id,
            ranges: changes.len(),
            batches: batches.len(),
            bytes_transferred: transferred,
            duration,
        })
    }

    /// Fetch one batch and write it into the image.
    async fn transfer_batch(
        &self,
        disk: &str,
        batch: &Batch,
        image: &mut DiskImage,
    ) -> Result<u64> {
        let expected = batch.total_bytes();
        let received = Arc::new(AtomicU64::new(0));
        let received_clone = Arc::clone(&received);
        let callback: ProgressCallback = Arc::new(move |bytes: u64| {
            received_clone.store(bytes, Ordering::Relaxed);
        });

        let transfer = async {
            let stream = self.service.fetch_ranges(disk, &batch.ranges).await?;
            demux(&batch.ranges, ProgressStream::new(stream, callback), image).await
        };

        let written = tokio::select! {
            result = transfer => result?,
            _ = self.cancel_token.cancelled() => {
                warn!(
                    "Batch cancelled after {} of {} bytes",
                    received.load(Ordering::Relaxed),
                    expected
                );
                return Err(BackupError::Cancelled);
            }
        };

        if written != expected {
            return Err(BackupError::BatchSize { expected, written });
        }
        Ok(written)
    }
}

/// Drop zero-length ranges and reject ranges outside the disk.
fn checked_ranges(
    changes: Vec<ChangeDescriptor>,
    virtual_size: u64,
) -> Result<Vec<ChangeDescriptor>> {
    let before = changes.len();
    let changes: Vec<ChangeDescriptor> = changes.into_iter().filter(|c| c.length > 0).collect();
    if changes.len() != before {
        warn!("Ignoring {} zero-length change range(s)", before - changes.len());
    }

    for change in &changes {
        let in_bounds = change
            .offset
            .checked_add(change.length)
            .is_some_and(|end| end <= virtual_size);
        if !in_bounds {
            return Err(BackupError::RangeOutOfBounds {
                offset: change.offset,
                length: change.length,
                virtual_size,
            });
        }
    }

    Ok(changes)
}
