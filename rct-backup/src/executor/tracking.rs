//! Change tracking inspection and toggling.

use crate::remote::{ChangeTrackingStatus, DiskInfo, DiskService};
use crate::{Result, Stage};
use tracing::info;

/// Fetch and log disk metadata and its change tracking state.
pub async fn show_status<S>(service: &S, disk_path: &str) -> Result<(DiskInfo, ChangeTrackingStatus)>
where
    S: DiskService + ?Sized,
{
    let disk_info = service
        .disk_info(disk_path)
        .await
        .map_err(|e| e.during(Stage::DiskInfo))?;
    info!(
        "Virtual disk info: virtual_size={}, parent_path={:?}",
        disk_info.virtual_size, disk_info.parent_path
    );

    let status = service
        .change_tracking_status(disk_path)
        .await
        .map_err(|e| e.during(Stage::ChangeTrackingStatus))?;
    info!(
        "RCT status: enabled={}, newer_changes={}, most_recent_id={}",
        status.enabled, status.newer_changes, status.most_recent_id
    );

    Ok((disk_info, status))
}

/// Enable or disable change tracking and return the resulting state.
pub async fn set_change_tracking<S>(
    service: &S,
    disk_path: &str,
    enabled: bool,
) -> Result<ChangeTrackingStatus>
where
    S: DiskService + ?Sized,
{
    service
        .set_change_tracking(disk_path, enabled)
        .await
        .map_err(|e| e.during(Stage::SetChangeTracking))?;

    let status = service
        .change_tracking_status(disk_path)
        .await
        .map_err(|e| e.during(Stage::ChangeTrackingStatus))?;
    info!(
        "New RCT status: enabled={}, most_recent_id={}",
        status.enabled, status.most_recent_id
    );

    Ok(status)
}
