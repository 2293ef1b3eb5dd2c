//! Change-tracking service interface.
//!
//! The backup core only talks to the remote side through [`DiskService`].
//! [`http::HttpDiskService`] is the production implementation.

pub mod http;

#[cfg(test)]
pub(crate) mod mock;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// One changed byte range of the remote disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub offset: u64,
    pub length: u64,
}

impl ChangeDescriptor {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// First byte after the range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Virtual disk metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub virtual_size: u64,

    /// Set for differencing disks
    #[serde(default)]
    pub parent_path: Option<String>,
}

/// Change tracking state of a disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeTrackingStatus {
    pub enabled: bool,

    #[serde(default)]
    pub newer_changes: bool,

    pub most_recent_id: String,
}

/// Body of a multi-range content request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeRequest {
    pub ranges: Vec<ChangeDescriptor>,
}

/// Concatenated bytes of the requested ranges, in request order. Chunk
/// boundaries are arbitrary.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait DiskService: Send + Sync {
    async fn disk_info(&self, disk_path: &str) -> Result<DiskInfo>;

    async fn change_tracking_status(&self, disk_path: &str) -> Result<ChangeTrackingStatus>;

    async fn set_change_tracking(&self, disk_path: &str, enabled: bool) -> Result<()>;

    /// Ranges changed since `checkpoint_id`, in service order.
    async fn changes(&self, disk_path: &str, checkpoint_id: &str)
        -> Result<Vec<ChangeDescriptor>>;

    async fn fetch_ranges(&self, disk_path: &str, ranges: &[ChangeDescriptor])
        -> Result<ByteStream>;
}
