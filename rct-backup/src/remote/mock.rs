//! In-memory change-tracking service for unit tests.

use super::{ByteStream, ChangeDescriptor, ChangeTrackingStatus, DiskInfo, DiskService};
use crate::{BackupError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::sync::Mutex;

pub(crate) struct MockDiskService {
    disk: Vec<u8>,
    changes: Vec<ChangeDescriptor>,
    status: Mutex<ChangeTrackingStatus>,
    chunk_size: usize,
    /// Bytes dropped from the end of every content response
    truncate_by: usize,
    fail_disk_info: bool,
    pub fetches: Mutex<Vec<Vec<ChangeDescriptor>>>,
    pub checkpoints: Mutex<Vec<String>>,
}

impl MockDiskService {
    pub fn new(disk: Vec<u8>, changes: Vec<ChangeDescriptor>) -> Self {
        Self {
            disk,
            changes,
            status: Mutex::new(ChangeTrackingStatus {
                enabled: true,
                newer_changes: false,
                most_recent_id: "rct-latest".to_string(),
            }),
            chunk_size: 8192,
            truncate_by: 0,
            fail_disk_info: false,
            fetches: Mutex::new(Vec::new()),
            checkpoints: Mutex::new(Vec::new()),
        }
    }

    /// Source disk whose byte `i` is `i % 251 + 1`, so it never reads as zero.
    pub fn patterned(size: usize, changes: Vec<ChangeDescriptor>) -> Self {
        Self::new((0..size).map(|i| (i % 251 + 1) as u8).collect(), changes)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_tracking(self, enabled: bool) -> Self {
        self.status.lock().unwrap().enabled = enabled;
        self
    }

    pub fn truncating(mut self, bytes: usize) -> Self {
        self.truncate_by = bytes;
        self
    }

    pub fn failing_disk_info(mut self) -> Self {
        self.fail_disk_info = true;
        self
    }

    pub fn disk(&self) -> &[u8] {
        &self.disk
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl DiskService for MockDiskService {
    async fn disk_info(&self, _disk_path: &str) -> Result<DiskInfo> {
        if self.fail_disk_info {
            return Err(BackupError::Remote {
                status: 404,
                message: "Bad vdisk path".to_string(),
            });
        }
        Ok(DiskInfo {
            virtual_size: self.disk.len() as u64,
            parent_path: None,
        })
    }

    async fn change_tracking_status(&self, _disk_path: &str) -> Result<ChangeTrackingStatus> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn set_change_tracking(&self, _disk_path: &str, enabled: bool) -> Result<()> {
        self.status.lock().unwrap().enabled = enabled;
        Ok(())
    }

    async fn changes(
        &self,
        _disk_path: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<ChangeDescriptor>> {
        self.checkpoints
            .lock()
            .unwrap()
            .push(checkpoint_id.to_string());
        Ok(self.changes.clone())
    }

    async fn fetch_ranges(
        &self,
        _disk_path: &str,
        ranges: &[ChangeDescriptor],
    ) -> Result<ByteStream> {
        self.fetches.lock().unwrap().push(ranges.to_vec());

        let mut body: Vec<u8> = Vec::new();
        for range in ranges {
            body.extend_from_slice(&self.disk[range.offset as usize..range.end() as usize]);
        }
        body.truncate(body.len().saturating_sub(self.truncate_by));

        let chunks: Vec<Result<Bytes>> = body
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
