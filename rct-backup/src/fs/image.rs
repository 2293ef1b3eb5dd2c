//! Local raw disk image.
//!
//! The image is sized to the remote virtual size before any range is written;
//! ranges land at their absolute offsets in whatever order the change list
//! gives them.

use crate::transfer::RangeSink;
use async_trait::async_trait;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

pub struct DiskImage {
    path: PathBuf,
    virtual_size: u64,
    file: File,
    /// File position after the last write, if known.
    cursor: Option<u64>,
}

impl DiskImage {
    /// Create (or truncate) the image and size it to `virtual_size`. Unwritten
    /// regions read as zeros.
    pub async fn create(path: &Path, virtual_size: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        Self::sized(path, file, virtual_size).await
    }

    /// Open an existing base copy (creating it if missing) without discarding
    /// its content, then resize it to `virtual_size`.
    pub async fn open_existing(path: &Path, virtual_size: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await?;
        Self::sized(path, file, virtual_size).await
    }

    async fn sized(path: &Path, file: File, virtual_size: u64) -> io::Result<Self> {
        file.set_len(virtual_size).await?;
        debug!("Sized {} to {} bytes", path.display(), virtual_size);

        Ok(Self {
            path: path.to_path_buf(),
            virtual_size,
            file,
            cursor: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn virtual_size(&self) -> u64 {
        self.virtual_size
    }

    /// Write `data` at `offset`. Seeks only when the file position differs
    /// from `offset`. The write is flushed before returning, so a failure is
    /// reported by the call that caused it.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= self.virtual_size)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "write of {} bytes at offset {} exceeds virtual size {}",
                        data.len(),
                        offset,
                        self.virtual_size
                    ),
                )
            })?;

        let needs_seek = self.cursor != Some(offset);
        // Unknown until the write has gone through.
        self.cursor = None;
        if needs_seek {
            self.file.seek(SeekFrom::Start(offset)).await?;
        }
        self.file.write_all(data).await?;
        self.file.flush().await?;
        self.cursor = Some(end);
        Ok(())
    }

    /// Flush buffered writes and sync the file to disk.
    pub async fn finish(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        debug!("Synced {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl RangeSink for DiskImage {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        DiskImage::write_at(self, offset, data).await
    }
}
