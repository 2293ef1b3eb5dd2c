//! Error types for the backup client.

use std::fmt;
use thiserror::Error;

/// The part of a backup run that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DiskInfo,
    ChangeTrackingStatus,
    SetChangeTracking,
    ChangeList,
    LocalImage,
    Batch { index: usize, total: usize },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::DiskInfo => write!(f, "disk info"),
            Stage::ChangeTrackingStatus => write!(f, "change tracking status"),
            Stage::SetChangeTracking => write!(f, "set change tracking"),
            Stage::ChangeList => write!(f, "change list"),
            Stage::LocalImage => write!(f, "local image"),
            Stage::Batch { index, total } => write!(f, "batch {}/{}", index, total),
        }
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Change tracking is not enabled for disk {disk}")]
    ChangeTrackingDisabled { disk: String },

    #[error("Remote service returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Change range at offset {offset} (length {length}) lies outside the {virtual_size}-byte disk")]
    RangeOutOfBounds {
        offset: u64,
        length: u64,
        virtual_size: u64,
    },

    #[error("Stream ended early in range {range_index}: received {received} of {expected} bytes")]
    ShortStream {
        expected: u64,
        received: u64,
        range_index: usize,
    },

    #[error("Stream delivered more than the expected {expected} bytes")]
    StreamOverrun { expected: u64 },

    #[error("Batch wrote {written} bytes, expected {expected}")]
    BatchSize { expected: u64, written: u64 },

    #[error("Write failed at offset {offset} (range {range_index}): {source}")]
    Write {
        offset: u64,
        range_index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup cancelled")]
    Cancelled,

    #[error("{stage} failed: {source}")]
    Failed {
        stage: Stage,
        #[source]
        source: Box<BackupError>,
    },
}

impl BackupError {
    /// Attach the stage this error occurred in. Already-staged errors keep
    /// their innermost stage.
    pub fn during(self, stage: Stage) -> Self {
        match self {
            BackupError::Failed { .. } => self,
            other => BackupError::Failed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was raised in, if known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BackupError::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Error with any stage wrapper removed.
    pub fn root(&self) -> &BackupError {
        match self {
            BackupError::Failed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a caller could reasonably retry the run. Nothing in this crate
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            BackupError::ShortStream { .. } | BackupError::BatchSize { .. } => true,
            BackupError::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            BackupError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
