//! RCT Backup Library
//!
//! Incremental backup of virtual disks from a remote change-tracking service
//! into local raw images.

pub mod config;
pub mod executor;
pub mod fs;
pub mod remote;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupReport, BackupRequest, BackupRunner};
pub use remote::{ChangeDescriptor, DiskService};
pub use utils::errors::{BackupError, Stage};
pub type Result<T> = std::result::Result<T, BackupError>;
