//! Utility modules for the backup client.

pub mod errors;
pub mod logger;
pub mod shutdown;

pub use errors::{BackupError, Result, Stage};
