//! Configuration management for the backup client.
//!
//! Loads configuration from an optional TOML file with environment variable
//! overrides (`RCT_BACKUP_SERVICE__AUTH_KEY`, `RCT_BACKUP_TRANSFER__MAX_BYTES_PER_REQUEST`, ...).
//! Command line flags are applied on top by the binary.

use crate::remote::http::TrustPolicy;
use crate::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "RCT_BACKUP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Change-tracking service URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Pre-shared key sent with every request
    #[serde(default)]
    pub auth_key: String,

    /// PEM certificate the server must present
    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    /// Skip certificate verification when no certificate is configured
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// Per-request timeout in seconds (0 disables it)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Byte budget of a single content request (0 = one request per range)
    #[serde(default = "default_max_bytes_per_request")]
    pub max_bytes_per_request: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_base_url() -> String {
    "https://localhost:6677".to_string()
}

fn default_insecure() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_bytes_per_request() -> u64 {
    64 * 1024 * 1024 // 64MB
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_key: String::new(),
            cert_path: None,
            insecure: default_insecure(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_request: default_max_bytes_per_request(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServiceConfig {
    pub fn trust_policy(&self) -> TrustPolicy {
        match &self.cert_path {
            Some(path) => TrustPolicy::Certificate(path.clone()),
            None if self.insecure => TrustPolicy::Insecure,
            None => TrustPolicy::System,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus `RCT_BACKUP_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::load(Some(path))
    }

    /// Reject settings that cannot produce a working client.
    pub fn validate(&self) -> Result<()> {
        if self.service.auth_key.is_empty() {
            return Err(BackupError::Config("auth_key is required".to_string()));
        }
        if self.service.base_url.is_empty() {
            return Err(BackupError::Config("base_url is required".to_string()));
        }
        Ok(())
    }
}
