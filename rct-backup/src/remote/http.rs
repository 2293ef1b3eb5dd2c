//! HTTP client for the change-tracking service.

use super::{
    ByteStream, ChangeDescriptor, ChangeTrackingStatus, DiskInfo, DiskService, RangeRequest,
};
use crate::config::ServiceConfig;
use crate::{BackupError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Certificate, Client, RequestBuilder, Response, Url};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Header carrying the pre-shared key.
pub const AUTH_HEADER: &str = "auth_key";

/// How the server certificate is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Platform root certificates
    System,
    /// Trust the PEM certificate at this path in addition to the system roots
    Certificate(PathBuf),
    /// Accept any certificate
    Insecure,
}

pub struct HttpDiskService {
    client: Client,
    base_url: Url,
    auth_key: String,
}

impl HttpDiskService {
    pub fn new(
        base_url: &str,
        auth_key: impl Into<String>,
        trust: &TrustPolicy,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackupError::Config(format!("Invalid base URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackupError::Config(format!(
                "Base URL cannot carry a path: {}",
                base_url
            )));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder = match trust {
            TrustPolicy::System => builder,
            TrustPolicy::Certificate(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    BackupError::Config(format!(
                        "Cannot read certificate {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                builder.add_root_certificate(Certificate::from_pem(&pem)?)
            }
            TrustPolicy::Insecure => builder.danger_accept_invalid_certs(true),
        };

        Ok(Self {
            client: builder.build()?,
            base_url,
            auth_key: auth_key.into(),
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.auth_key.clone(),
            &config.trust_policy(),
            config.timeout(),
        )
    }

    /// `{base}/vdisk/{disk_path}/{tail...}` with the disk path as one encoded segment.
    fn disk_url(&self, disk_path: &str, tail: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackupError::Config(format!("Invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .push("vdisk")
            .push(disk_path)
            .extend(tail.iter().copied());
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.header(AUTH_HEADER, &self.auth_key).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(BackupError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl DiskService for HttpDiskService {
    async fn disk_info(&self, disk_path: &str) -> Result<DiskInfo> {
        let url = self.disk_url(disk_path, &["info"])?;
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn change_tracking_status(&self, disk_path: &str) -> Result<ChangeTrackingStatus> {
        let url = self.disk_url(disk_path, &["rct"])?;
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn set_change_tracking(&self, disk_path: &str, enabled: bool) -> Result<()> {
        let url = self.disk_url(disk_path, &["rct"])?;
        self.send(self.client.put(url).query(&[("enabled", enabled)]))
            .await?;
        Ok(())
    }

    async fn changes(
        &self,
        disk_path: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<ChangeDescriptor>> {
        let url = self.disk_url(disk_path, &["rct", checkpoint_id, "changes"])?;
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn fetch_ranges(
        &self,
        disk_path: &str,
        ranges: &[ChangeDescriptor],
    ) -> Result<ByteStream> {
        let url = self.disk_url(disk_path, &["content"])?;
        let request = match ranges {
            [] => return Err(BackupError::Config("No ranges to fetch".to_string())),
            [range] => self
                .client
                .get(url)
                .query(&[("offset", range.offset), ("length", range.length)]),
            _ => self.client.post(url).json(&RangeRequest {
                ranges: ranges.to_vec(),
            }),
        };

        debug!("Requesting {} range(s) from {}", ranges.len(), disk_path);
        let response = self.send(request).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(BackupError::from))
            .boxed())
    }
}
