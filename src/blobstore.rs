//! Screenshot blob storage
//!
//! One `put` operation over three interchangeable backends: local
//! filesystem, an HTTP upload API, and S3-compatible object storage. The
//! HTTP backend refuses private and link-local hosts so a hostile config
//! cannot turn the crawler into an internal-network proxy.

use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{StorageConfig, StorageKind};
use crate::error::{CrawlError, Result};

/// Hostnames never accepted as upload targets.
const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "0.0.0.0",
    "metadata.google.internal",
    "metadata.gke.internal",
    "instance-data",
];

/// Address ranges never accepted as upload targets.
const BLOCKED_CIDRS: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "127.0.0.0/8",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

/// Upload-target validator for the HTTP backend.
#[derive(Debug, Clone)]
pub struct HostGuard {
    blocked_hosts: HashSet<String>,
    blocked_cidrs: Vec<ipnet::IpNet>,
}

impl Default for HostGuard {
    fn default() -> Self {
        Self {
            blocked_hosts: BLOCKED_HOSTS.iter().map(|h| h.to_string()).collect(),
            blocked_cidrs: BLOCKED_CIDRS
                .iter()
                .map(|c| c.parse().expect("static CIDR table"))
                .collect(),
        }
    }
}

impl HostGuard {
    /// Reject hosts that name or address private infrastructure.
    pub fn check(&self, host: &str) -> Result<()> {
        let normalized = host.trim().trim_matches(|c| c == '[' || c == ']');
        if self.blocked_hosts.contains(&normalized.to_lowercase()) {
            return Err(CrawlError::SsrfBlocked(host.to_string()));
        }
        if let Ok(addr) = normalized.parse::<IpAddr>() {
            if self.blocked_cidrs.iter().any(|net| net.contains(&addr)) {
                return Err(CrawlError::SsrfBlocked(host.to_string()));
            }
        }
        Ok(())
    }
}

enum Backend {
    Local {
        dir: PathBuf,
    },
    Http {
        endpoint: String,
        token: String,
        client: reqwest::Client,
    },
    S3 {
        client: aws_sdk_s3::Client,
        bucket: String,
    },
}

/// Pluggable screenshot sink. `put` returns the blob reference recorded in
/// the page index.
pub struct BlobSink {
    backend: Backend,
}

impl BlobSink {
    /// Build the configured backend. The HTTP endpoint is validated
    /// against the host guard up front so a bad target fails at boot.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let backend = match config.kind {
            StorageKind::Local => Backend::Local {
                dir: PathBuf::from(&config.path),
            },
            StorageKind::Http => {
                HostGuard::default().check(&config.host)?;
                let protocol = if config.ssl_mode == "enable" { "https" } else { "http" };
                let endpoint = format!(
                    "{}://{}:{}/{}",
                    protocol,
                    config.host,
                    config.port,
                    config.path.trim_start_matches('/')
                );
                let timeout = if config.timeout > 0 { config.timeout } else { 30 };
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(timeout))
                    .build()
                    .map_err(|e| CrawlError::BlobUploadFailed(e.to_string()))?;
                Backend::Http {
                    endpoint,
                    token: config.token.clone(),
                    client,
                }
            }
            StorageKind::S3 => {
                let credentials = aws_credential_types::Credentials::from_keys(
                    config.token.clone(),
                    config.secret.clone(),
                    None,
                );
                let s3_config = aws_sdk_s3::config::Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .credentials_provider(credentials)
                    .build();
                Backend::S3 {
                    client: aws_sdk_s3::Client::from_conf(s3_config),
                    bucket: config.path.clone(),
                }
            }
        };
        Ok(Self { backend })
    }

    /// Store `bytes` under `name`, returning the reference to record.
    pub async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<String> {
        match &self.backend {
            Backend::Local { dir } => {
                let path = dir.join(name);
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(|e| CrawlError::BlobUploadFailed(format!("{}: {e}", path.display())))?;
                debug!(path = %path.display(), "screenshot written");
            }
            Backend::Http {
                endpoint,
                token,
                client,
            } => {
                let response = client
                    .post(endpoint)
                    .header("Content-Type", "application/octet-stream")
                    .header("Filename", name)
                    .bearer_auth(token)
                    .body(bytes)
                    .send()
                    .await
                    .map_err(|e| CrawlError::BlobUploadFailed(e.to_string()))?;
                if response.status() != reqwest::StatusCode::OK {
                    return Err(CrawlError::BlobUploadFailed(format!(
                        "upload returned status {}",
                        response.status()
                    )));
                }
                debug!(endpoint = %endpoint, name, "screenshot uploaded");
            }
            Backend::S3 { client, bucket } => {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(name)
                    .body(ByteStream::from(bytes))
                    .send()
                    .await
                    .map_err(|e| CrawlError::BlobUploadFailed(e.to_string()))?;
                info!(bucket = %bucket, name, "screenshot uploaded to object storage");
            }
        }
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_guard_rejects_private_targets() {
        let guard = HostGuard::default();
        assert!(guard.check("localhost").is_err());
        assert!(guard.check("127.0.0.1").is_err());
        assert!(guard.check("10.1.2.3").is_err());
        assert!(guard.check("172.16.0.9").is_err());
        assert!(guard.check("192.168.1.1").is_err());
        assert!(guard.check("169.254.169.254").is_err());
        assert!(guard.check("[::1]").is_err());
        assert!(guard.check("metadata.google.internal").is_err());
    }

    #[test]
    fn host_guard_accepts_public_targets() {
        let guard = HostGuard::default();
        assert!(guard.check("blobs.example.com").is_ok());
        assert!(guard.check("203.0.113.7").is_ok());
    }

    #[tokio::test]
    async fn local_backend_writes_and_returns_name() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            kind: StorageKind::Local,
            path: tmp.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let sink = BlobSink::from_config(&config).unwrap();

        let blob_ref = sink.put("7_20240101000000.png", vec![1, 2, 3]).await.unwrap();
        assert_eq!(blob_ref, "7_20240101000000.png");

        let written = std::fs::read(tmp.path().join("7_20240101000000.png")).unwrap();
        assert_eq!(written, vec![1, 2, 3]);
    }

    #[test]
    fn http_backend_refuses_disallowed_host_at_boot() {
        let config = StorageConfig {
            kind: StorageKind::Http,
            host: "169.254.169.254".to_string(),
            port: 8080,
            path: "upload".to_string(),
            ..StorageConfig::default()
        };
        assert!(matches!(
            BlobSink::from_config(&config),
            Err(CrawlError::SsrfBlocked(_))
        ));
    }
}
