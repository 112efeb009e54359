//! Screenshot blob storage configuration

use serde::{Deserialize, Serialize};

/// Backend selector for screenshot uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Http,
    S3,
}

/// Where page screenshots are stored.
///
/// `path` doubles as the directory (local), URL path (http), and bucket
/// name (s3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(rename = "type")]
    pub kind: StorageKind,
    /// Hostname of the storage API server (http backend)
    pub host: String,
    /// Port of the storage API server (http backend)
    pub port: u16,
    /// Directory, URL path, or bucket name depending on backend
    pub path: String,
    /// Region for S3-compatible storage
    pub region: String,
    /// Bearer token (http) or access key id (s3)
    pub token: String,
    /// Secret access key (s3)
    pub secret: String,
    /// `enable` to upload over https
    pub ssl_mode: String,
    /// Upload timeout in seconds
    pub timeout: u64,
}
