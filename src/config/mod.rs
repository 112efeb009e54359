//! Configuration for the crawl engine

mod browser;
mod crawler;
mod database;
mod logging;
mod storage;

pub use browser::{BrowserConfig, BrowserKind};
pub use crawler::CrawlerConfig;
pub use database::DatabaseConfig;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use storage::{StorageConfig, StorageKind};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CrawlError, Result};
use crate::expr;

/// Top-level configuration, loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source catalog connection
    pub database: DatabaseConfig,
    /// Crawl-loop tuning
    #[serde(default)]
    pub crawler: CrawlerConfig,
    /// Remote browser endpoint
    #[serde(default, alias = "selenium")]
    pub browser: BrowserConfig,
    /// Screenshot blob storage
    #[serde(default, alias = "image_storage_api")]
    pub image_storage: StorageConfig,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Legacy numeric verbosity; overrides `logging.level` when non-zero
    #[serde(default)]
    pub debug_level: u8,
    /// Operating system name, filled from the host at load time
    #[serde(default)]
    pub os: String,
}

impl Config {
    /// Load configuration from a YAML file, validate it, and fill host facts.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::ConfigInvalid(format!("failed to read '{}': {e}", path.display()))
        })?;
        let mut config: Config = serde_yaml::from_str(&content).map_err(|e| {
            CrawlError::ConfigInvalid(format!("failed to parse '{}': {e}", path.display()))
        })?;
        config.os = std::env::consts::OS.to_string();
        if config.debug_level > 0 {
            config.logging.level = LogLevel::from_debug_level(config.debug_level);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate all fields, reporting every problem in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.database.user.is_empty() {
            errors.push("database user must be set".to_string());
        }
        if self.database.dbname.is_empty() {
            errors.push("database name must be set".to_string());
        }

        if self.crawler.workers == 0 {
            errors.push("crawler workers must be positive".to_string());
        }
        if self.crawler.timeout == 0 {
            errors.push("crawler timeout must be positive".to_string());
        }
        if self.crawler.interval.trim().parse::<f64>().is_err()
            && expr::eval(&self.crawler.interval).is_err()
        {
            errors.push(format!(
                "crawler interval '{}' is neither a number nor a valid expression",
                self.crawler.interval
            ));
        }
        if self.crawler.delay.trim().parse::<f64>().is_err()
            && expr::eval(&self.crawler.delay).is_err()
        {
            errors.push(format!(
                "crawler delay '{}' is neither a number nor a valid expression",
                self.crawler.delay
            ));
        }

        if self.browser.host.is_empty() {
            errors.push("browser host must be set".to_string());
        }
        if self.browser.sessions == 0 {
            errors.push("browser sessions must be positive".to_string());
        }

        match self.image_storage.kind {
            StorageKind::Local => {
                if self.image_storage.path.is_empty() {
                    errors.push("image_storage path must be set for local storage".to_string());
                }
            }
            StorageKind::Http => {
                if self.image_storage.host.is_empty() || self.image_storage.port == 0 {
                    errors.push(
                        "image_storage host and port must be set for http storage".to_string(),
                    );
                }
            }
            StorageKind::S3 => {
                if self.image_storage.path.is_empty() || self.image_storage.region.is_empty() {
                    errors.push(
                        "image_storage bucket (path) and region must be set for s3 storage"
                            .to_string(),
                    );
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CrawlError::ConfigInvalid(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            crawler: CrawlerConfig::default(),
            browser: BrowserConfig::default(),
            image_storage: StorageConfig {
                path: "/tmp/screenshots".to_string(),
                ..StorageConfig::default()
            },
            logging: LoggingConfig::default(),
            debug_level: 0,
            os: std::env::consts::OS.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
database:
  host: db.internal
  port: 5432
  user: crawler
  password: hunter2
  dbname: catalog
crawler:
  workers: 3
  interval: "random(2, 4)"
  delay: "1.5"
  timeout: 45
  max_depth: 2
selenium:
  host: grid.internal
  port: 4444
  type: chrome
  headless: true
image_storage_api:
  type: http
  host: blobs.internal
  port: 8080
  path: upload
  token: secret
debug_level: 1
"#;

    #[test]
    fn loads_yaml_with_legacy_section_names() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.crawler.workers, 3);
        assert_eq!(config.crawler.max_depth, 2);
        assert_eq!(config.browser.host, "grid.internal");
        assert_eq!(config.image_storage.kind, StorageKind::Http);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.os, std::env::consts::OS);
    }

    #[test]
    fn validate_rejects_zero_workers_and_bad_delay() {
        let mut config = Config::default();
        config.crawler.workers = 0;
        config.crawler.delay = "three seconds".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("workers"));
        assert!(err.contains("delay"));
    }

    #[test]
    fn validate_checks_storage_backend_fields() {
        let mut config = Config::default();
        config.image_storage.kind = StorageKind::S3;
        config.image_storage.path = String::new();
        assert!(config.validate().is_err());

        config.image_storage.path = "bucket".to_string();
        config.image_storage.region = "eu-west-1".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }
}
