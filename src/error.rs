//! Crate-wide error kinds
//!
//! Every recoverable failure in the crawl pipeline is classified into one of
//! these kinds so callers can decide between local retry, skip, and session
//! abort without string-matching ad hoc messages.

use std::time::Duration;
use thiserror::Error;

/// Postgres SQLSTATE reported when two transactions deadlock.
const PG_DEADLOCK_DETECTED: &str = "40P01";

/// Errors surfaced by the crawl pipeline
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("database unavailable: {0}")]
    DbUnavailable(String),
    #[error("database conflict: {0}")]
    DbConflict(String),
    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),
    #[error("driver session lost: {0}")]
    DriverSessionLost(String),
    #[error("fetch timed out after {0:?}")]
    FetchTimeout(Duration),
    #[error("Critical rule failure: {0}")]
    RuleCritical(String),
    #[error("rule failed: {0}")]
    RuleNonFatal(String),
    #[error("blob upload failed: {0}")]
    BlobUploadFailed(String),
    #[error("unsupported storage backend: {0}")]
    UnsupportedStorage(String),
    #[error("host blocked by request policy: {0}")]
    SsrfBlocked(String),
}

impl CrawlError {
    /// A critical rule failure aborts the enclosing ruleset immediately.
    ///
    /// The rule format marks these by embedding the token `Critical` in the
    /// failure message, so the check has to look at rendered text as well as
    /// the variant.
    pub fn is_critical(&self) -> bool {
        matches!(self, CrawlError::RuleCritical(_)) || self.to_string().contains("Critical")
    }

    /// Conflicts are retried locally with bounded backoff; everything else
    /// propagates.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, CrawlError::DbConflict(_))
    }
}

impl From<sqlx::Error> for CrawlError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some(PG_DEADLOCK_DETECTED) {
                return CrawlError::DbConflict(db_err.to_string());
            }
        }
        CrawlError::DbUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for CrawlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CrawlError::FetchTimeout(Duration::from_secs(0))
        } else {
            CrawlError::DriverUnavailable(err.to_string())
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, CrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_detection_matches_variant_and_message() {
        assert!(CrawlError::RuleCritical("selector vanished".into()).is_critical());
        assert!(CrawlError::RuleNonFatal("Critical: frame detached".into()).is_critical());
        assert!(!CrawlError::RuleNonFatal("element not found".into()).is_critical());
    }

    #[test]
    fn conflict_classification() {
        assert!(CrawlError::DbConflict("deadlock detected".into()).is_retryable_conflict());
        assert!(!CrawlError::DbUnavailable("connection refused".into()).is_retryable_conflict());
    }
}
