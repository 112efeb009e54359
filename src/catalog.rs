//! Gateway to the shared source catalog
//!
//! All persistent rows live behind this type: source claims and releases,
//! transactional page indexing, screenshot references, and periodic table
//! maintenance. Claiming is a single atomic unit — selection under a
//! row-level lock plus the status flip — so concurrent crawler processes
//! never observe overlapping claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::util::str_left;

/// Total attempts for a transaction that loses a deadlock race on the
/// keyword unique index.
const DEADLOCK_RETRIES: u32 = 3;

/// How strictly discovered link hosts must match the seed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainScope {
    /// Only the seed URL itself
    Exact,
    /// Last three host labels must match
    L3,
    /// Last two host labels must match
    L2,
    /// Last label must match
    L1,
    /// No restriction
    Unrestricted,
}

impl DomainScope {
    /// Decode the catalog's `restricted` column. Unknown values fall back
    /// to the strictest scope.
    pub fn from_level(level: i32) -> Self {
        match level {
            0 => Self::Exact,
            1 => Self::L3,
            2 => Self::L2,
            3 => Self::L1,
            4 => Self::Unrestricted,
            _ => Self::Exact,
        }
    }
}

/// One claimed seed to crawl.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub scope: DomainScope,
    pub flags: i32,
    /// Optional per-source rule-config document
    pub config: Option<serde_json::Value>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Terminal outcome of one source crawl.
#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    Completed,
    Errored(String),
}

/// Extracted content of one rendered page, ready for indexing.
#[derive(Debug, Clone, Default)]
pub struct PageInfo {
    pub title: String,
    pub summary: String,
    pub body_text: String,
    pub meta_tags: HashMap<String, String>,
    pub detected_lang: String,
    pub detected_type: String,
    /// Distinct keywords with occurrence counts
    pub keywords: Vec<(String, i64)>,
}

/// Eligibility predicate for claiming: not disabled, and either never
/// crawled, stale, in a retryable error/completed window, or explicitly
/// queued. Oldest first; locked rows held by another claimer are skipped.
const CLAIM_SELECT: &str = r#"
SELECT source_id, url, restricted, flags, config, last_updated_at
FROM Sources
WHERE disabled = false
  AND (
    last_updated_at IS NULL
    OR last_updated_at < NOW() - INTERVAL '3 days'
    OR (status = 'error' AND last_updated_at < NOW() - INTERVAL '15 minutes')
    OR (status = 'completed' AND last_updated_at < NOW() - INTERVAL '1 week')
    OR status IN ('pending', 'new')
    OR status IS NULL
  )
ORDER BY last_updated_at ASC NULLS FIRST
LIMIT $1
FOR UPDATE SKIP LOCKED
"#;

/// Hot-table maintenance, run from the dispatcher's idle timer.
const MAINTENANCE_STATEMENTS: &[&str] = &[
    "VACUUM searchindex",
    "VACUUM keywords",
    "VACUUM keywordindex",
    "REINDEX TABLE searchindex",
    "REINDEX TABLE keywordindex",
];

/// Connection to the source catalog.
#[derive(Clone)]
pub struct CatalogGateway {
    pool: PgPool,
}

impl CatalogGateway {
    /// Connect and verify the catalog is reachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.connect_url())
            .await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        info!(host = %config.host, dbname = %config.dbname, "connected to catalog");
        Ok(Self { pool })
    }

    /// Atomically claim up to `limit` eligible sources, flipping them to
    /// `processing`. Selection and flip are one transaction.
    pub async fn claim_batch(&self, limit: i64) -> Result<Vec<Source>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(CLAIM_SELECT)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;

        let sources: Vec<Source> = rows
            .iter()
            .map(|row| Source {
                id: row.get("source_id"),
                url: row.get("url"),
                scope: DomainScope::from_level(row.get("restricted")),
                flags: row.get("flags"),
                config: row.get("config"),
                last_updated_at: row.get("last_updated_at"),
            })
            .collect();

        if !sources.is_empty() {
            let ids: Vec<i64> = sources.iter().map(|s| s.id).collect();
            sqlx::query(
                "UPDATE Sources SET status = 'processing', last_updated_at = NOW() \
                 WHERE source_id = ANY($1)",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(claimed = sources.len(), "claimed source batch");
        Ok(sources)
    }

    /// Report the terminal state of a claimed source.
    pub async fn release(&self, source_id: i64, outcome: &CrawlOutcome) -> Result<()> {
        match outcome {
            CrawlOutcome::Completed => {
                sqlx::query(
                    "UPDATE Sources SET status = 'completed', last_crawled_at = NOW(), \
                     last_updated_at = NOW(), last_error = NULL \
                     WHERE source_id = $1",
                )
                .bind(source_id)
                .execute(&self.pool)
                .await?;
            }
            CrawlOutcome::Errored(message) => {
                sqlx::query(
                    "UPDATE Sources SET status = 'error', last_crawled_at = NOW(), \
                     last_updated_at = NOW(), last_error = $1, last_error_at = NOW() \
                     WHERE source_id = $2",
                )
                .bind(message)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Index one rendered page: upsert its record, link it to the source,
    /// replace meta tags and keyword postings. One transaction; a deadlock
    /// on the keyword unique index retries the whole unit, up to
    /// `DEADLOCK_RETRIES` attempts in total with backoff between them.
    pub async fn upsert_page(
        &self,
        source_id: i64,
        page_url: &str,
        info: &PageInfo,
    ) -> Result<i64> {
        let mut attempt: u32 = 1;
        loop {
            match self.try_upsert_page(source_id, page_url, info).await {
                Ok(index_id) => return Ok(index_id),
                Err(e) if e.is_retryable_conflict() && attempt < DEADLOCK_RETRIES => {
                    warn!(page_url, attempt, "deadlock while indexing, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_upsert_page(
        &self,
        source_id: i64,
        page_url: &str,
        info: &PageInfo,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let index_id: i64 = sqlx::query_scalar(
            "INSERT INTO SearchIndex \
               (page_url, title, summary, content, detected_lang, detected_type, last_updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             ON CONFLICT (page_url) DO UPDATE SET \
               title = EXCLUDED.title, summary = EXCLUDED.summary, \
               content = EXCLUDED.content, detected_lang = EXCLUDED.detected_lang, \
               detected_type = EXCLUDED.detected_type, last_updated_at = NOW() \
             RETURNING index_id",
        )
        .bind(page_url)
        .bind(str_left(&info.title, 255))
        .bind(&info.summary)
        .bind(&info.body_text)
        .bind(str_left(&info.detected_lang, 8))
        .bind(str_left(&info.detected_type, 8))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO SourceSearchIndex (source_id, index_id) VALUES ($1, $2) \
             ON CONFLICT (source_id, index_id) DO NOTHING",
        )
        .bind(source_id)
        .bind(index_id)
        .execute(&mut *tx)
        .await?;

        self.replace_meta_tags(&mut tx, index_id, &info.meta_tags)
            .await?;
        self.replace_keywords(&mut tx, index_id, &info.keywords)
            .await?;

        tx.commit().await?;
        Ok(index_id)
    }

    async fn replace_meta_tags(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        index_id: i64,
        meta_tags: &HashMap<String, String>,
    ) -> Result<()> {
        sqlx::query("DELETE FROM MetaTags WHERE index_id = $1")
            .bind(index_id)
            .execute(&mut **tx)
            .await?;
        for (name, content) in meta_tags {
            sqlx::query("INSERT INTO MetaTags (index_id, name, content) VALUES ($1, $2, $3)")
                .bind(index_id)
                .bind(name)
                .bind(content)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn replace_keywords(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        index_id: i64,
        keywords: &[(String, i64)],
    ) -> Result<()> {
        sqlx::query("DELETE FROM KeywordIndex WHERE index_id = $1")
            .bind(index_id)
            .execute(&mut **tx)
            .await?;
        for (keyword, occurrences) in keywords {
            // The no-op update makes the conflicting insert return the
            // existing id instead of nothing.
            let keyword_id: i64 = sqlx::query_scalar(
                "INSERT INTO Keywords (keyword) VALUES ($1) \
                 ON CONFLICT (keyword) DO UPDATE SET keyword = EXCLUDED.keyword \
                 RETURNING keyword_id",
            )
            .bind(keyword)
            .fetch_one(&mut **tx)
            .await?;

            sqlx::query(
                "INSERT INTO KeywordIndex (keyword_id, index_id, occurrences) \
                 VALUES ($1, $2, $3)",
            )
            .bind(keyword_id)
            .bind(index_id)
            .bind(occurrences)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Attach a screenshot blob reference to an indexed page.
    pub async fn record_snapshot(&self, page_url: &str, blob_ref: &str) -> Result<()> {
        sqlx::query("UPDATE SearchIndex SET snapshot_url = $1 WHERE page_url = $2")
            .bind(blob_ref)
            .bind(page_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Vacuum and reindex the hot tables. Failures are logged, never fatal.
    pub async fn maintenance(&self) {
        for &statement in MAINTENANCE_STATEMENTS {
            if let Err(e) = sqlx::query(statement).execute(&self.pool).await {
                warn!(statement, "maintenance statement failed: {e}");
            }
        }
        info!("catalog maintenance pass finished");
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_decoding() {
        assert_eq!(DomainScope::from_level(0), DomainScope::Exact);
        assert_eq!(DomainScope::from_level(2), DomainScope::L2);
        assert_eq!(DomainScope::from_level(4), DomainScope::Unrestricted);
        // Out-of-range values clamp to the strictest policy
        assert_eq!(DomainScope::from_level(99), DomainScope::Exact);
        assert_eq!(DomainScope::from_level(-1), DomainScope::Exact);
    }

    #[test]
    fn claim_query_covers_all_eligibility_arms() {
        assert!(CLAIM_SELECT.contains("disabled = false"));
        assert!(CLAIM_SELECT.contains("last_updated_at IS NULL"));
        assert!(CLAIM_SELECT.contains("INTERVAL '3 days'"));
        assert!(CLAIM_SELECT.contains("status = 'error' AND last_updated_at < NOW() - INTERVAL '15 minutes'"));
        assert!(CLAIM_SELECT.contains("status = 'completed' AND last_updated_at < NOW() - INTERVAL '1 week'"));
        assert!(CLAIM_SELECT.contains("status IN ('pending', 'new')"));
        assert!(CLAIM_SELECT.contains("FOR UPDATE SKIP LOCKED"));
        assert!(CLAIM_SELECT.contains("ORDER BY last_updated_at ASC NULLS FIRST"));
    }

    #[test]
    fn maintenance_touches_hot_tables() {
        let joined = MAINTENANCE_STATEMENTS.join(";");
        assert!(joined.contains("VACUUM searchindex"));
        assert!(joined.contains("REINDEX TABLE keywordindex"));
    }
}
