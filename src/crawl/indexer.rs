//! Transactional page indexing behind the process-wide gate
//!
//! Keyword upserts from concurrent transactions deadlock on the keyword
//! unique index, so the whole per-page indexing path is serialized across
//! the process. The gate also rate-limits crawling naturally. It is the
//! one sanctioned process-global: the invariant is semantic, not a
//! convenience.

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::debug;

use crate::catalog::{CatalogGateway, PageInfo};
use crate::error::Result;

/// Process-wide indexing gate. Held only for the duration of one
/// `upsert_page` call; the guard releases on every exit path.
static INDEX_GATE: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Thin coordinator over the catalog's transactional page upsert.
#[derive(Clone)]
pub struct Indexer {
    catalog: CatalogGateway,
}

impl Indexer {
    pub fn new(catalog: CatalogGateway) -> Self {
        Self { catalog }
    }

    /// Persist one page under the gate, returning its index id.
    pub async fn index_page(&self, source_id: i64, page_url: &str, info: &PageInfo) -> Result<i64> {
        let _gate = INDEX_GATE.lock().await;
        debug!(page_url, "indexing page");
        self.catalog.upsert_page(source_id, page_url, info).await
    }

    /// Record a screenshot blob reference. Not gated: a single update
    /// cannot deadlock the keyword index.
    pub async fn record_snapshot(&self, page_url: &str, blob_ref: &str) -> Result<()> {
        self.catalog.record_snapshot(page_url, blob_ref).await
    }
}
