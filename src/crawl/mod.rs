//! Crawl orchestration
//!
//! Everything between a claimed source and its indexed pages: the
//! dispatcher loop, the per-source session state machine, page fetching
//! and extraction, the link frontier, screenshot capture, and the gated
//! indexing path.

pub mod dispatcher;
pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod indexer;
pub mod screenshot;
pub mod session;

pub use dispatcher::Dispatcher;
pub use fetcher::{PageFetcher, RenderedPage};
pub use frontier::Frontier;
pub use indexer::Indexer;
pub use session::{CrawlSession, SessionState};

use std::sync::Arc;

use crate::blobstore::BlobSink;
use crate::browser::BrowserPool;
use crate::catalog::CatalogGateway;
use crate::config::Config;
use crate::rules::RuleEngine;

/// Shared handles threaded through every component constructor: the
/// configuration, the catalog and browser pool, the screenshot sink, the
/// rule engine, and the gated indexer.
pub struct Runtime {
    pub config: Arc<Config>,
    pub catalog: CatalogGateway,
    pub browsers: Arc<BrowserPool>,
    pub blobs: Arc<BlobSink>,
    pub engine: Arc<RuleEngine>,
    pub indexer: Indexer,
}
