//! Per-source crawl state machine
//!
//! One session binds a claimed source to a leased browser handle and
//! drives it through `Starting` → `Expanding` → `Finalizing`. Within a
//! session the driver is used sequentially: the worker pool shares the
//! one handle behind a mutex, appends discovered links to a pending
//! buffer, and the orchestrator advances the frontier at level
//! boundaries. Parallelism across sources comes from the browser pool.

use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::Page;
use crate::browser::WireSession;
use crate::catalog::{CrawlOutcome, DomainScope, Source};
use crate::error::{CrawlError, Result};
use crate::expr;
use crate::util::snapshot_name;

use super::extractor;
use super::fetcher::PageFetcher;
use super::frontier::Frontier;
use super::screenshot;
use super::Runtime;

/// Driver handle shared by a session's workers. `None` means the session
/// was lost and could not be re-established.
type SharedDriver = Arc<AsyncMutex<Option<WireSession>>>;

/// Lifecycle of one source crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Expanding,
    Finalizing,
    Completed,
    Errored,
}

/// One source crawl in progress.
pub struct CrawlSession {
    runtime: Arc<Runtime>,
    source: Source,
    context_id: String,
    state: SessionState,
}

impl CrawlSession {
    pub fn new(runtime: Arc<Runtime>, source: Source) -> Self {
        Self {
            runtime,
            source,
            context_id: Uuid::new_v4().to_string(),
            state: SessionState::Starting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Crawl the source to completion and report the terminal status to
    /// the catalog.
    pub async fn run(mut self) -> CrawlOutcome {
        info!(source = %self.source.url, "crawl session starting");
        let outcome = self.crawl().await;

        self.state = match outcome {
            CrawlOutcome::Completed => SessionState::Completed,
            CrawlOutcome::Errored(_) => SessionState::Errored,
        };
        if let Err(e) = self.runtime.catalog.release(self.source.id, &outcome).await {
            error!(source = %self.source.url, "failed to report crawl outcome: {e}");
        }
        match &outcome {
            CrawlOutcome::Completed => info!(source = %self.source.url, "crawl completed"),
            CrawlOutcome::Errored(message) => {
                warn!(source = %self.source.url, "crawl errored: {message}")
            }
        }
        outcome
    }

    async fn crawl(&mut self) -> CrawlOutcome {
        let session = match self.runtime.browsers.lease().await {
            Ok(session) => session,
            Err(e) => return CrawlOutcome::Errored(format!("leasing browser session: {e}")),
        };
        let shared: SharedDriver = Arc::new(AsyncMutex::new(Some(session)));

        let outcome = match self.expand(&shared).await {
            Ok(()) => CrawlOutcome::Completed,
            Err(e) => CrawlOutcome::Errored(e.to_string()),
        };

        self.state = SessionState::Finalizing;
        let leftover = shared.lock().await.take();
        match leftover {
            Some(session) => self.runtime.browsers.give_back(session).await,
            None => debug!("session was abandoned, nothing to return"),
        }
        outcome
    }

    /// Seed crawl, then depth-bounded frontier expansion.
    async fn expand(&mut self, shared: &SharedDriver) -> Result<()> {
        let config = &self.runtime.config.crawler;
        let fetcher = PageFetcher::new(&config.interval);

        let seed_links = {
            let mut guard = shared.lock().await;
            let session = guard
                .as_ref()
                .ok_or_else(|| CrawlError::DriverSessionLost("no session".into()))?;

            let rendered = fetcher.fetch(session, &self.source.url, 0).await?;
            let info = extractor::extract_page_info(session, &rendered.html).await?;
            self.runtime
                .indexer
                .index_page(self.source.id, &self.source.url, &info)
                .await?;

            if config.source_screenshot || config.full_site_screenshot {
                screenshot_page(&self.runtime, self.source.id, session, &self.source.url).await;
            }

            let links = extractor::extract_links(&rendered.html);

            // The long seed render can sour the session; refresh it and
            // fall back to a reconnect before fanning workers out.
            if session.refresh().await.is_err() {
                let broken = guard.take().expect("session held above");
                let fresh = self.runtime.browsers.reconnect(broken).await?;
                *guard = Some(fresh);
            }
            links
        };

        self.state = SessionState::Expanding;
        let mut frontier = Frontier::new(&self.source.url, config.max_depth, seed_links);

        while frontier.should_expand() {
            debug!(
                depth = frontier.depth(),
                urls = frontier.current().len(),
                "expanding frontier level"
            );
            self.run_level(&frontier, shared).await;

            // A lost driver ends the crawl; everything queued after the
            // loss was skipped anyway.
            if shared.lock().await.is_none() {
                return Err(CrawlError::DriverSessionLost(
                    "browser session lost during expansion".into(),
                ));
            }
            frontier.advance();
        }
        Ok(())
    }

    /// Work one frontier level with a bounded worker pool. Workers pull
    /// URLs from a channel, share the one driver handle sequentially, and
    /// buffer discovered links; failures on single URLs never escape.
    async fn run_level(&self, frontier: &Frontier, shared: &SharedDriver) {
        let urls = frontier.current().to_vec();
        let (tx, rx) = mpsc::channel::<String>(urls.len().max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let pending: Arc<SyncMutex<Vec<String>>> = Arc::new(SyncMutex::new(Vec::new()));

        let mut workers = JoinSet::new();
        let worker_count = self.runtime.config.crawler.workers.max(1);
        let depth = frontier.depth() + 1;
        for worker_id in 0..worker_count {
            workers.spawn(worker_loop(
                self.runtime.clone(),
                self.source.clone(),
                self.context_id.clone(),
                depth,
                rx.clone(),
                shared.clone(),
                pending.clone(),
                worker_id,
            ));
        }

        for url in urls {
            if tx.send(url).await.is_err() {
                break;
            }
        }
        drop(tx);

        while workers.join_next().await.is_some() {}

        let discovered = std::mem::take(&mut *pending.lock());
        frontier.enqueue(discovered);
    }
}

/// Hygiene for one queued URL: trim, absolutize relative hrefs against
/// the source, drop anything the domain scope excludes.
fn prepare_url(source: &Source, raw: &str) -> Option<String> {
    let mut url = raw.trim().to_string();
    if url.is_empty() {
        return None;
    }
    if url.starts_with('/') {
        url = extractor::combine_urls(&source.url, &url)?;
    }
    if source.scope != DomainScope::Unrestricted
        && extractor::is_external_link(&source.url, &url, source.scope)
    {
        debug!(url = %url, "skipping out-of-scope url");
        return None;
    }
    Some(url)
}

fn is_driver_error(error: &CrawlError) -> bool {
    matches!(
        error,
        CrawlError::DriverSessionLost(_) | CrawlError::DriverUnavailable(_)
    )
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    runtime: Arc<Runtime>,
    source: Source,
    context_id: String,
    depth: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<String>>>,
    shared: SharedDriver,
    pending: Arc<SyncMutex<Vec<String>>>,
    worker_id: usize,
) {
    let config = &runtime.config.crawler;
    let fetcher = PageFetcher::new(&config.interval);

    loop {
        let url = { rx.lock().await.recv().await };
        let Some(url) = url else { break };

        let Some(url) = prepare_url(&source, &url) else {
            continue;
        };

        {
            let mut guard = shared.lock().await;
            let Some(session) = guard.as_ref() else {
                debug!(worker_id, "driver gone, worker stopping");
                break;
            };

            match process_url(&runtime, &source, &context_id, session, &fetcher, &url, depth).await
            {
                Ok(links) => {
                    if !links.is_empty() {
                        pending.lock().extend(links);
                    }
                }
                Err(e) if is_driver_error(&e) => {
                    warn!(worker_id, url = %url, "driver failure: {e}, reconnecting");
                    let broken = guard.take().expect("session held above");
                    match runtime.browsers.reconnect(broken).await {
                        Ok(fresh) => *guard = Some(fresh),
                        Err(reconnect_err) => {
                            error!(worker_id, "reconnect failed, abandoning session: {reconnect_err}");
                            break;
                        }
                    }
                }
                Err(e) => debug!(worker_id, url = %url, "page failed: {e}"),
            }
        }

        if config.delay != "0" {
            let delay = expr::delay_seconds(&config.delay);
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }
    }
}

/// The full per-URL pipeline: fetch, action rules, scraping rules,
/// extraction, indexing, optional screenshot, in-scope link discovery.
async fn process_url(
    runtime: &Runtime,
    source: &Source,
    context_id: &str,
    session: &WireSession,
    fetcher: &PageFetcher,
    url: &str,
    depth: usize,
) -> Result<Vec<String>> {
    let rendered = fetcher.fetch(session, url, depth).await?;

    if let Err(e) = runtime
        .engine
        .apply_action_plan(session, source.config.as_ref(), &rendered.final_url, context_id)
        .await
    {
        if is_driver_error(&e) {
            return Err(e);
        }
        warn!(url, "action rules failed: {e}");
    }

    match runtime
        .engine
        .apply_scraping_plan(session, source.config.as_ref(), &rendered.final_url, context_id)
        .await
    {
        Ok(document) => {
            if document.as_object().is_some_and(|map| !map.is_empty()) {
                debug!(url, scraped = %document, "scraping rules produced data");
            }
        }
        Err(e) if is_driver_error(&e) => return Err(e),
        Err(e) => warn!(url, "scraping rules failed: {e}"),
    }

    let info = extractor::extract_page_info(session, &rendered.html).await?;
    runtime.indexer.index_page(source.id, url, &info).await?;

    if runtime.config.crawler.full_site_screenshot {
        screenshot_page(runtime, source.id, session, url).await;
    }

    let links = extractor::extract_links(&rendered.html)
        .into_iter()
        .filter(|link| {
            link.starts_with('/')
                || !extractor::is_external_link(&source.url, link, source.scope)
        })
        .collect();
    Ok(links)
}

/// Capture, upload, and record a screenshot. Never fails the page: every
/// error is logged and swallowed.
async fn screenshot_page(runtime: &Runtime, source_id: i64, session: &WireSession, page_url: &str) {
    let name = snapshot_name(source_id);
    let bytes = match screenshot::capture_stitched(session, 0).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(page_url, "screenshot capture failed: {e}");
            return;
        }
    };
    let blob_ref = match runtime.blobs.put(&name, bytes).await {
        Ok(blob_ref) => blob_ref,
        Err(e) => {
            warn!(page_url, "screenshot upload failed: {e}");
            return;
        }
    };
    if let Err(e) = runtime.indexer.record_snapshot(page_url, &blob_ref).await {
        warn!(page_url, "recording snapshot reference failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(scope: DomainScope) -> Source {
        Source {
            id: 1,
            url: "http://a.test/".to_string(),
            scope,
            flags: 0,
            config: None,
            last_updated_at: None,
        }
    }

    #[test]
    fn prepare_url_trims_and_absolutizes() {
        let src = source(DomainScope::L2);
        assert_eq!(
            prepare_url(&src, "  /about  ").unwrap(),
            "http://a.test/about"
        );
        assert!(prepare_url(&src, "   ").is_none());
    }

    #[test]
    fn prepare_url_honors_domain_scope() {
        let src = source(DomainScope::L2);
        assert!(prepare_url(&src, "http://blog.a.test/x").is_some());
        assert!(prepare_url(&src, "http://other.test/x").is_none());

        let open = source(DomainScope::Unrestricted);
        assert!(prepare_url(&open, "http://other.test/x").is_some());
    }

    #[test]
    fn driver_errors_are_classified_for_reconnect() {
        assert!(is_driver_error(&CrawlError::DriverSessionLost("x".into())));
        assert!(is_driver_error(&CrawlError::DriverUnavailable("x".into())));
        assert!(!is_driver_error(&CrawlError::RuleNonFatal("x".into())));
        assert!(!is_driver_error(&CrawlError::DbUnavailable("x".into())));
    }
}
