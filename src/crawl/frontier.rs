//! Per-session link frontier
//!
//! Two URL lists per crawl session: the level being worked and the level
//! being discovered. Workers append under a mutex; the orchestrator swaps
//! at the level boundary, where deduplication against everything already
//! crawled this session happens. Depth is bounded by `max_depth`; zero
//! means unlimited.

use parking_lot::Mutex;
use std::collections::HashSet;

use super::extractor::combine_urls;

/// Link frontier for one source crawl.
pub struct Frontier {
    source_url: String,
    max_depth: usize,
    depth: usize,
    current_level: Vec<String>,
    next_level: Mutex<Vec<String>>,
    seen: HashSet<String>,
}

impl Frontier {
    /// Start a frontier from the links discovered on the seed page.
    pub fn new(source_url: &str, max_depth: usize, seed_links: Vec<String>) -> Self {
        let mut frontier = Self {
            source_url: source_url.to_string(),
            max_depth,
            depth: 0,
            current_level: Vec::new(),
            next_level: Mutex::new(Vec::new()),
            seen: HashSet::new(),
        };
        let normalized = frontier.normalize(seed_links);
        frontier.current_level = frontier.dedup_level(normalized);
        frontier
    }

    /// Levels completed so far.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// URLs of the level currently being worked.
    pub fn current(&self) -> &[String] {
        &self.current_level
    }

    /// Whether another level should be expanded.
    pub fn should_expand(&self) -> bool {
        !self.current_level.is_empty() && (self.max_depth == 0 || self.depth < self.max_depth)
    }

    /// Append discovered URLs to the next level. Normalization trims,
    /// resolves relative hrefs against the source, and drops empties;
    /// per-URL dedup waits for the level boundary.
    pub fn enqueue(&self, urls: Vec<String>) {
        let normalized = self.normalize(urls);
        if normalized.is_empty() {
            return;
        }
        self.next_level.lock().extend(normalized);
    }

    /// Level boundary: swap in the next level (deduplicated against the
    /// whole session) and bump the depth counter.
    pub fn advance(&mut self) {
        let pending = std::mem::take(&mut *self.next_level.lock());
        self.current_level = self.dedup_level(pending);
        self.depth += 1;
    }

    fn normalize(&self, urls: Vec<String>) -> Vec<String> {
        urls.into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .filter_map(|url| {
                if url.starts_with('/') {
                    combine_urls(&self.source_url, &url)
                } else {
                    Some(url)
                }
            })
            .collect()
    }

    fn dedup_level(&mut self, urls: Vec<String>) -> Vec<String> {
        let mut level = Vec::new();
        for url in urls {
            if self.seen.insert(url.clone()) {
                level.push(url);
            }
        }
        level
    }
}
