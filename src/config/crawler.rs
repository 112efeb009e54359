//! Crawler tuning configuration

use serde::{Deserialize, Serialize};

/// Crawl-loop tuning: worker counts, pacing, depth, screenshot policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Number of page workers per crawl session (and sources claimed per batch)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Render budget between navigation and page-source capture, in seconds.
    /// Accepts a number or an arithmetic expression such as `random(2, 4)`.
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Inter-request delay per worker, seconds; number or expression.
    /// `0` disables the delay.
    #[serde(default = "default_delay")]
    pub delay: String,
    /// Deadline for a single driver call, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Interval between catalog maintenance passes, in seconds
    #[serde(default = "default_maintenance")]
    pub maintenance: u64,
    /// Maximum link-frontier depth; 0 means unlimited
    #[serde(default)]
    pub max_depth: usize,
    /// Screenshot the seed page of every source
    #[serde(default = "default_true")]
    pub source_screenshot: bool,
    /// Screenshot every crawled page, not just the seed
    #[serde(default)]
    pub full_site_screenshot: bool,
}

fn default_workers() -> usize {
    4
}

fn default_interval() -> String {
    "2".to_string()
}

fn default_delay() -> String {
    "1".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_maintenance() -> u64 {
    86_400
}

fn default_true() -> bool {
    true
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            interval: default_interval(),
            delay: default_delay(),
            timeout: default_timeout(),
            maintenance: default_maintenance(),
            max_depth: 0,
            source_screenshot: true,
            full_site_screenshot: false,
        }
    }
}
