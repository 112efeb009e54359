//! Sitehound: distributed web crawling and indexing engine
//!
//! A crawl-orchestration daemon that:
//! - Claims seed URLs atomically from a shared Postgres catalog
//! - Drives a pool of remote W3C-automation browser sessions to render pages
//! - Applies user-defined action and scraping rule sets to rendered pages
//! - Expands a depth-bounded link frontier per source with bounded workers
//! - Indexes page content, meta tags, and keyword postings transactionally
//! - Captures stitched full-page screenshots into pluggable blob storage

pub mod blobstore;
pub mod browser;
pub mod catalog;
pub mod config;
pub mod crawl;
pub mod error;
pub mod expr;
pub mod rules;
pub mod util;

pub use config::Config;
pub use error::{CrawlError, Result};
