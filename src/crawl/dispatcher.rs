//! Source dispatcher
//!
//! The top-level loop: claim a batch of eligible sources from the
//! catalog, run one crawl session per claim, repeat. When the catalog has
//! nothing to offer the loop idles for a minute and uses the quiet time
//! for table maintenance. A termination signal stops claiming and closes
//! the browser pool and catalog connection; claims that die with the
//! process become reclaimable through the catalog's staleness rules.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::CrawlSession;
use super::Runtime;

/// Idle sleep when the catalog has no eligible sources.
const IDLE_SLEEP: Duration = Duration::from_secs(60);

/// Top-level claim-and-dispatch loop.
pub struct Dispatcher {
    runtime: Arc<Runtime>,
}

impl Dispatcher {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let maintenance_every =
            Duration::from_secs(self.runtime.config.crawler.maintenance.max(60));
        let mut next_maintenance = Instant::now() + maintenance_every;

        info!(
            workers = self.runtime.config.crawler.workers,
            "dispatcher started"
        );

        loop {
            let batch_size = self.runtime.config.crawler.workers as i64;
            let claims = match self.runtime.catalog.claim_batch(batch_size).await {
                Ok(claims) => claims,
                Err(e) => {
                    warn!("claiming sources failed: {e}");
                    if wait_or_shutdown(&mut shutdown, IDLE_SLEEP).await {
                        break;
                    }
                    continue;
                }
            };

            if claims.is_empty() {
                debug!("no sources to crawl");
                if Instant::now() >= next_maintenance {
                    self.runtime.catalog.maintenance().await;
                    next_maintenance = Instant::now() + maintenance_every;
                }
                if wait_or_shutdown(&mut shutdown, IDLE_SLEEP).await {
                    break;
                }
                continue;
            }

            info!(claimed = claims.len(), "dispatching crawl sessions");
            let mut sessions = JoinSet::new();
            for source in claims {
                let session = CrawlSession::new(self.runtime.clone(), source);
                sessions.spawn(session.run());
            }
            while let Some(joined) = sessions.join_next().await {
                if let Err(e) = joined {
                    warn!("crawl session task failed: {e}");
                }
            }

            if shutdown.try_recv().is_ok() {
                break;
            }
        }

        info!("dispatcher shutting down");
        self.runtime.browsers.shutdown().await;
        self.runtime.catalog.close().await;
    }
}

/// Sleep, but wake early on shutdown. Returns true when shutdown fired.
async fn wait_or_shutdown(shutdown: &mut broadcast::Receiver<()>, period: Duration) -> bool {
    tokio::select! {
        _ = shutdown.recv() => true,
        _ = tokio::time::sleep(period) => false,
    }
}
