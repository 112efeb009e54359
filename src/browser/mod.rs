//! Bounded pool of remote browser sessions
//!
//! Parallelism across sources comes from holding several sessions; within a
//! crawl session the single leased handle is used sequentially. The pool is
//! a channel of live sessions: leasing blocks until one is free, returning
//! health-checks the session and replaces it when the remote side died.

mod page;
mod wire;

pub use page::{ElementHandle, Locator, Page};
pub use wire::WireSession;

use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{BrowserConfig, BrowserKind};
use crate::error::{CrawlError, Result};

/// Attempts made to (re-)establish a remote session before the lease is
/// abandoned.
const RECONNECT_ATTEMPTS: usize = 5;
/// Pause between reconnect attempts.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Synthetic user agents keyed by browser family and form factor.
const USER_AGENTS: &[(BrowserKind, bool, &str)] = &[
    (
        BrowserKind::Chrome,
        false,
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    ),
    (
        BrowserKind::Chrome,
        true,
        "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
    ),
    (
        BrowserKind::Firefox,
        false,
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    ),
    (
        BrowserKind::Firefox,
        true,
        "Mozilla/5.0 (Android 14; Mobile; rv:126.0) Gecko/126.0 Firefox/126.0",
    ),
    (
        BrowserKind::Edge,
        false,
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
    ),
    (
        BrowserKind::Edge,
        true,
        "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36 EdgA/124.0.0.0",
    ),
];

/// Chromium launch switches shared by the chrome and edge families.
const CHROMIUM_ARGS: &[&str] = &[
    "--window-size=1920,1080",
    "--no-sandbox",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--incognito",
    "--disable-popup-blocking",
    "--disable-infobars",
    "--disable-extensions",
];

/// Per-session launch settings derived from config.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub kind: BrowserKind,
    pub headless: bool,
    pub mobile: bool,
}

impl SessionSettings {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            kind: config.kind,
            headless: config.headless,
            mobile: config.mobile,
        }
    }

    /// Synthetic user agent for this browser family and form factor.
    pub fn user_agent(&self) -> &'static str {
        USER_AGENTS
            .iter()
            .find(|(kind, mobile, _)| *kind == self.kind && *mobile == self.mobile)
            .map(|(_, _, ua)| *ua)
            .unwrap_or(USER_AGENTS[0].2)
    }

    /// Launch argument list for the requested family.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = match self.kind {
            BrowserKind::Chrome | BrowserKind::Edge => {
                CHROMIUM_ARGS.iter().map(|a| a.to_string()).collect()
            }
            BrowserKind::Firefox => vec!["-width=1920".to_string(), "-height=1080".to_string()],
        };
        if self.headless {
            args.push(match self.kind {
                BrowserKind::Firefox => "-headless".to_string(),
                _ => "--headless=new".to_string(),
            });
        }
        if self.kind != BrowserKind::Firefox {
            args.push(format!("--user-agent={}", self.user_agent()));
        }
        args
    }

    /// W3C `alwaysMatch` capabilities for a new session.
    pub fn capabilities(&self) -> Value {
        let args = self.launch_args();
        match self.kind {
            BrowserKind::Chrome | BrowserKind::Edge => json!({
                "browserName": self.kind.as_str(),
                "goog:chromeOptions": { "args": args },
            }),
            BrowserKind::Firefox => json!({
                "browserName": self.kind.as_str(),
                "moz:firefoxOptions": {
                    "args": args,
                    "prefs": { "general.useragent.override": self.user_agent() },
                },
            }),
        }
    }
}

/// Fixed-size pool of live sessions.
pub struct BrowserPool {
    hub_url: String,
    settings: SessionSettings,
    call_deadline: Duration,
    tx: mpsc::Sender<WireSession>,
    rx: tokio::sync::Mutex<mpsc::Receiver<WireSession>>,
    size: usize,
}

impl BrowserPool {
    /// Open `config.sessions` sessions against the remote endpoint.
    /// Failing to open any session at boot is fatal.
    pub async fn connect(config: &BrowserConfig, call_deadline: Duration) -> Result<Self> {
        let settings = SessionSettings::from_config(config);
        let hub_url = config.hub_url();
        let (tx, rx) = mpsc::channel(config.sessions);

        let pool = Self {
            hub_url,
            settings,
            call_deadline,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            size: config.sessions,
        };

        for slot in 0..pool.size {
            let session = pool.open_with_retry().await?;
            debug!(slot, session = session.session_id(), "browser session opened");
            pool.tx
                .send(session)
                .await
                .map_err(|_| CrawlError::DriverUnavailable("pool channel closed".into()))?;
        }
        info!(sessions = pool.size, hub = %pool.hub_url, "browser pool ready");
        Ok(pool)
    }

    /// Lease a session. Blocks until one is free.
    pub async fn lease(&self) -> Result<WireSession> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| CrawlError::DriverUnavailable("browser pool closed".into()))
    }

    /// Return a session to the pool. An unhealthy session is disposed and a
    /// replacement opened; if the replacement cannot be opened the lease is
    /// abandoned and the pool shrinks by one.
    pub async fn give_back(&self, session: WireSession) {
        let healthy = session.current_url().await.is_ok();
        let returned = if healthy {
            session
        } else {
            warn!(session = session.session_id(), "session unhealthy, replacing");
            let _ = session.quit().await;
            match self.open_with_retry().await {
                Ok(replacement) => replacement,
                Err(e) => {
                    warn!("abandoning pool slot: {e}");
                    return;
                }
            }
        };
        if self.tx.send(returned).await.is_err() {
            debug!("pool closed while returning session");
        }
    }

    /// Re-establish a remote session after a transient protocol failure.
    pub async fn reconnect(&self, broken: WireSession) -> Result<WireSession> {
        let _ = broken.quit().await;
        self.open_with_retry().await
    }

    async fn open_with_retry(&self) -> Result<WireSession> {
        let capabilities = self.settings.capabilities();
        let mut last_err = CrawlError::DriverUnavailable("no attempt made".into());
        for attempt in 1..=RECONNECT_ATTEMPTS {
            match WireSession::open(&self.hub_url, &capabilities, self.call_deadline).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!(attempt, "failed to open browser session: {e}");
                    last_err = e;
                    if attempt < RECONNECT_ATTEMPTS {
                        tokio::time::sleep(RECONNECT_INTERVAL).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    /// Quit every pooled session. Leased sessions are the lessee's job.
    pub async fn shutdown(&self) {
        let mut rx = self.rx.lock().await;
        while let Ok(session) = rx.try_recv() {
            if let Err(e) = session.quit().await {
                debug!("error quitting session at shutdown: {e}");
            }
        }
        info!("browser pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(kind: BrowserKind, mobile: bool) -> SessionSettings {
        SessionSettings {
            kind,
            headless: true,
            mobile,
        }
    }

    #[test]
    fn user_agent_table_covers_family_and_form_factor() {
        let desktop = settings(BrowserKind::Chrome, false).user_agent();
        let mobile = settings(BrowserKind::Chrome, true).user_agent();
        assert!(desktop.contains("Chrome"));
        assert!(!desktop.contains("Mobile"));
        assert!(mobile.contains("Mobile"));

        let firefox = settings(BrowserKind::Firefox, false).user_agent();
        assert!(firefox.contains("Firefox"));
    }

    #[test]
    fn chromium_launch_args_include_headless_and_agent() {
        let args = settings(BrowserKind::Chrome, false).launch_args();
        assert!(args.iter().any(|a| a == "--headless=new"));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=")));
        assert!(args.iter().any(|a| a == "--no-sandbox"));
    }

    #[test]
    fn firefox_uses_pref_override_instead_of_switch() {
        let caps = settings(BrowserKind::Firefox, false).capabilities();
        assert_eq!(caps["browserName"], "firefox");
        assert!(caps["moz:firefoxOptions"]["prefs"]["general.useragent.override"]
            .as_str()
            .unwrap()
            .contains("Firefox"));
    }

    #[test]
    fn headed_sessions_omit_headless_switch() {
        let mut s = settings(BrowserKind::Edge, false);
        s.headless = false;
        assert!(!s.launch_args().iter().any(|a| a.contains("headless")));
    }
}
