//! Remote browser endpoint configuration

use serde::{Deserialize, Serialize};

/// Browser family driven through the remote automation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Firefox,
    Edge,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Edge => "MicrosoftEdge",
        }
    }
}

/// Settings for the remote W3C automation endpoint and the sessions
/// requested from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Hostname of the automation endpoint
    pub host: String,
    /// Port of the automation endpoint
    pub port: u16,
    /// Browser family to request
    #[serde(rename = "type")]
    pub kind: BrowserKind,
    /// Run without a visible window
    pub headless: bool,
    /// `enable` to reach the endpoint over https
    pub ssl_mode: String,
    /// Number of concurrent sessions held in the pool
    pub sessions: usize,
    /// Request a mobile-form-factor user agent instead of desktop
    pub mobile: bool,
}

impl BrowserConfig {
    /// Base URL of the remote endpoint, e.g. `http://browser:4444/wd/hub`.
    pub fn hub_url(&self) -> String {
        let protocol = if self.ssl_mode == "enable" { "https" } else { "http" };
        format!("{}://{}:{}/wd/hub", protocol, self.host, self.port)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4444,
            kind: BrowserKind::Chrome,
            headless: true,
            ssl_mode: String::new(),
            sessions: 2,
            mobile: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_url_respects_ssl_mode() {
        let mut cfg = BrowserConfig::default();
        assert_eq!(cfg.hub_url(), "http://localhost:4444/wd/hub");
        cfg.ssl_mode = "enable".to_string();
        cfg.host = "grid.internal".to_string();
        assert_eq!(cfg.hub_url(), "https://grid.internal:4444/wd/hub");
    }
}
