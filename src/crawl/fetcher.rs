//! Page fetching over a leased browser session
//!
//! Navigates, waits out the configured render budget, and returns the
//! rendered DOM. Seed pages get a longer budget plus a one-shot pass that
//! dismisses consent and cookie banners before extraction.

use std::time::Duration;
use tracing::{debug, info};

use crate::browser::{Locator, Page};
use crate::error::Result;
use crate::expr;

/// Button phrases tried when dismissing consent banners on seed pages.
const ACCEPT_TEXTS: &[&str] = &["accept", "accept all", "agree", "i agree", "allow all", "ok"];
const CONSENT_TEXTS: &[&str] = &["consent", "continue", "got it", "understood"];

/// Extra render budget for seed pages, seconds.
const SEED_EXTRA_DELAY: f64 = 5.0;

/// A navigated page's rendered state.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub html: String,
}

/// Fetches pages through a leased session under the configured pacing.
pub struct PageFetcher {
    interval: String,
}

impl PageFetcher {
    pub fn new(interval: &str) -> Self {
        Self {
            interval: interval.to_string(),
        }
    }

    /// Navigate and wait for the render budget: `interval + 5s` at depth
    /// zero, `interval` below. Depth-zero pages also get the consent pass.
    pub async fn fetch(&self, page: &dyn Page, url: &str, depth: usize) -> Result<RenderedPage> {
        debug!(url, depth, "fetching page");
        page.navigate(url).await?;

        let mut budget = expr::delay_seconds(&self.interval);
        if depth == 0 {
            budget += SEED_EXTRA_DELAY;
        }
        tokio::time::sleep(Duration::from_secs_f64(budget)).await;

        if depth == 0 {
            dismiss_consent(page).await;
        }

        let final_url = page.current_url().await?;
        let html = page.page_source().await?;
        Ok(RenderedPage { final_url, html })
    }
}

/// Try to click a consent/accept button once. For each known phrase, four
/// XPath shapes are tried: id-contains, class-contains, visible-text, and
/// image alt text, all case-insensitive. The first visible and enabled
/// match is clicked; a phrase that matched nothing costs a one-second
/// settle pause before the next is tried.
pub async fn dismiss_consent(page: &dyn Page) {
    debug!("checking for consent banners");
    for phrase in ACCEPT_TEXTS.iter().chain(CONSENT_TEXTS.iter()).copied() {
        if click_phrase(page, phrase).await {
            info!(phrase, "dismissed consent banner");
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn click_phrase(page: &dyn Page, phrase: &str) -> bool {
    let lower = phrase.to_lowercase();
    let translate = "translate(., 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz')";
    let selectors = [
        format!("//*[@id[contains({translate}, '{lower}')]]"),
        format!("//*[@class[contains({translate}, '{lower}')]]"),
        format!("//*[contains({translate}, '{lower}')]"),
        format!("//img[contains(@alt, '{phrase}')]"),
    ];

    for selector in selectors {
        let Ok(elements) = page.find_elements(&Locator::XPath(selector)).await else {
            continue;
        };
        for element in elements {
            let visible = page.is_displayed(&element).await.unwrap_or(false);
            let enabled = page.is_enabled(&element).await.unwrap_or(false);
            if visible && enabled && page.click(&element).await.is_ok() {
                return true;
            }
        }
    }
    false
}
