//! Action-rule interpreter
//!
//! Applies one rule in four phases: wait conditions, guard conditions,
//! the action itself, and (for scraping rules, in the sibling module)
//! post-processing. Written against the `Page` trait so the whole
//! interpreter runs under a scripted fake in tests.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::blobstore::BlobSink;
use crate::browser::{ElementHandle, Locator, Page};
use crate::crawl::screenshot;
use crate::error::{CrawlError, Result};

use super::registry::RuleRegistry;
use super::{Action, ActionRule, Ruleset, Selector, SourceRuleConfig, WaitCondition};

/// Named text alias lists a selector's `value` may refer to instead of a
/// literal string. Matching is contains, case-insensitive.
const TEXT_ALIASES: &[(&str, &[&str])] = &[
    (
        "accept",
        &["accept", "accept all", "allow all", "i agree", "agree", "got it", "ok"],
    ),
    (
        "consent",
        &["consent", "continue", "understood", "allow cookies"],
    ),
];

/// Rule interpreter bound to a registry and a screenshot sink.
pub struct RuleEngine {
    registry: Arc<RuleRegistry>,
    blobs: Arc<BlobSink>,
}

impl RuleEngine {
    pub fn new(registry: Arc<RuleRegistry>, blobs: Arc<BlobSink>) -> Self {
        Self { registry, blobs }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Run action rules for a page: the source's configured plan when it
    /// has one, otherwise whatever ruleset or group matches the URL.
    pub async fn apply_action_plan(
        &self,
        page: &dyn Page,
        source_config: Option<&Value>,
        url: &str,
        context_id: &str,
    ) -> Result<()> {
        if let Some(raw) = source_config {
            let plan = SourceRuleConfig::from_source_config(raw, url, true)?;
            return self.run_action_plan(page, &plan, url, context_id).await;
        }

        if let Some(ruleset) = self.registry.ruleset_by_url(url) {
            debug!(ruleset = %ruleset.name, url, "running URL-matched ruleset");
            return self
                .run_ruleset_actions(page, ruleset, context_id)
                .await;
        }
        if let Some(group) = self.registry.group_by_url(url) {
            debug!(group = %group.group_name, url, "running URL-matched rule group");
            self.registry.install_env(context_id, &group.env);
            let rules: Vec<ActionRule> = group.enabled_action_rules().cloned().collect();
            let outcome = self.execute_action_rules(page, &rules, context_id).await;
            self.registry.env.clear_non_persistent(context_id);
            return outcome;
        }
        debug!(url, "no action rules match");
        Ok(())
    }

    async fn run_action_plan(
        &self,
        page: &dyn Page,
        plan: &SourceRuleConfig,
        url: &str,
        context_id: &str,
    ) -> Result<()> {
        for item in &plan.execution_plan {
            if !item.conditions.matches(url) {
                continue;
            }
            if !item.additional_conditions.is_empty()
                && !self.check_conditions(page, &item.additional_conditions).await
            {
                continue;
            }
            for name in &item.rulesets {
                if name.is_empty() {
                    continue;
                }
                match self.registry.ruleset_by_name(name) {
                    Some(ruleset) => {
                        self.run_ruleset_actions(page, ruleset, context_id).await?
                    }
                    None => warn!(name = %name, "planned ruleset not found"),
                }
            }
            for name in &item.rule_groups {
                if name.trim().is_empty() {
                    continue;
                }
                match self.registry.group_by_name(name) {
                    Some(group) => {
                        self.registry.install_env(context_id, &group.env);
                        let rules: Vec<ActionRule> =
                            group.enabled_action_rules().cloned().collect();
                        let outcome = self.execute_action_rules(page, &rules, context_id).await;
                        self.registry.env.clear_non_persistent(context_id);
                        outcome?;
                    }
                    None => warn!(name = %name, "planned rule group not found"),
                }
            }
            for name in &item.rules {
                if name.is_empty() {
                    continue;
                }
                match self.registry.action_rule_by_name(name) {
                    Some(rule) => {
                        let rule = rule.clone();
                        self.execute_rule_with_retry(page, &rule, context_id).await?
                    }
                    None => warn!(name = %name, "planned action rule not found"),
                }
            }
        }
        Ok(())
    }

    async fn run_ruleset_actions(
        &self,
        page: &dyn Page,
        ruleset: &Ruleset,
        context_id: &str,
    ) -> Result<()> {
        self.registry.install_env(context_id, &ruleset.env);
        let rules: Vec<ActionRule> = ruleset.enabled_action_rules().cloned().collect();
        let outcome = self.execute_action_rules(page, &rules, context_id).await;
        self.registry.env.clear_non_persistent(context_id);
        outcome
    }

    /// Execute rules in order. A critical failure aborts the enclosing
    /// ruleset; everything else is handled per the rule's error policy.
    pub async fn execute_action_rules(
        &self,
        page: &dyn Page,
        rules: &[ActionRule],
        context_id: &str,
    ) -> Result<()> {
        for rule in rules {
            self.execute_rule_with_retry(page, rule, context_id).await?;
        }
        Ok(())
    }

    /// Apply a rule's error policy: critical errors propagate, ignored
    /// rules swallow, the rest retry `retry_count` times with
    /// `retry_delay` seconds between attempts, then log and continue.
    pub async fn execute_rule_with_retry(
        &self,
        page: &dyn Page,
        rule: &ActionRule,
        context_id: &str,
    ) -> Result<()> {
        let mut last_error = match self.execute_action_rule(page, rule, context_id).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if last_error.is_critical() {
            return Err(last_error);
        }
        if rule.error_handling.ignore {
            debug!(rule = %rule.rule_name, "ignoring rule failure: {last_error}");
            return Ok(());
        }
        for _ in 0..rule.error_handling.retry_count {
            if rule.error_handling.retry_delay > 0 {
                tokio::time::sleep(Duration::from_secs(rule.error_handling.retry_delay)).await;
            }
            match self.execute_action_rule(page, rule, context_id).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_critical() => return Err(e),
                Err(e) => last_error = e,
            }
        }
        warn!(rule = %rule.rule_name, action = %rule.action_type, "rule failed: {last_error}");
        Ok(())
    }

    /// One attempt: wait phase, guard phase, then the action dispatch.
    pub async fn execute_action_rule(
        &self,
        page: &dyn Page,
        rule: &ActionRule,
        _context_id: &str,
    ) -> Result<()> {
        for wait in &rule.wait_conditions {
            self.wait_condition(page, wait).await?;
        }
        if !rule.conditions.is_empty() && !self.check_conditions(page, &rule.conditions).await {
            return Ok(());
        }
        self.dispatch(page, Action::parse(&rule.action_type)?, rule)
            .await
    }

    async fn wait_condition(&self, page: &dyn Page, wait: &WaitCondition) -> Result<()> {
        match wait.condition_type.trim().to_lowercase().as_str() {
            "element" | "delay" => Ok(()),
            "plugin_call" => {
                let body = self.registry.plugin(&wait.value).ok_or_else(|| {
                    CrawlError::RuleNonFatal(format!("plugin not found: {}", wait.value))
                })?;
                page.execute_script(body, Vec::new()).await?;
                Ok(())
            }
            other => Err(CrawlError::RuleNonFatal(format!(
                "wait condition not supported: {other}"
            ))),
        }
    }

    /// Guard conditions, AND semantics: an `element` key requires the CSS
    /// selector to be present, `language` requires the document language to
    /// equal the value, `plugin_call` requires the named plugin to return
    /// the literal string "true".
    pub async fn check_conditions(&self, page: &dyn Page, conditions: &Map<String, Value>) -> bool {
        if let Some(selector) = conditions.get("element").and_then(Value::as_str) {
            if page
                .find_element(&Locator::Css(selector.to_string()))
                .await
                .is_err()
            {
                return false;
            }
        }
        if let Some(language) = conditions.get("language").and_then(Value::as_str) {
            match page
                .execute_script("return document.documentElement.lang", Vec::new())
                .await
            {
                Ok(value) => {
                    if value.as_str() != Some(language) {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        if conditions.contains_key("plugin_call") {
            let Some(name) = conditions.get("selector").and_then(Value::as_str) else {
                return false;
            };
            let Some(body) = self.registry.plugin(name) else {
                return false;
            };
            match page.execute_script(body, Vec::new()).await {
                Ok(value) => {
                    let text = match value.as_str() {
                        Some(s) => s.trim().to_lowercase(),
                        None => value.to_string().trim().to_lowercase(),
                    };
                    if text != "true" {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        true
    }

    /// Resolve an element through the selector list: try each strategy in
    /// order, accept the first element whose attribute constraint and text
    /// expectation both hold. An unspecified text value counts as a match.
    pub async fn find_by_selectors(
        &self,
        page: &dyn Page,
        selectors: &[Selector],
    ) -> Result<(ElementHandle, Selector)> {
        for selector in selectors {
            let locator = match Locator::from_kind(&selector.selector_type, &selector.selector) {
                Ok(locator) => locator,
                Err(_) => continue,
            };
            let Ok(element) = page.find_element(&locator).await else {
                continue;
            };

            let attribute_ok = if selector.attribute.name.trim().is_empty() {
                true
            } else {
                match page.attribute(&element, selector.attribute.name.trim()).await {
                    Ok(Some(found)) => found
                        .trim()
                        .eq_ignore_ascii_case(selector.attribute.value.trim()),
                    _ => false,
                }
            };
            if !attribute_ok {
                continue;
            }

            if selector.value.trim().is_empty() {
                return Ok((element, selector.clone()));
            }
            if self.text_matches(page, &element, selector).await {
                return Ok((element, selector.clone()));
            }
        }
        Err(CrawlError::RuleNonFatal(
            "no element matched the selector list".to_string(),
        ))
    }

    async fn text_matches(
        &self,
        page: &dyn Page,
        element: &ElementHandle,
        selector: &Selector,
    ) -> bool {
        let Ok(text) = page.text(element).await else {
            return false;
        };
        let text = text.trim().to_lowercase();
        let expected = selector.value.trim().to_lowercase();

        if let Some((_, aliases)) = TEXT_ALIASES.iter().find(|(name, _)| *name == expected) {
            return aliases
                .iter()
                .any(|alias| text.contains(&alias.trim().to_lowercase()));
        }
        text == expected
    }

    async fn dispatch(&self, page: &dyn Page, action: Action, rule: &ActionRule) -> Result<()> {
        match action {
            Action::Click => {
                let (element, _) = self.find_by_selectors(page, &rule.selectors).await?;
                page.click(&element).await
            }
            Action::Scroll => {
                let target = if rule.value.is_empty() {
                    "document.body.scrollHeight"
                } else {
                    rule.value.as_str()
                };
                page.execute_script(&format!("window.scrollTo(0, {target})"), Vec::new())
                    .await?;
                Ok(())
            }
            Action::InputText => {
                let (element, selector) = self.find_by_selectors(page, &rule.selectors).await?;
                let text = if selector.value.is_empty() {
                    rule.value.as_str()
                } else {
                    selector.value.as_str()
                };
                page.send_keys(&element, text).await
            }
            Action::Clear => {
                let (element, _) = self.find_by_selectors(page, &rule.selectors).await?;
                page.clear(&element).await
            }
            Action::Custom => self.run_custom_plugins(page, rule).await,
            Action::TakeScreenshot => self.take_screenshot(page, &rule.value).await,
            Action::KeyDown => page.key_down(&rule.value).await,
            Action::KeyUp => page.key_up(&rule.value).await,
            Action::MouseHover => {
                let (element, _) = self.find_by_selectors(page, &rule.selectors).await?;
                self.dispatch_mouse_event(page, &element, &["mousemove"]).await
            }
            Action::Forward => page.go_forward().await,
            Action::Back => page.go_back().await,
            Action::Refresh => page.refresh().await,
            Action::SwitchFrame => {
                let (element, _) = self.find_by_selectors(page, &rule.selectors).await?;
                page.switch_frame(&element).await
            }
            Action::SwitchWindow => page.switch_window(&rule.value).await,
            Action::ScrollToElement => {
                let (element, _) = self.find_by_selectors(page, &rule.selectors).await?;
                page.execute_script(
                    "arguments[0].scrollIntoView({block: 'center'})",
                    vec![element.as_script_arg()],
                )
                .await?;
                Ok(())
            }
            Action::ScrollByAmount => {
                let amount: i64 = rule.value.trim().parse().unwrap_or(0);
                page.execute_script(&format!("window.scrollBy(0, {amount})"), Vec::new())
                    .await?;
                Ok(())
            }
            Action::ClickAndHold => {
                let (element, _) = self.find_by_selectors(page, &rule.selectors).await?;
                self.dispatch_mouse_event(page, &element, &["mousemove", "mousedown"])
                    .await
            }
            Action::Release => {
                if rule.selectors.is_empty() {
                    page.execute_script(
                        "var elem = document.elementFromPoint(0, 0) || document.body;\
                         elem.dispatchEvent(new MouseEvent('mouseup', \
                         {bubbles: true, cancelable: true, view: window}));",
                        Vec::new(),
                    )
                    .await?;
                    Ok(())
                } else {
                    let (element, _) = self.find_by_selectors(page, &rule.selectors).await?;
                    self.dispatch_mouse_event(page, &element, &["mouseup"]).await
                }
            }
            Action::NavigateToUrl => page.navigate(&rule.value).await,
        }
    }

    async fn dispatch_mouse_event(
        &self,
        page: &dyn Page,
        element: &ElementHandle,
        events: &[&str],
    ) -> Result<()> {
        let body: String = events
            .iter()
            .map(|event| {
                format!(
                    "arguments[0].dispatchEvent(new MouseEvent('{event}', \
                     {{bubbles: true, cancelable: true, \
                     clientX: arguments[0].getBoundingClientRect().left, \
                     clientY: arguments[0].getBoundingClientRect().top, \
                     view: window}}));"
                )
            })
            .collect();
        page.execute_script(&body, vec![element.as_script_arg()])
            .await?;
        Ok(())
    }

    async fn run_custom_plugins(&self, page: &dyn Page, rule: &ActionRule) -> Result<()> {
        for selector in &rule.selectors {
            if selector.selector_type != "plugin_call" {
                continue;
            }
            let body = self.registry.plugin(&selector.selector).ok_or_else(|| {
                CrawlError::RuleNonFatal(format!("plugin not found: {}", selector.selector))
            })?;
            page.execute_script(body, vec![json!(rule.value.clone())]).await?;
        }
        Ok(())
    }

    /// The `take_screenshot` action value is either a filename or
    /// `"maxHeight,filename"`; height 0 captures the full page.
    async fn take_screenshot(&self, page: &dyn Page, value: &str) -> Result<()> {
        let (max_height, name) = match value.split_once(',') {
            Some((height, name)) => (height.trim().parse().unwrap_or(0), name.trim()),
            None => (0u32, value.trim()),
        };
        let bytes = screenshot::capture_stitched(page, max_height).await?;
        self.blobs.put(name, bytes).await?;
        Ok(())
    }
}
