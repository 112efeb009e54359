//! Rule model consumed by the interpreter
//!
//! These are the value objects produced by the external rule-definition
//! parser: action rules that prepare a page, scraping rules that extract
//! structured data, grouped into rule groups and rulesets matched by URL
//! pattern, plus the per-source execution plan that selects among them.

pub mod engine;
pub mod registry;
pub mod scraping;

pub use engine::RuleEngine;
pub use registry::{EnvStore, RuleRegistry};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CrawlError, Result};

fn default_enabled() -> bool {
    true
}

/// Attribute constraint on a located element.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectorAttribute {
    pub name: String,
    pub value: String,
}

/// One element-selection attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Selector {
    /// Lookup strategy: css, xpath, id, name, link_text, partial_link_text,
    /// tag_name, class_name, or plugin_call for custom actions
    pub selector_type: String,
    /// Strategy operand
    pub selector: String,
    /// Output field name when used by a scraping rule
    #[serde(default)]
    pub key: String,
    /// Required attribute match, if any
    #[serde(default)]
    pub attribute: SelectorAttribute,
    /// Expected element text: direct equality or the name of a text alias
    /// list. Empty means any text matches.
    #[serde(default)]
    pub value: String,
    /// Attribute to extract instead of the element text (scraping rules)
    #[serde(default)]
    pub extract_attribute: String,
}

impl Selector {
    pub fn new(selector_type: &str, selector: &str) -> Self {
        Self {
            selector_type: selector_type.to_string(),
            selector: selector.to_string(),
            key: String::new(),
            attribute: SelectorAttribute::default(),
            value: String::new(),
            extract_attribute: String::new(),
        }
    }
}

/// Pre-action wait step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitCondition {
    pub condition_type: String,
    #[serde(default)]
    pub value: String,
}

/// Per-rule failure policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ErrorHandling {
    /// Swallow the failure without retrying
    pub ignore: bool,
    /// Retries after the first failed attempt
    pub retry_count: u32,
    /// Seconds between attempts
    pub retry_delay: u64,
}

/// Page-preparation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRule {
    #[serde(default)]
    pub rule_name: String,
    pub action_type: String,
    #[serde(default)]
    pub selectors: Vec<Selector>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub wait_conditions: Vec<WaitCondition>,
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// One post-extraction transformation over the scraped JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessingStep {
    pub step_type: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

/// Structured-extraction rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingRule {
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub selectors: Vec<Selector>,
    #[serde(default)]
    pub wait_conditions: Vec<WaitCondition>,
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default)]
    pub post_processing: Vec<PostProcessingStep>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Environment entry installed while a group or ruleset executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvEntry {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    /// Persistent entries survive the enclosing group's context scope
    #[serde(default)]
    pub persistent: bool,
}

/// Named collection of rules matched by URL pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleGroup {
    pub group_name: String,
    pub url_patterns: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub action_rules: Vec<ActionRule>,
    pub scraping_rules: Vec<ScrapingRule>,
    pub env: Vec<EnvEntry>,
}

impl RuleGroup {
    pub fn enabled_action_rules(&self) -> impl Iterator<Item = &ActionRule> {
        self.action_rules.iter().filter(|r| r.enabled)
    }

    pub fn enabled_scraping_rules(&self) -> impl Iterator<Item = &ScrapingRule> {
        self.scraping_rules.iter().filter(|r| r.enabled)
    }
}

/// Named collection of rule groups matched by URL pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ruleset {
    pub name: String,
    pub url_patterns: Vec<String>,
    pub groups: Vec<RuleGroup>,
    pub env: Vec<EnvEntry>,
}

impl Ruleset {
    /// Action rules of every enabled group, in declaration order.
    pub fn enabled_action_rules(&self) -> impl Iterator<Item = &ActionRule> {
        self.groups
            .iter()
            .filter(|g| g.enabled)
            .flat_map(|g| g.enabled_action_rules())
    }

    /// Scraping rules of every enabled group, in declaration order.
    pub fn enabled_scraping_rules(&self) -> impl Iterator<Item = &ScrapingRule> {
        self.groups
            .iter()
            .filter(|g| g.enabled)
            .flat_map(|g| g.enabled_scraping_rules())
    }
}

/// URL-pattern gate on an execution plan entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanConditions {
    pub url_patterns: Vec<String>,
}

impl PlanConditions {
    /// A plan entry applies only when the page URL matches every listed
    /// pattern. No patterns means unconditional.
    pub fn matches(&self, url: &str) -> bool {
        self.url_patterns.iter().all(|p| url.contains(p.as_str()))
    }
}

/// One entry of a source's execution plan: any mix of rulesets, rule
/// groups, and individual rules by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPlanItem {
    pub label: String,
    pub conditions: PlanConditions,
    pub additional_conditions: Map<String, Value>,
    pub rulesets: Vec<String>,
    pub rule_groups: Vec<String>,
    pub rules: Vec<String>,
}

/// Per-source rule configuration document (the `config` catalog column).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRuleConfig {
    pub format_version: String,
    pub source_name: String,
    pub execution_plan: Vec<ExecutionPlanItem>,
}

impl SourceRuleConfig {
    /// Built-in plan applied when a source's config is `{"config":"default"}`:
    /// run the bundled consent-acceptance group against the seed.
    pub fn default_action_plan(url: &str) -> Self {
        Self {
            format_version: "1.0".to_string(),
            source_name: "default".to_string(),
            execution_plan: vec![ExecutionPlanItem {
                label: "default action plan".to_string(),
                conditions: PlanConditions {
                    url_patterns: vec![url.to_string()],
                },
                rule_groups: vec![registry::CONSENT_GROUP.to_string()],
                ..ExecutionPlanItem::default()
            }],
        }
    }

    /// Built-in scraping plan for default-configured sources. Empty rule
    /// list: structured extraction is opt-in per source.
    pub fn default_scraping_plan(url: &str) -> Self {
        Self {
            format_version: "1.0".to_string(),
            source_name: "default".to_string(),
            execution_plan: vec![ExecutionPlanItem {
                label: "default scraping plan".to_string(),
                conditions: PlanConditions {
                    url_patterns: vec![url.to_string()],
                },
                ..ExecutionPlanItem::default()
            }],
        }
    }

    /// Interpret a source's raw config column: `{"config":"default"}`
    /// selects the built-in plans, anything else must parse as a full
    /// rule-config document.
    pub fn from_source_config(raw: &Value, url: &str, for_actions: bool) -> Result<Self> {
        if raw.get("config").and_then(Value::as_str) == Some("default") {
            return Ok(if for_actions {
                Self::default_action_plan(url)
            } else {
                Self::default_scraping_plan(url)
            });
        }
        serde_json::from_value(raw.clone())
            .map_err(|e| CrawlError::RuleNonFatal(format!("invalid source rule config: {e}")))
    }
}

/// Action kinds dispatched by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Click,
    Scroll,
    InputText,
    Clear,
    Custom,
    TakeScreenshot,
    KeyDown,
    KeyUp,
    MouseHover,
    Forward,
    Back,
    Refresh,
    SwitchFrame,
    SwitchWindow,
    ScrollToElement,
    ScrollByAmount,
    ClickAndHold,
    Release,
    NavigateToUrl,
}

impl Action {
    /// Parse an action-type string. Unknown kinds are an explicit error
    /// rather than a silent no-op.
    pub fn parse(kind: &str) -> Result<Self> {
        match kind.trim().to_lowercase().as_str() {
            "click" => Ok(Self::Click),
            "scroll" => Ok(Self::Scroll),
            "input_text" => Ok(Self::InputText),
            "clear" => Ok(Self::Clear),
            "custom" => Ok(Self::Custom),
            "take_screenshot" => Ok(Self::TakeScreenshot),
            "key_down" => Ok(Self::KeyDown),
            "key_up" => Ok(Self::KeyUp),
            "mouse_hover" => Ok(Self::MouseHover),
            "forward" => Ok(Self::Forward),
            "back" => Ok(Self::Back),
            "refresh" => Ok(Self::Refresh),
            "switch_to_frame" => Ok(Self::SwitchFrame),
            "switch_to_window" => Ok(Self::SwitchWindow),
            "scroll_to_element" => Ok(Self::ScrollToElement),
            "scroll_by_amount" => Ok(Self::ScrollByAmount),
            "click_and_hold" => Ok(Self::ClickAndHold),
            "release" => Ok(Self::Release),
            "navigate_to_url" => Ok(Self::NavigateToUrl),
            other => Err(CrawlError::RuleNonFatal(format!(
                "action type not supported: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_parsing_covers_all_kinds_and_rejects_unknown() {
        assert_eq!(Action::parse("click").unwrap(), Action::Click);
        assert_eq!(Action::parse(" Scroll ").unwrap(), Action::Scroll);
        assert_eq!(Action::parse("switch_to_frame").unwrap(), Action::SwitchFrame);
        assert_eq!(Action::parse("navigate_to_url").unwrap(), Action::NavigateToUrl);
        assert!(Action::parse("teleport").is_err());
    }

    #[test]
    fn plan_conditions_and_over_all_patterns() {
        let conditions = PlanConditions {
            url_patterns: vec!["a.test".to_string(), "/articles".to_string()],
        };
        assert!(conditions.matches("http://a.test/articles/1"));
        // One matching pattern is not enough
        assert!(!conditions.matches("http://a.test/home"));
        assert!(!conditions.matches("http://b.test/articles/1"));
        // No patterns means unconditional
        assert!(PlanConditions::default().matches("http://anything/"));
    }

    #[test]
    fn default_marker_selects_builtin_plans() {
        let raw = json!({"config": "default"});
        let plan = SourceRuleConfig::from_source_config(&raw, "http://a.test/", true).unwrap();
        assert_eq!(
            serde_json::to_value(&plan).unwrap(),
            serde_json::to_value(SourceRuleConfig::default_action_plan("http://a.test/")).unwrap()
        );
        assert_eq!(
            plan.execution_plan[0].rule_groups,
            vec![registry::CONSENT_GROUP.to_string()]
        );

        let scraping =
            SourceRuleConfig::from_source_config(&raw, "http://a.test/", false).unwrap();
        assert!(scraping.execution_plan[0].rules.is_empty());
    }

    #[test]
    fn explicit_config_documents_parse() {
        let raw = json!({
            "format_version": "1.0",
            "source_name": "news",
            "execution_plan": [{
                "label": "articles",
                "conditions": { "url_patterns": ["/articles"] },
                "rules": ["headline"],
            }],
        });
        let plan = SourceRuleConfig::from_source_config(&raw, "http://a.test/", true).unwrap();
        assert_eq!(plan.execution_plan.len(), 1);
        assert_eq!(plan.execution_plan[0].rules, vec!["headline".to_string()]);
    }

    #[test]
    fn rule_documents_deserialize_with_defaults() {
        let rule: ActionRule = serde_json::from_value(json!({
            "action_type": "click",
            "selectors": [{ "selector_type": "css", "selector": "#go" }],
        }))
        .unwrap();
        assert!(rule.enabled);
        assert!(!rule.error_handling.ignore);
        assert_eq!(rule.error_handling.retry_count, 0);
        assert_eq!(rule.selectors[0].selector, "#go");
    }
}
