//! Rule, plugin, and environment registries
//!
//! Holds the parsed rulesets/groups/rules for name and URL-pattern lookup,
//! the JavaScript plugin bodies referenced by rules, and the key-value
//! environment scoped by context id that plugins read while a group runs.

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use super::{ActionRule, EnvEntry, ErrorHandling, RuleGroup, Ruleset, ScrapingRule, Selector};

/// Name of the bundled consent-acceptance rule group referenced by the
/// default execution plan.
pub const CONSENT_GROUP: &str = "consent_acceptance";

/// Key-value environment for rule plugins, scoped by context id.
///
/// Non-persistent entries are wiped when the enclosing ruleset or group
/// finishes; persistent ones survive for the life of the crawl session.
#[derive(Debug, Default)]
pub struct EnvStore {
    entries: DashMap<(String, String), (Value, bool)>,
}

impl EnvStore {
    pub fn set(&self, context_id: &str, key: &str, value: Value, persistent: bool) {
        self.entries
            .insert((context_id.to_string(), key.to_string()), (value, persistent));
    }

    pub fn get(&self, context_id: &str, key: &str) -> Option<Value> {
        self.entries
            .get(&(context_id.to_string(), key.to_string()))
            .map(|entry| entry.0.clone())
    }

    /// Drop every non-persistent entry belonging to `context_id`.
    pub fn clear_non_persistent(&self, context_id: &str) {
        self.entries
            .retain(|(cid, _), (_, persistent)| *persistent || cid.as_str() != context_id);
    }
}

/// URL-pattern match: regex when the pattern compiles, plain substring
/// otherwise.
fn pattern_matches(pattern: &str, url: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(url),
        Err(_) => url.contains(pattern),
    }
}

/// Lookup tables for everything the interpreter dispatches by name or URL.
pub struct RuleRegistry {
    rulesets: HashMap<String, Ruleset>,
    groups: HashMap<String, RuleGroup>,
    action_rules: HashMap<String, ActionRule>,
    scraping_rules: HashMap<String, ScrapingRule>,
    plugins: HashMap<String, String>,
    pub env: EnvStore,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleRegistry {
    /// Empty registry plus the bundled consent group.
    pub fn new() -> Self {
        let mut registry = Self {
            rulesets: HashMap::new(),
            groups: HashMap::new(),
            action_rules: HashMap::new(),
            scraping_rules: HashMap::new(),
            plugins: HashMap::new(),
            env: EnvStore::default(),
        };
        registry.add_group(builtin_consent_group());
        registry
    }

    /// Register a ruleset and index its groups and rules by name.
    pub fn add_ruleset(&mut self, ruleset: Ruleset) {
        for group in &ruleset.groups {
            self.index_group(group.clone());
        }
        if self.rulesets.insert(ruleset.name.clone(), ruleset).is_some() {
            warn!("replaced ruleset with duplicate name");
        }
    }

    /// Register a standalone rule group.
    pub fn add_group(&mut self, group: RuleGroup) {
        self.index_group(group);
    }

    fn index_group(&mut self, group: RuleGroup) {
        for rule in &group.action_rules {
            if !rule.rule_name.is_empty() {
                self.action_rules.insert(rule.rule_name.clone(), rule.clone());
            }
        }
        for rule in &group.scraping_rules {
            if !rule.rule_name.is_empty() {
                self.scraping_rules
                    .insert(rule.rule_name.clone(), rule.clone());
            }
        }
        self.groups.insert(group.group_name.clone(), group);
    }

    /// Register a JavaScript plugin body under a name.
    pub fn add_plugin(&mut self, name: &str, body: &str) {
        self.plugins.insert(name.to_string(), body.to_string());
    }

    pub fn ruleset_by_name(&self, name: &str) -> Option<&Ruleset> {
        self.rulesets.get(name)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&RuleGroup> {
        self.groups.get(name)
    }

    pub fn action_rule_by_name(&self, name: &str) -> Option<&ActionRule> {
        self.action_rules.get(name)
    }

    pub fn scraping_rule_by_name(&self, name: &str) -> Option<&ScrapingRule> {
        self.scraping_rules.get(name)
    }

    pub fn plugin(&self, name: &str) -> Option<&str> {
        self.plugins.get(name).map(String::as_str)
    }

    /// First ruleset whose URL patterns match the page.
    pub fn ruleset_by_url(&self, url: &str) -> Option<&Ruleset> {
        self.rulesets.values().find(|rs| {
            !rs.url_patterns.is_empty() && rs.url_patterns.iter().any(|p| pattern_matches(p, url))
        })
    }

    /// First rule group whose URL patterns match the page.
    pub fn group_by_url(&self, url: &str) -> Option<&RuleGroup> {
        self.groups.values().find(|g| {
            g.enabled
                && !g.url_patterns.is_empty()
                && g.url_patterns.iter().any(|p| pattern_matches(p, url))
        })
    }

    /// Install a group's or ruleset's environment entries for a context.
    pub fn install_env(&self, context_id: &str, entries: &[EnvEntry]) {
        for entry in entries {
            self.env
                .set(context_id, &entry.key, entry.value.clone(), entry.persistent);
        }
    }
}

/// Consent-banner clicker shipped with the engine, used by default plans.
/// Selectors mirror the depth-0 dismissal pass in the fetcher; failures
/// are ignored because most pages have no banner.
fn builtin_consent_group() -> RuleGroup {
    let phrases = ["accept", "agree", "consent"];
    let action_rules = phrases
        .iter()
        .map(|phrase| ActionRule {
            rule_name: format!("consent_click_{phrase}"),
            action_type: "click".to_string(),
            selectors: vec![Selector::new(
                "xpath",
                &format!(
                    "//*[contains(translate(., 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', \
                     'abcdefghijklmnopqrstuvwxyz'), '{phrase}')]"
                ),
            )],
            value: String::new(),
            wait_conditions: Vec::new(),
            conditions: serde_json::Map::new(),
            error_handling: ErrorHandling {
                ignore: true,
                ..ErrorHandling::default()
            },
            enabled: true,
        })
        .collect();

    RuleGroup {
        group_name: CONSENT_GROUP.to_string(),
        url_patterns: Vec::new(),
        enabled: true,
        action_rules,
        scraping_rules: Vec::new(),
        env: Vec::new(),
    }
}
