//! Scraping-rule interpreter
//!
//! Applies scraping rules to the rendered page, producing one JSON object
//! per page: rule outputs merge key-wise, scraped strings that are JSON or
//! HTML fragments are inlined as structure, and each rule's
//! post-processing chain runs over the document before it is merged.

use scraper::{Html, Node};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::browser::Page;
use crate::error::{CrawlError, Result};

use super::engine::RuleEngine;
use super::{PostProcessingStep, RuleGroup, Ruleset, ScrapingRule, SourceRuleConfig};

impl RuleEngine {
    /// Run scraping rules for a page and return the merged JSON document.
    ///
    /// A source's configured plan runs first when present; URL-matched
    /// rule groups and rulesets always run afterwards.
    pub async fn apply_scraping_plan(
        &self,
        page: &dyn Page,
        source_config: Option<&Value>,
        url: &str,
        context_id: &str,
    ) -> Result<Value> {
        let mut document = Map::new();

        if let Some(raw) = source_config {
            let plan = SourceRuleConfig::from_source_config(raw, url, false)?;
            let scraped = self
                .run_scraping_plan(page, &plan, url, context_id)
                .await?;
            document.extend(scraped);
        }

        if let Some(group) = self.registry().group_by_url(url).cloned() {
            debug!(group = %group.group_name, url, "running URL-matched scraping group");
            let scraped = self.scrape_group(page, &group, context_id).await?;
            document.extend(scraped);
        }
        if let Some(ruleset) = self.registry().ruleset_by_url(url).cloned() {
            debug!(ruleset = %ruleset.name, url, "running URL-matched scraping ruleset");
            let scraped = self.scrape_ruleset(page, &ruleset, context_id).await?;
            document.extend(scraped);
        }

        Ok(Value::Object(document))
    }

    async fn run_scraping_plan(
        &self,
        page: &dyn Page,
        plan: &SourceRuleConfig,
        url: &str,
        context_id: &str,
    ) -> Result<Map<String, Value>> {
        let mut document = Map::new();
        for item in &plan.execution_plan {
            if !item.conditions.matches(url) {
                continue;
            }
            for name in &item.rules {
                if name.is_empty() {
                    continue;
                }
                let Some(rule) = self.registry().scraping_rule_by_name(name).cloned() else {
                    warn!(name = %name, "planned scraping rule not found");
                    continue;
                };
                match self.execute_scraping_rule(page, &rule, context_id).await {
                    Ok(scraped) => document.extend(scraped),
                    Err(e) if e.is_critical() => return Err(e),
                    Err(e) => warn!(rule = %rule.rule_name, "scraping rule failed: {e}"),
                }
            }
        }
        Ok(document)
    }

    async fn scrape_group(
        &self,
        page: &dyn Page,
        group: &RuleGroup,
        context_id: &str,
    ) -> Result<Map<String, Value>> {
        self.registry().install_env(context_id, &group.env);
        let rules: Vec<ScrapingRule> = group.enabled_scraping_rules().cloned().collect();
        let outcome = self.execute_scraping_rules(page, &rules, context_id).await;
        self.registry().env.clear_non_persistent(context_id);
        outcome
    }

    async fn scrape_ruleset(
        &self,
        page: &dyn Page,
        ruleset: &Ruleset,
        context_id: &str,
    ) -> Result<Map<String, Value>> {
        self.registry().install_env(context_id, &ruleset.env);
        let rules: Vec<ScrapingRule> = ruleset.enabled_scraping_rules().cloned().collect();
        let outcome = self.execute_scraping_rules(page, &rules, context_id).await;
        self.registry().env.clear_non_persistent(context_id);
        outcome
    }

    /// Execute rules in order, merging their outputs. A critical failure
    /// aborts the whole batch; other failures are logged and skipped.
    pub async fn execute_scraping_rules(
        &self,
        page: &dyn Page,
        rules: &[ScrapingRule],
        context_id: &str,
    ) -> Result<Map<String, Value>> {
        let mut document = Map::new();
        for rule in rules {
            match self.execute_scraping_rule(page, rule, context_id).await {
                Ok(scraped) => document.extend(scraped),
                Err(e) if e.is_critical() => return Err(e),
                Err(e) => warn!(rule = %rule.rule_name, "scraping rule failed: {e}"),
            }
        }
        Ok(document)
    }

    /// Apply one scraping rule: wait phase, guard phase, selector
    /// extraction, value structuring, post-processing.
    pub async fn execute_scraping_rule(
        &self,
        page: &dyn Page,
        rule: &ScrapingRule,
        _context_id: &str,
    ) -> Result<Map<String, Value>> {
        for wait in &rule.wait_conditions {
            self.scraping_wait_condition(page, wait).await?;
        }
        if !rule.conditions.is_empty() && !self.check_conditions(page, &rule.conditions).await {
            return Ok(Map::new());
        }

        let mut extracted = Map::new();
        for selector in &rule.selectors {
            let found = self
                .find_by_selectors(page, std::slice::from_ref(selector))
                .await;
            let Ok((element, _)) = found else {
                debug!(selector = %selector.selector, "scraping selector matched nothing");
                continue;
            };
            let value = if selector.extract_attribute.is_empty() {
                page.text(&element).await?
            } else {
                page.attribute(&element, &selector.extract_attribute)
                    .await?
                    .unwrap_or_default()
            };
            let key = if selector.key.is_empty() {
                selector.selector.clone()
            } else {
                selector.key.clone()
            };
            extracted.insert(key, Value::String(value));
        }

        let mut document = Value::Object(structure_extracted(extracted));
        for step in &rule.post_processing {
            self.apply_post_processing_step(page, step, &mut document)
                .await;
        }
        match document {
            Value::Object(map) => Ok(map),
            other => {
                let mut map = Map::new();
                map.insert(rule.rule_name.clone(), other);
                Ok(map)
            }
        }
    }

    async fn scraping_wait_condition(
        &self,
        page: &dyn Page,
        wait: &super::WaitCondition,
    ) -> Result<()> {
        match wait.condition_type.trim().to_lowercase().as_str() {
            "element" | "delay" => Ok(()),
            "plugin_call" => {
                let body = self.registry().plugin(&wait.value).ok_or_else(|| {
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

    /// Apply one post-processing step in place. Unknown steps and plugin
    /// failures leave the document untouched.
    async fn apply_post_processing_step(
        &self,
        page: &dyn Page,
        step: &PostProcessingStep,
        document: &mut Value,
    ) {
        let field = step.details.get("field").and_then(Value::as_str);
        match step.step_type.trim().to_lowercase().as_str() {
            "trim" => transform_strings(document, field, |s| s.trim().to_string()),
            "lowercase" => transform_strings(document, field, |s| s.to_lowercase()),
            "uppercase" => transform_strings(document, field, |s| s.to_uppercase()),
            "remove" => {
                if let (Value::Object(map), Some(field)) = (&mut *document, field) {
                    map.remove(field);
                }
            }
            "rename" => {
                let from = step.details.get("from").and_then(Value::as_str);
                let to = step.details.get("to").and_then(Value::as_str);
                if let (Value::Object(map), Some(from), Some(to)) = (&mut *document, from, to) {
                    if let Some(value) = map.remove(from) {
                        map.insert(to.to_string(), value);
                    }
                }
            }
            "plugin_call" => {
                let Some(name) = step.details.get("plugin").and_then(Value::as_str) else {
                    warn!("plugin_call post-processing step without a plugin name");
                    return;
                };
                let Some(body) = self.registry().plugin(name) else {
                    warn!(name, "post-processing plugin not found");
                    return;
                };
                match page.execute_script(body, vec![document.clone()]).await {
                    Ok(Value::Object(map)) => *document = Value::Object(map),
                    Ok(_) | Err(_) => {
                        debug!(name, "post-processing plugin returned no document")
                    }
                }
            }
            other => warn!(step = other, "unknown post-processing step"),
        }
    }
}

/// Apply a string transform to one field, or to every top-level string
/// when no field is named.
fn transform_strings(document: &mut Value, field: Option<&str>, f: impl Fn(&str) -> String) {
    let Value::Object(map) = document else {
        return;
    };
    match field {
        Some(field) => {
            if let Some(Value::String(s)) = map.get_mut(field) {
                *s = f(s);
            }
        }
        None => {
            for value in map.values_mut() {
                if let Value::String(s) = value {
                    *s = f(s);
                }
            }
        }
    }
}

/// Structure raw scraped strings: keys that carry no information are
/// dropped, JSON strings are inlined as parsed values, HTML fragments
/// become attribute/text/children trees.
fn structure_extracted(extracted: Map<String, Value>) -> Map<String, Value> {
    let mut structured = Map::new();
    for (key, value) in extracted {
        if key.is_empty() || key == "true" || key == "false" {
            warn!(key = %key, "dropping disallowed key in scraped content");
            continue;
        }
        let Value::String(text) = value else {
            structured.insert(key, value);
            continue;
        };
        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
            if parsed.is_object() || parsed.is_array() {
                structured.insert(key, parsed);
                continue;
            }
        }
        if str_is_html(&text) {
            match html_fragment_to_json(&text) {
                Ok(tree) => {
                    structured.insert(key, tree);
                    continue;
                }
                Err(_) => {
                    structured.insert(key, Value::String(text));
                    continue;
                }
            }
        }
        structured.insert(key, Value::String(text));
    }
    structured
}

/// Cheap check for markup: angle brackets plus at least one real element
/// beyond the implied html/head/body wrappers.
pub(crate) fn str_is_html(s: &str) -> bool {
    if !s.contains('<') || !s.contains('>') {
        return false;
    }
    let fragment = Html::parse_fragment(s);
    fragment.tree.nodes().any(|node| match node.value() {
        Node::Element(el) => !matches!(el.name(), "html" | "head" | "body"),
        _ => false,
    })
}

/// Convert an HTML fragment into a JSON tree of
/// `{attributes..., text, children}` objects, one per element.
pub(crate) fn html_fragment_to_json(s: &str) -> Result<Value> {
    let fragment = Html::parse_fragment(s);
    let mut items = Vec::new();
    collect_elements(fragment.root_element(), &mut items);
    Ok(Value::Array(items))
}

fn collect_elements(element: scraper::ElementRef<'_>, items: &mut Vec<Value>) {
    for child in element.children() {
        if let Some(child_el) = scraper::ElementRef::wrap(child) {
            if matches!(child_el.value().name(), "html" | "head" | "body") {
                collect_elements(child_el, items);
            } else {
                items.push(element_to_json(child_el));
            }
        }
    }
}

fn element_to_json(element: scraper::ElementRef<'_>) -> Value {
    let mut item = Map::new();
    for (name, value) in element.value().attrs() {
        item.insert(name.to_string(), Value::String(value.to_string()));
    }

    let mut text = String::new();
    let mut children = Vec::new();
    for child in element.children() {
        if let Some(child_el) = scraper::ElementRef::wrap(child) {
            children.push(element_to_json(child_el));
        } else if let Node::Text(t) = child.value() {
            let trimmed = t.trim();
            if !trimmed.is_empty() && text.is_empty() {
                text = trimmed.to_string();
            }
        }
    }
    if !text.is_empty() {
        item.insert("text".to_string(), Value::String(text));
    }
    if !children.is_empty() {
        item.insert("children".to_string(), Value::Array(children));
    }
    Value::Object(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn html_detection() {
        assert!(str_is_html("<div class=\"x\">hi</div>"));
        assert!(str_is_html("text with <span>markup</span>"));
        assert!(!str_is_html("2 < 3 and 4 > 1"));
        assert!(!str_is_html("plain text"));
    }

    #[test]
    fn fragment_to_json_builds_attribute_text_children_tree() {
        let tree = html_fragment_to_json(
            "<ul class=\"menu\"><li>first</li><li>second</li></ul>",
        )
        .unwrap();
        let items = tree.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["class"], "menu");
        let children = items[0]["children"].as_array().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0]["text"], "first");
        assert_eq!(children[1]["text"], "second");
    }

    #[test]
    fn structuring_inlines_json_and_html_and_drops_bad_keys() {
        let mut extracted = Map::new();
        extracted.insert("plain".to_string(), json!("hello"));
        extracted.insert("nested".to_string(), json!("{\"a\": 1}"));
        extracted.insert("markup".to_string(), json!("<p id=\"x\">para</p>"));
        extracted.insert("".to_string(), json!("dropped"));
        extracted.insert("true".to_string(), json!("dropped"));

        let structured = structure_extracted(extracted);
        assert_eq!(structured.len(), 3);
        assert_eq!(structured["plain"], json!("hello"));
        assert_eq!(structured["nested"], json!({"a": 1}));
        assert_eq!(structured["markup"][0]["id"], "x");
        assert_eq!(structured["markup"][0]["text"], "para");
    }

    #[test]
    fn scraped_documents_round_trip_through_serialization() {
        let mut extracted = Map::new();
        extracted.insert("title".to_string(), json!("Example"));
        extracted.insert("meta".to_string(), json!("{\"tags\": [\"a\", \"b\"]}"));
        let document = Value::Object(structure_extracted(extracted));

        let serialized = serde_json::to_string(&document).unwrap();
        let reparsed: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(reparsed, document);
    }

    #[test]
    fn transform_targets_named_field_or_all_strings() {
        let mut doc = json!({"a": "  Hi  ", "b": "There", "n": 3});
        transform_strings(&mut doc, Some("a"), |s| s.trim().to_string());
        assert_eq!(doc, json!({"a": "Hi", "b": "There", "n": 3}));

        transform_strings(&mut doc, None, |s| s.to_lowercase());
        assert_eq!(doc, json!({"a": "hi", "b": "there", "n": 3}));
    }
}
