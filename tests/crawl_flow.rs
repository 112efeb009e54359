//! End-to-end tests for the rule interpreter and frontier expansion
//!
//! These run the real engine against a scripted fake page, so the whole
//! wait/guard/act pipeline, selector resolution, retries, and scope
//! filtering are exercised without a live browser.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use sitehound::blobstore::BlobSink;
use sitehound::browser::{ElementHandle, Locator, Page};
use sitehound::catalog::DomainScope;
use sitehound::config::{StorageConfig, StorageKind};
use sitehound::crawl::extractor::{extract_links, is_external_link};
use sitehound::crawl::Frontier;
use sitehound::error::{CrawlError, Result};
use sitehound::rules::{
    ActionRule, ErrorHandling, RuleEngine, RuleGroup, RuleRegistry, ScrapingRule, Selector,
    WaitCondition,
};

#[derive(Clone, Default)]
struct FakeElement {
    text: String,
    attributes: HashMap<String, String>,
    displayed: bool,
    enabled: bool,
}

/// Scripted page: elements are keyed by their selector operand, script
/// results by substring of the script body.
#[derive(Default)]
struct MockPage {
    url: Mutex<String>,
    title: String,
    html: String,
    lang: String,
    elements: HashMap<String, FakeElement>,
    script_results: HashMap<String, Value>,
    critical_scripts: Vec<String>,
    clicks: Mutex<Vec<String>>,
    find_attempts: Mutex<HashMap<String, u32>>,
}

impl MockPage {
    fn with_element(mut self, selector: &str, element: FakeElement) -> Self {
        self.elements.insert(selector.to_string(), element);
        self
    }

    fn find_count(&self, selector: &str) -> u32 {
        *self.find_attempts.lock().get(selector).unwrap_or(&0)
    }

    fn clicked(&self, selector: &str) -> bool {
        self.clicks.lock().iter().any(|c| c == selector)
    }

    fn lookup(&self, locator: &Locator) -> (String, Option<&FakeElement>) {
        let needle = match locator {
            Locator::Css(s)
            | Locator::XPath(s)
            | Locator::Id(s)
            | Locator::Name(s)
            | Locator::LinkText(s)
            | Locator::PartialLinkText(s)
            | Locator::TagName(s)
            | Locator::ClassName(s) => s.clone(),
        };
        (needle.clone(), self.elements.get(&needle))
    }

    fn element_by_handle(&self, handle: &ElementHandle) -> Option<&FakeElement> {
        self.elements.get(&handle.id)
    }
}

#[async_trait]
impl Page for MockPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.url.lock().clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.title.clone())
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn execute_script(&self, script: &str, _args: Vec<Value>) -> Result<Value> {
        if self.critical_scripts.iter().any(|s| script.contains(s.as_str())) {
            return Err(CrawlError::RuleCritical("scripted failure".into()));
        }
        if script.contains("document.documentElement.lang") {
            return Ok(Value::String(self.lang.clone()));
        }
        for (needle, result) in &self.script_results {
            if script.contains(needle.as_str()) {
                return Ok(result.clone());
            }
        }
        Ok(Value::Null)
    }

    async fn find_element(&self, locator: &Locator) -> Result<ElementHandle> {
        let (needle, element) = self.lookup(locator);
        *self.find_attempts.lock().entry(needle.clone()).or_insert(0) += 1;
        match element {
            // The handle id doubles as the selector key for convenience
            Some(_) => Ok(ElementHandle { id: needle }),
            None => Err(CrawlError::RuleNonFatal(format!("no such element: {needle}"))),
        }
    }

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        Ok(self.find_element(locator).await.into_iter().collect())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Err(CrawlError::DriverUnavailable("not scripted".into()))
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        Ok(())
    }

    async fn switch_frame(&self, _element: &ElementHandle) -> Result<()> {
        Ok(())
    }

    async fn switch_window(&self, _handle: &str) -> Result<()> {
        Ok(())
    }

    async fn key_down(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn key_up(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.clicks.lock().push(element.id.clone());
        Ok(())
    }

    async fn clear(&self, _element: &ElementHandle) -> Result<()> {
        Ok(())
    }

    async fn send_keys(&self, _element: &ElementHandle, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        Ok(self
            .element_by_handle(element)
            .and_then(|el| el.attributes.get(name).cloned()))
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        Ok(self
            .element_by_handle(element)
            .map(|el| el.text.clone())
            .unwrap_or_default())
    }

    async fn is_displayed(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self.element_by_handle(element).is_some_and(|el| el.displayed))
    }

    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self.element_by_handle(element).is_some_and(|el| el.enabled))
    }
}

fn engine_with(registry: RuleRegistry, blob_dir: &std::path::Path) -> RuleEngine {
    let sink = BlobSink::from_config(&StorageConfig {
        kind: StorageKind::Local,
        path: blob_dir.to_string_lossy().into_owned(),
        ..StorageConfig::default()
    })
    .unwrap();
    RuleEngine::new(Arc::new(registry), Arc::new(sink))
}

fn click_rule(selector: &str, retry_count: u32, ignore: bool) -> ActionRule {
    ActionRule {
        rule_name: "click-under-test".to_string(),
        action_type: "click".to_string(),
        selectors: vec![Selector::new("css", selector)],
        value: String::new(),
        wait_conditions: Vec::new(),
        conditions: Map::new(),
        error_handling: ErrorHandling {
            ignore,
            retry_count,
            retry_delay: 0,
        },
        enabled: true,
    }
}

#[tokio::test]
async fn missing_selector_retries_then_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(RuleRegistry::new(), tmp.path());
    let page = MockPage::default();

    let rule = click_rule("#absent", 2, false);
    let outcome = engine.execute_rule_with_retry(&page, &rule, "ctx").await;

    // Initial attempt plus two retries, then the failure is swallowed
    assert!(outcome.is_ok());
    assert_eq!(page.find_count("#absent"), 3);
}

#[tokio::test]
async fn ignored_rules_fail_once_without_retrying() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(RuleRegistry::new(), tmp.path());
    let page = MockPage::default();

    let rule = click_rule("#absent", 5, true);
    assert!(engine.execute_rule_with_retry(&page, &rule, "ctx").await.is_ok());
    assert_eq!(page.find_count("#absent"), 1);
}

#[tokio::test]
async fn language_condition_gates_rule_application() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(RuleRegistry::new(), tmp.path());
    let mut page = MockPage::default();
    page.lang = "en".to_string();
    let page = page.with_element(
        "#go",
        FakeElement {
            displayed: true,
            enabled: true,
            ..FakeElement::default()
        },
    );

    let mut german_only = click_rule("#go", 0, false);
    german_only.conditions.insert("language".to_string(), json!("de"));
    engine
        .execute_rule_with_retry(&page, &german_only, "ctx")
        .await
        .unwrap();
    assert!(!page.clicked("#go"));

    let mut english_only = click_rule("#go", 0, false);
    english_only.conditions.insert("language".to_string(), json!("en"));
    engine
        .execute_rule_with_retry(&page, &english_only, "ctx")
        .await
        .unwrap();
    assert!(page.clicked("#go"));
}

#[tokio::test]
async fn selector_list_falls_through_to_first_match() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(RuleRegistry::new(), tmp.path());
    let page = MockPage::default().with_element(
        "#fallback",
        FakeElement {
            displayed: true,
            enabled: true,
            ..FakeElement::default()
        },
    );

    let mut rule = click_rule("#primary", 0, false);
    rule.selectors.push(Selector::new("css", "#fallback"));
    engine.execute_rule_with_retry(&page, &rule, "ctx").await.unwrap();

    assert!(page.clicked("#fallback"));
    assert_eq!(page.find_count("#primary"), 1);
}

#[tokio::test]
async fn selector_attribute_constraint_rejects_mismatches() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(RuleRegistry::new(), tmp.path());
    let page = MockPage::default().with_element(
        "#candidate",
        FakeElement {
            attributes: HashMap::from([("role".to_string(), "banner".to_string())]),
            displayed: true,
            enabled: true,
            ..FakeElement::default()
        },
    );

    let mut rule = click_rule("#candidate", 0, false);
    rule.selectors[0].attribute.name = "role".to_string();
    rule.selectors[0].attribute.value = "dialog".to_string();
    engine.execute_rule_with_retry(&page, &rule, "ctx").await.unwrap();
    assert!(!page.clicked("#candidate"));

    rule.selectors[0].attribute.value = "banner".to_string();
    engine.execute_rule_with_retry(&page, &rule, "ctx").await.unwrap();
    assert!(page.clicked("#candidate"));
}

#[tokio::test]
async fn scraping_rules_emit_merged_structured_json() {
    let tmp = tempfile::tempdir().unwrap();
    let mut registry = RuleRegistry::new();
    registry.add_group(RuleGroup {
        group_name: "article".to_string(),
        url_patterns: vec!["news.test".to_string()],
        enabled: true,
        action_rules: vec![],
        scraping_rules: vec![ScrapingRule {
            rule_name: "headline".to_string(),
            selectors: vec![
                {
                    let mut s = Selector::new("css", "h1.title");
                    s.key = "headline".to_string();
                    s
                },
                {
                    let mut s = Selector::new("css", "a.canonical");
                    s.key = "canonical".to_string();
                    s.extract_attribute = "href".to_string();
                    s
                },
            ],
            wait_conditions: vec![],
            conditions: Map::new(),
            post_processing: vec![],
            enabled: true,
        }],
        env: vec![],
    });
    let engine = engine_with(registry, tmp.path());

    let page = MockPage::default()
        .with_element(
            "h1.title",
            FakeElement {
                text: "Big News".to_string(),
                ..FakeElement::default()
            },
        )
        .with_element(
            "a.canonical",
            FakeElement {
                attributes: HashMap::from([(
                    "href".to_string(),
                    "http://news.test/canonical".to_string(),
                )]),
                ..FakeElement::default()
            },
        );

    let document = engine
        .apply_scraping_plan(&page, None, "http://news.test/today", "ctx")
        .await
        .unwrap();

    assert_eq!(document["headline"], "Big News");
    assert_eq!(document["canonical"], "http://news.test/canonical");

    // Round-trip: parse of the serialization equals the document
    let reparsed: Value = serde_json::from_str(&serde_json::to_string(&document).unwrap()).unwrap();
    assert_eq!(reparsed, document);
}

#[tokio::test]
async fn critical_failure_aborts_the_enclosing_ruleset() {
    let tmp = tempfile::tempdir().unwrap();
    let mut registry = RuleRegistry::new();
    registry.add_plugin("guard-plugin", "window.__guard()");
    let engine = engine_with(registry, tmp.path());

    let mut page = MockPage::default().with_element("h1", FakeElement::default());
    page.critical_scripts.push("__guard".to_string());

    let failing = ScrapingRule {
        rule_name: "guarded".to_string(),
        selectors: vec![],
        wait_conditions: vec![WaitCondition {
            condition_type: "plugin_call".to_string(),
            value: "guard-plugin".to_string(),
        }],
        conditions: Map::new(),
        post_processing: vec![],
        enabled: true,
    };
    let mut never_runs_selector = Selector::new("css", "h1");
    never_runs_selector.key = "title".to_string();
    let never_runs = ScrapingRule {
        rule_name: "after".to_string(),
        selectors: vec![never_runs_selector],
        wait_conditions: vec![],
        conditions: Map::new(),
        post_processing: vec![],
        enabled: true,
    };

    let outcome = engine
        .execute_scraping_rules(&page, &[failing, never_runs], "ctx")
        .await;

    assert!(outcome.is_err());
    // The second rule never executed
    assert_eq!(page.find_count("h1"), 0);
}

#[tokio::test]
async fn default_config_runs_the_consent_group() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_with(RuleRegistry::new(), tmp.path());

    // One consent phrase resolves to a clickable element
    let accept_xpath = "//*[contains(translate(., 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', \
                        'abcdefghijklmnopqrstuvwxyz'), 'accept')]";
    let page = MockPage::default().with_element(
        accept_xpath,
        FakeElement {
            text: "Accept all".to_string(),
            displayed: true,
            enabled: true,
            ..FakeElement::default()
        },
    );

    let config = json!({"config": "default"});
    engine
        .apply_action_plan(&page, Some(&config), "http://a.test/", "ctx")
        .await
        .unwrap();

    assert!(page.clicked(accept_xpath));
}

#[test]
fn frontier_expansion_honors_domain_scope() {
    let seed = "http://a.test/";
    let html = r#"
        <a href="/b">internal relative</a>
        <a href="http://a.test/c">internal absolute</a>
        <a href="http://other.test/">external</a>
    "#;

    let in_scope: Vec<String> = extract_links(html)
        .into_iter()
        .filter(|link| {
            link.starts_with('/') || !is_external_link(seed, link, DomainScope::L2)
        })
        .collect();

    let frontier = Frontier::new(seed, 2, in_scope);
    assert_eq!(
        frontier.current(),
        &[
            "http://a.test/b".to_string(),
            "http://a.test/c".to_string(),
        ]
    );
}

#[test]
fn exact_scope_keeps_only_the_seed_itself() {
    let seed = "http://a.test/";
    let candidates = ["http://a.test/", "http://a.test/b", "http://other.test/"];
    let kept: Vec<&str> = candidates
        .iter()
        .copied()
        .filter(|link| !is_external_link(seed, link, DomainScope::Exact))
        .collect();
    assert_eq!(kept, vec!["http://a.test/"]);
}
