//! Capability surface of one rendered browser page
//!
//! The rule interpreter and page fetcher are written against this trait
//! rather than the wire client so they can run under a scripted fake in
//! tests. The operations mirror what the remote automation endpoint
//! exposes per session.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CrawlError, Result};

/// JSON key carrying an element reference in wire payloads.
pub(crate) const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Opaque reference to a located element, valid for the session that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub id: String,
}

impl ElementHandle {
    /// Encode this element as a script argument so injected JavaScript can
    /// receive it via `arguments[n]`.
    pub fn as_script_arg(&self) -> Value {
        serde_json::json!({ ELEMENT_KEY: self.id.clone() })
    }
}

/// Element lookup strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
    Id(String),
    Name(String),
    LinkText(String),
    PartialLinkText(String),
    TagName(String),
    ClassName(String),
}

impl Locator {
    /// Build a locator from the selector-type strings used in rule files.
    pub fn from_kind(kind: &str, value: &str) -> Result<Self> {
        let value = value.to_string();
        match kind.trim().to_lowercase().as_str() {
            "css" => Ok(Self::Css(value)),
            "xpath" => Ok(Self::XPath(value)),
            "id" => Ok(Self::Id(value)),
            "name" => Ok(Self::Name(value)),
            "linktext" | "link_text" => Ok(Self::LinkText(value)),
            "partiallinktext" | "partial_link_text" => Ok(Self::PartialLinkText(value)),
            "tagname" | "tag_name" | "tag" | "element" => Ok(Self::TagName(value)),
            "class" | "classname" | "class_name" => Ok(Self::ClassName(value)),
            other => Err(CrawlError::RuleNonFatal(format!(
                "unsupported selector type: {other}"
            ))),
        }
    }

    /// Map onto the wire protocol's location strategies. Strategies the
    /// protocol dropped (id, name, class name) are expressed as CSS.
    pub fn wire_strategy(&self) -> (&'static str, String) {
        match self {
            Self::Css(v) => ("css selector", v.clone()),
            Self::XPath(v) => ("xpath", v.clone()),
            Self::Id(v) => ("css selector", format!("[id=\"{v}\"]")),
            Self::Name(v) => ("css selector", format!("[name=\"{v}\"]")),
            Self::ClassName(v) => ("css selector", format!(".{v}")),
            Self::TagName(v) => ("tag name", v.clone()),
            Self::LinkText(v) => ("link text", v.clone()),
            Self::PartialLinkText(v) => ("partial link text", v.clone()),
        }
    }
}

/// One leased browser page and the operations the crawl pipeline needs
/// from it. All calls run under the session's configured deadline.
#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    async fn page_source(&self) -> Result<String>;
    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value>;
    async fn find_element(&self, locator: &Locator) -> Result<ElementHandle>;
    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>>;
    /// PNG-encoded viewport screenshot.
    async fn screenshot(&self) -> Result<Vec<u8>>;
    async fn refresh(&self) -> Result<()>;
    async fn go_forward(&self) -> Result<()>;
    async fn go_back(&self) -> Result<()>;
    async fn switch_frame(&self, element: &ElementHandle) -> Result<()>;
    async fn switch_window(&self, handle: &str) -> Result<()>;
    async fn key_down(&self, key: &str) -> Result<()>;
    async fn key_up(&self, key: &str) -> Result<()>;

    async fn click(&self, element: &ElementHandle) -> Result<()>;
    async fn clear(&self, element: &ElementHandle) -> Result<()>;
    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<()>;
    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>>;
    async fn text(&self, element: &ElementHandle) -> Result<String>;
    async fn is_displayed(&self, element: &ElementHandle) -> Result<bool>;
    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool>;
}
