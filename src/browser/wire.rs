//! W3C wire client for the remote automation endpoint
//!
//! Speaks the session-scoped HTTP protocol rooted at `/wd/hub`. Every call
//! runs under the client's request deadline so a wedged browser can never
//! block a crawl indefinitely.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{CrawlError, Result};

use super::page::{ElementHandle, Locator, Page, ELEMENT_KEY};

/// One live remote browser session.
#[derive(Debug)]
pub struct WireSession {
    http: reqwest::Client,
    hub_url: String,
    session_id: String,
}

impl WireSession {
    /// Open a new session against `hub_url` with the given capabilities.
    pub async fn open(hub_url: &str, capabilities: &Value, deadline: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .map_err(|e| CrawlError::DriverUnavailable(e.to_string()))?;

        let body = json!({ "capabilities": { "alwaysMatch": capabilities } });
        let response: Value = http
            .post(format!("{hub_url}/session"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let session_id = response
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CrawlError::DriverUnavailable(format!("no session id in response: {response}"))
            })?
            .to_string();

        Ok(Self {
            http,
            hub_url: hub_url.to_string(),
            session_id,
        })
    }

    /// Identifier assigned by the remote endpoint.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.hub_url, self.session_id, path)
    }

    /// Unwrap the protocol envelope, mapping error payloads to crawl errors.
    fn unwrap_value(response: Value) -> Result<Value> {
        if let Some(error) = response.pointer("/value/error").and_then(Value::as_str) {
            let message = response
                .pointer("/value/message")
                .and_then(Value::as_str)
                .unwrap_or(error)
                .to_string();
            return if error == "invalid session id" {
                Err(CrawlError::DriverSessionLost(message))
            } else {
                Err(CrawlError::DriverUnavailable(format!("{error}: {message}")))
            };
        }
        Ok(response.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response: Value = self.http.get(self.endpoint(path)).send().await?.json().await?;
        Self::unwrap_value(response)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response: Value = self
            .http
            .post(self.endpoint(path))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_value(response)
    }

    fn element_from_value(value: &Value) -> Result<ElementHandle> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| ElementHandle { id: id.to_string() })
            .ok_or_else(|| {
                CrawlError::DriverUnavailable(format!("malformed element reference: {value}"))
            })
    }

    async fn key_action(&self, direction: &str, key: &str) -> Result<()> {
        let body = json!({
            "actions": [{
                "type": "key",
                "id": "default keyboard",
                "actions": [{ "type": direction, "value": key }],
            }]
        });
        self.post("/actions", body).await?;
        Ok(())
    }

    /// End the remote session.
    pub async fn quit(&self) -> Result<()> {
        let response: Value = self
            .http
            .delete(self.endpoint(""))
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_value(response)?;
        Ok(())
    }
}

#[async_trait]
impl Page for WireSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.get("/url").await?.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.get("/title").await?.as_str().unwrap_or_default().to_string())
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self
            .get("/source")
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    async fn find_element(&self, locator: &Locator) -> Result<ElementHandle> {
        let (using, value) = locator.wire_strategy();
        let found = self
            .post("/element", json!({ "using": using, "value": value }))
            .await?;
        Self::element_from_value(&found)
    }

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let (using, value) = locator.wire_strategy();
        let found = self
            .post("/elements", json!({ "using": using, "value": value }))
            .await?;
        found
            .as_array()
            .map(|items| items.iter().map(Self::element_from_value).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let encoded = self.get("/screenshot").await?;
        let encoded = encoded.as_str().unwrap_or_default();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CrawlError::DriverUnavailable(format!("bad screenshot payload: {e}")))
    }

    async fn refresh(&self) -> Result<()> {
        self.post("/refresh", json!({})).await?;
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        self.post("/forward", json!({})).await?;
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.post("/back", json!({})).await?;
        Ok(())
    }

    async fn switch_frame(&self, element: &ElementHandle) -> Result<()> {
        self.post("/frame", json!({ "id": { ELEMENT_KEY: element.id.clone() } }))
            .await?;
        Ok(())
    }

    async fn switch_window(&self, handle: &str) -> Result<()> {
        self.post("/window", json!({ "handle": handle })).await?;
        Ok(())
    }

    async fn key_down(&self, key: &str) -> Result<()> {
        self.key_action("keyDown", key).await
    }

    async fn key_up(&self, key: &str) -> Result<()> {
        self.key_action("keyUp", key).await
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.post(&format!("/element/{}/click", element.id), json!({}))
            .await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementHandle) -> Result<()> {
        self.post(&format!("/element/{}/clear", element.id), json!({}))
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.post(
            &format!("/element/{}/value", element.id),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let value = self
            .get(&format!("/element/{}/attribute/{name}", element.id))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        Ok(self
            .get(&format!("/element/{}/text", element.id))
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    async fn is_displayed(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self
            .get(&format!("/element/{}/displayed", element.id))
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self
            .get(&format!("/element/{}/enabled", element.id))
            .await?
            .as_bool()
            .unwrap_or(false))
    }
}
