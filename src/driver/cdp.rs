//! Live page driver over the Chrome DevTools Protocol
//!
//! Attaches to an already-open bidding tab and evaluates small scripts in it via
//! `Runtime.evaluate`. Element lookup stays in the page; only booleans and the
//! identity come back.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{PageDriver, SubmitOutcome};
use crate::domain::{format_price, ItemIdentity};
use crate::error::{AutobidError, Result};

type CdpStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Element locators on the bidding page
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PageSelectors {
    pub product_image: String,
    pub product_id_label: String,
    /// Regex with one capture group applied to the label's `aria-label`
    pub product_id_pattern: String,
    /// XPath matching every price input, in row order
    pub price_inputs_xpath: String,
    pub submit_button: String,
    /// Element present only after a confirmed submission
    pub success_dialog: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            product_image: "img.ait-image-img.card_img".to_string(),
            product_id_label: "span[aria-label^=\"商品ID：\"]".to_string(),
            product_id_pattern: "商品ID：(\\d+)".to_string(),
            price_inputs_xpath: "//table/tbody/tr/td[7]/div/span/span/input".to_string(),
            submit_button:
                "button[name=\"submit\"][type=\"button\"].next-btn.next-medium.next-btn-primary"
                    .to_string(),
            success_dialog: "div[aria-modal=\"true\"][aria-labelledby^=\"dialog-title-\"]"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    /// DevTools HTTP endpoint used to discover the tab
    pub devtools_url: String,
    /// Direct page websocket; skips discovery when set
    pub page_ws_url: Option<String>,
    /// Substring of the tab URL to attach to
    pub page_url_contains: String,
    /// Pause after each price field is written (ms)
    pub field_settle_ms: u64,
    /// Upper bound on a single evaluate round-trip (ms)
    pub command_timeout_ms: u64,
    pub selectors: PageSelectors,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            devtools_url: "http://127.0.0.1:9222".to_string(),
            page_ws_url: None,
            page_url_contains: "biddingRegistration".to_string(),
            field_settle_ms: 100,
            command_timeout_ms: 30_000,
            selectors: PageSelectors::default(),
        }
    }
}

/// Entry of the DevTools `/json/list` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    web_socket_debugger_url: Option<String>,
}

pub struct CdpDriver {
    config: CdpConfig,
    stream: CdpStream,
    next_id: u64,
}

impl CdpDriver {
    /// Attach to the bidding tab
    pub async fn connect(config: CdpConfig) -> Result<Self> {
        let ws_url = match &config.page_ws_url {
            Some(url) => url.clone(),
            None => Self::discover_page(&config).await?,
        };
        let url = Url::parse(&ws_url)
            .map_err(|e| AutobidError::Driver(format!("Invalid DevTools URL: {}", e)))?;

        info!("Attaching to page: {}", url);
        let (stream, _) = connect_async(&url).await?;

        Ok(Self {
            config,
            stream,
            next_id: 0,
        })
    }

    async fn discover_page(config: &CdpConfig) -> Result<String> {
        let list_url = format!("{}/json/list", config.devtools_url.trim_end_matches('/'));
        let targets: Vec<TargetInfo> = reqwest::get(&list_url).await?.json().await?;

        targets
            .into_iter()
            .filter(|t| t.kind == "page" && t.url.contains(&config.page_url_contains))
            .find_map(|t| t.web_socket_debugger_url)
            .ok_or_else(|| {
                AutobidError::Driver(format!(
                    "no page matching '{}' at {}",
                    config.page_url_contains, config.devtools_url
                ))
            })
    }

    /// Evaluate a script in the page and return its value
    async fn evaluate(&mut self, expression: String) -> Result<Value> {
        let timeout = Duration::from_millis(self.config.command_timeout_ms);
        tokio::time::timeout(timeout, self.evaluate_inner(expression))
            .await
            .map_err(|_| AutobidError::Driver("Runtime.evaluate timed out".into()))?
    }

    async fn evaluate_inner(&mut self, expression: String) -> Result<Value> {
        self.next_id += 1;
        let id = self.next_id;
        let request = json!({
            "id": id,
            "method": "Runtime.evaluate",
            "params": {
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }
        });
        self.stream.send(Message::Text(request.to_string())).await?;

        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => {
                    let reply: Value = serde_json::from_str(&text)?;
                    if reply.get("id").and_then(Value::as_u64) != Some(id) {
                        // Protocol events and stale replies
                        continue;
                    }
                    return Self::extract_value(reply);
                }
                Message::Ping(data) => self.stream.send(Message::Pong(data)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }

        Err(AutobidError::Driver("DevTools connection closed".into()))
    }

    fn extract_value(reply: Value) -> Result<Value> {
        if let Some(err) = reply.get("error") {
            return Err(AutobidError::Driver(format!("DevTools error: {}", err)));
        }
        let result = reply.get("result").cloned().unwrap_or(Value::Null);
        if let Some(details) = result.get("exceptionDetails") {
            return Err(AutobidError::Driver(format!("page script threw: {}", details)));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn evaluate_bool(&mut self, expression: String) -> Result<bool> {
        Ok(self.evaluate(expression).await?.as_bool().unwrap_or(false))
    }
}

/// JSON-encode a string so it can be spliced into a script as a literal
fn js(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

fn identify_script(s: &PageSelectors) -> String {
    format!(
        r#"(() => {{
  const img = document.querySelector({img});
  const label = document.querySelector({label});
  if (!img || !label) return null;
  const m = (label.getAttribute('aria-label') || '').match(new RegExp({pattern}));
  if (!m || !img.src) return null;
  return {{ id: m[1], imageRef: img.src }};
}})()"#,
        img = js(&s.product_image),
        label = js(&s.product_id_label),
        pattern = js(&s.product_id_pattern),
    )
}

fn set_prices_script(s: &PageSelectors, prices: &[String], settle_ms: u64) -> String {
    let prices = Value::from(prices.to_vec()).to_string();
    format!(
        r#"(async () => {{
  const prices = {prices};
  if (prices.length === 0) return false;
  const found = document.evaluate({xpath}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
  const inputs = [];
  for (let i = 0; i < found.snapshotLength; i++) {{
    const el = found.snapshotItem(i);
    if (el.offsetWidth > 0 || el.offsetHeight > 0) inputs.push(el);
  }}
  if (inputs.length < prices.length) return false;
  const setter = Object.getOwnPropertyDescriptor(HTMLInputElement.prototype, 'value').set;
  for (let i = 0; i < prices.length; i++) {{
    setter.call(inputs[i], prices[i]);
    inputs[i].dispatchEvent(new Event('input', {{ bubbles: true }}));
    inputs[i].focus();
    inputs[i].blur();
    await new Promise(r => setTimeout(r, {settle_ms}));
  }}
  return true;
}})()"#,
        xpath = js(&s.price_inputs_xpath),
    )
}

fn exists_script(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js(selector))
}

fn click_script(selector: &str) -> String {
    format!(
        "(() => {{ const b = document.querySelector({}); if (!b) return false; b.click(); return true; }})()",
        js(selector)
    )
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn identify_item(&mut self) -> Result<Option<ItemIdentity>> {
        let script = identify_script(&self.config.selectors);
        let value = self.evaluate(script).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn locate_submit(&mut self) -> Result<bool> {
        let script = exists_script(&self.config.selectors.submit_button);
        self.evaluate_bool(script).await
    }

    async fn set_prices(&mut self, prices: &[Decimal]) -> Result<bool> {
        let formatted: Vec<String> = prices.iter().map(|p| format_price(*p)).collect();
        debug!(?formatted, "writing price fields");
        let script = set_prices_script(
            &self.config.selectors,
            &formatted,
            self.config.field_settle_ms,
        );
        self.evaluate_bool(script).await
    }

    async fn submit(&mut self) -> Result<()> {
        let script = click_script(&self.config.selectors.submit_button);
        if !self.evaluate_bool(script).await? {
            warn!("submit control vanished before click");
        }
        Ok(())
    }

    async fn check_outcome(&mut self) -> Result<SubmitOutcome> {
        let script = exists_script(&self.config.selectors.success_dialog);
        Ok(SubmitOutcome {
            succeeded: self.evaluate_bool(script).await?,
        })
    }
}
