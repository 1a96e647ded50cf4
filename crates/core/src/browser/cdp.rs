//! [`Browser`] over the Chrome DevTools Protocol.
//!
//! Each context is a CDP browser context; each page a target attached in
//! flat-session mode. Element operations run as small scripts inside an
//! isolated world per frame, so page scripts cannot interfere and cross-origin
//! iframes are reachable as long as site isolation is off (see the launcher).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use slotclaim_protocol::{
	AttachToTargetResult, CreateBrowserContextResult, CreateIsolatedWorldResult, CreateTargetParams, CreateTargetResult, EvaluateResult,
	FrameTreeResult, NavigateResult, event, method,
};
use slotclaim_runtime::{BrowserProcess, Connection, LaunchOptions, WebSocketTransport, launch, resolve_ws_endpoint};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Browser, BrowserContext, FrameInfo, OptionChoice, Page, SelectOption};
use crate::error::{ClaimError, Result};

const WORLD_NAME: &str = "slotclaim";

/// A connected (and possibly owned) Chromium.
pub struct CdpBrowser {
	connection: Arc<Connection>,
	process: Mutex<Option<BrowserProcess>>,
}

impl CdpBrowser {
	/// Attaches to a running browser. `endpoint` is a `ws://` URL or an `http://host:port` DevTools address.
	pub async fn connect(endpoint: &str) -> Result<Self> {
		let ws_url = resolve_ws_endpoint(endpoint).await?;
		Self::attach(&ws_url, None).await
	}

	/// Starts a local browser owned by this value.
	pub async fn launch(options: &LaunchOptions) -> Result<Self> {
		let process = launch(options).await?;
		let ws_url = process.ws_endpoint().to_string();
		Self::attach(&ws_url, Some(process)).await
	}

	async fn attach(ws_url: &str, process: Option<BrowserProcess>) -> Result<Self> {
		let parts = WebSocketTransport::connect(ws_url).await?;
		let connection = Arc::new(Connection::new(parts));
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });
		info!(target = "slotclaim.browser", ws = %ws_url, owned = process.is_some(), "connected to browser");
		Ok(Self {
			connection,
			process: Mutex::new(process),
		})
	}
}

#[async_trait]
impl Browser for CdpBrowser {
	async fn new_context(&self) -> Result<Arc<dyn BrowserContext>> {
		let created: CreateBrowserContextResult = self.connection.call(method::CREATE_BROWSER_CONTEXT, json!({}), None).await?;
		debug!(target = "slotclaim.browser", context = %created.browser_context_id, "context created");
		Ok(Arc::new(CdpContext {
			connection: Arc::clone(&self.connection),
			id: created.browser_context_id,
		}))
	}

	async fn close(&self) -> Result<()> {
		let process = self.process.lock().take();
		if let Some(process) = process {
			if let Err(e) = self.connection.send(method::BROWSER_CLOSE, json!({}), None).await {
				debug!(target = "slotclaim.browser", error = %e, "Browser.close failed; killing process");
			}
			drop(process);
		}
		Ok(())
	}
}

pub struct CdpContext {
	connection: Arc<Connection>,
	id: String,
}

#[async_trait]
impl BrowserContext for CdpContext {
	fn id(&self) -> &str {
		&self.id
	}

	async fn new_page(&self) -> Result<Arc<dyn Page>> {
		let params = CreateTargetParams {
			url: "about:blank".to_string(),
			browser_context_id: Some(self.id.clone()),
		};
		let target: CreateTargetResult = self.connection.call(method::CREATE_TARGET, serde_json::to_value(params)?, None).await?;
		let attached: AttachToTargetResult = self
			.connection
			.call(method::ATTACH_TO_TARGET, json!({ "targetId": target.target_id, "flatten": true }), None)
			.await?;
		self.connection.send(method::PAGE_ENABLE, json!({}), Some(&attached.session_id)).await?;
		debug!(target = "slotclaim.browser", context = %self.id, target_id = %target.target_id, "page attached");
		Ok(Arc::new(CdpPage {
			connection: Arc::clone(&self.connection),
			target_id: target.target_id,
			session_id: attached.session_id,
			worlds: Mutex::new(HashMap::new()),
		}))
	}

	async fn close(&self) -> Result<()> {
		self.connection
			.send(method::DISPOSE_BROWSER_CONTEXT, json!({ "browserContextId": self.id }), None)
			.await?;
		Ok(())
	}
}

pub struct CdpPage {
	connection: Arc<Connection>,
	target_id: String,
	session_id: String,
	/// Isolated-world execution context per frame id.
	worlds: Mutex<HashMap<String, i64>>,
}

impl CdpPage {
	async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
		Ok(self.connection.call(method, params, Some(&self.session_id)).await?)
	}

	async fn world(&self, frame: &str) -> Result<i64> {
		if let Some(id) = self.worlds.lock().get(frame) {
			return Ok(*id);
		}
		let created: CreateIsolatedWorldResult = self
			.call(
				method::PAGE_CREATE_ISOLATED_WORLD,
				json!({ "frameId": frame, "worldName": WORLD_NAME, "grantUniveralAccess": true }),
			)
			.await?;
		self.worlds.lock().insert(frame.to_string(), created.execution_context_id);
		Ok(created.execution_context_id)
	}

	/// Evaluates `expression` in the frame's isolated world. A context destroyed
	/// by navigation is recreated once.
	async fn evaluate(&self, frame: &str, expression: &str) -> Result<Value> {
		match self.evaluate_once(frame, expression).await {
			Err(ClaimError::Runtime(e)) if e.is_stale_context() => {
				self.worlds.lock().remove(frame);
				self.evaluate_once(frame, expression).await
			}
			other => other,
		}
	}

	async fn evaluate_once(&self, frame: &str, expression: &str) -> Result<Value> {
		let context_id = self.world(frame).await?;
		let evaluated: EvaluateResult = self
			.call(
				method::RUNTIME_EVALUATE,
				json!({ "expression": expression, "contextId": context_id, "returnByValue": true, "awaitPromise": true }),
			)
			.await?;
		if let Some(details) = evaluated.exception_details {
			let description = details.exception.and_then(|e| e.description).unwrap_or(details.text);
			return Err(ClaimError::Browser(format!("script failed in frame {frame}: {description}")));
		}
		Ok(evaluated.result.value.unwrap_or(Value::Null))
	}

	async fn frame_tree(&self) -> Result<FrameTreeResult> {
		self.call(method::PAGE_GET_FRAME_TREE, json!({})).await
	}

	/// Waits for the next event in `methods` addressed to this page's session.
	async fn wait_for_event(&self, events: &mut tokio::sync::broadcast::Receiver<slotclaim_protocol::Event>, methods: &[&str], timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		loop {
			match tokio::time::timeout_at(deadline, events.recv()).await {
				Err(_) => return false,
				Ok(Ok(event)) => {
					if event.session_id.as_deref() == Some(self.session_id.as_str()) && methods.contains(&event.method.as_str()) {
						return true;
					}
				}
				Ok(Err(RecvError::Lagged(skipped))) => {
					debug!(target = "slotclaim.browser", skipped, "event receiver lagged");
					// Something happened; treat it as a change.
					return true;
				}
				Ok(Err(RecvError::Closed)) => return false,
			}
		}
	}
}

fn js(value: &str) -> String {
	Value::String(value.to_string()).to_string()
}

#[async_trait]
impl Page for CdpPage {
	fn id(&self) -> &str {
		&self.target_id
	}

	async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
		let mut events = self.connection.subscribe();
		let navigated: NavigateResult = self.call(method::PAGE_NAVIGATE, json!({ "url": url })).await?;
		if let Some(reason) = navigated.error_text {
			return Err(ClaimError::Navigation { url: url.to_string(), reason });
		}
		self.worlds.lock().clear();
		if !self.wait_for_event(&mut events, &[event::LOAD_EVENT_FIRED], timeout).await {
			return Err(ClaimError::Timeout {
				ms: timeout.as_millis() as u64,
				condition: format!("load of {url}"),
			});
		}
		Ok(())
	}

	async fn url(&self) -> Result<String> {
		Ok(self.frame_tree().await?.frame_tree.frame.url)
	}

	async fn frames(&self) -> Result<Vec<FrameInfo>> {
		let tree = self.frame_tree().await?;
		Ok(tree
			.frame_tree
			.flatten()
			.into_iter()
			.map(|frame| FrameInfo {
				id: frame.id.clone(),
				url: frame.url.clone(),
				name: frame.name.clone().filter(|n| !n.is_empty()),
				is_main: frame.parent_id.is_none(),
			})
			.collect())
	}

	async fn count(&self, frame: &str, selector: &str) -> Result<usize> {
		let value = self.evaluate(frame, &format!("document.querySelectorAll({}).length", js(selector))).await?;
		Ok(value.as_u64().unwrap_or(0) as usize)
	}

	async fn click(&self, frame: &str, selector: &str) -> Result<()> {
		let script = format!(
			"(() => {{ const el = document.querySelector({}); if (!el) return false; el.scrollIntoView({{ block: 'center' }}); el.click(); return true; }})()",
			js(selector)
		);
		match self.evaluate(frame, &script).await? {
			Value::Bool(true) => Ok(()),
			_ => Err(ClaimError::ElementNotFound { selector: selector.to_string() }),
		}
	}

	async fn fill(&self, frame: &str, selector: &str, value: &str) -> Result<()> {
		let script = format!(
			"(() => {{ const el = document.querySelector({}); if (!el) return false; el.focus(); el.value = {}; \
			 el.dispatchEvent(new Event('input', {{ bubbles: true }})); el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
			js(selector),
			js(value)
		);
		match self.evaluate(frame, &script).await? {
			Value::Bool(true) => Ok(()),
			_ => Err(ClaimError::ElementNotFound { selector: selector.to_string() }),
		}
	}

	async fn options(&self, frame: &str, selector: &str) -> Result<Vec<SelectOption>> {
		let script = format!(
			"Array.from(document.querySelector({})?.options ?? []).map(o => ({{ value: o.value, text: (o.text || '').trim() }}))",
			js(selector)
		);
		Ok(serde_json::from_value(self.evaluate(frame, &script).await?)?)
	}

	async fn select(&self, frame: &str, selector: &str, choice: &OptionChoice) -> Result<Option<SelectOption>> {
		let (by_value, needle) = match choice {
			OptionChoice::Value(value) => (true, value.as_str()),
			OptionChoice::TextContains(text) => (false, text.as_str()),
		};
		let script = format!(
			"(() => {{ const el = document.querySelector({sel}); if (!el) return {{ missing: true }}; const needle = {needle}; \
			 const opt = Array.from(el.options).find(o => {by_value} ? o.value === needle : (o.text || '').toLowerCase().includes(needle.toLowerCase())); \
			 if (!opt) return null; el.value = opt.value; el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
			 return {{ value: opt.value, text: (opt.text || '').trim() }}; }})()",
			sel = js(selector),
			needle = js(needle),
			by_value = by_value,
		);
		let value = self.evaluate(frame, &script).await?;
		if value.get("missing").is_some() {
			return Err(ClaimError::ElementNotFound { selector: selector.to_string() });
		}
		Ok(serde_json::from_value(value)?)
	}

	async fn read(&self, frame: &str, selector: &str) -> Result<Option<String>> {
		let script = format!(
			"(() => {{ const el = document.querySelector({}); if (!el) return null; \
			 if ('value' in el && typeof el.value === 'string' && el.value) return el.value; return (el.innerText || el.textContent || '').trim(); }})()",
			js(selector)
		);
		Ok(serde_json::from_value(self.evaluate(frame, &script).await?)?)
	}

	async fn attribute_values(&self, frame: &str, selector: &str, attribute: &str) -> Result<Vec<String>> {
		let script = format!(
			"Array.from(document.querySelectorAll({})).map(e => {{ const a = {}; return a ? (e.getAttribute(a) ?? '') : (e.textContent || '').trim(); }})",
			js(selector),
			js(attribute)
		);
		Ok(serde_json::from_value(self.evaluate(frame, &script).await?)?)
	}

	async fn wait_for_change(&self, timeout: Duration) -> Result<bool> {
		let mut events = self.connection.subscribe();
		let changed = self
			.wait_for_event(&mut events, &[event::FRAME_NAVIGATED, event::LOAD_EVENT_FIRED, event::FRAME_STOPPED_LOADING], timeout)
			.await;
		if changed {
			self.worlds.lock().clear();
		}
		Ok(changed)
	}

	async fn close(&self) -> Result<()> {
		if let Err(e) = self.connection.send(method::CLOSE_TARGET, json!({ "targetId": self.target_id }), None).await {
			warn!(target = "slotclaim.browser", target_id = %self.target_id, error = %e, "failed to close page");
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use slotclaim_runtime::fake_transport::FakeTransportBuilder;

	use super::*;

	fn page_on(connection: Arc<Connection>) -> CdpPage {
		CdpPage {
			connection,
			target_id: "T1".into(),
			session_id: "S1".into(),
			worlds: Mutex::new(HashMap::new()),
		}
	}

	#[test]
	fn js_literal_escapes_quotes() {
		assert_eq!(js("a[data-fecha='2026-10-25']"), "\"a[data-fecha='2026-10-25']\"");
		assert_eq!(js("say \"hi\""), "\"say \\\"hi\\\"\"");
	}

	#[tokio::test]
	async fn count_creates_world_then_evaluates() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let connection = Arc::new(Connection::new(parts));
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });
		let page = page_on(Arc::clone(&connection));

		let responder = tokio::spawn(async move {
			controller.wait_for_sent(1).await;
			controller.inject_response(0, json!({ "executionContextId": 7 }));
			controller.wait_for_sent(2).await;
			controller.inject_response(1, json!({ "result": { "type": "number", "value": 3 } }));
			controller.sent()
		});

		assert_eq!(page.count("F1", "a.dia-disponible").await.unwrap(), 3);
		let sent = responder.await.unwrap();
		assert_eq!(sent[0]["method"], "Page.createIsolatedWorld");
		assert_eq!(sent[0]["sessionId"], "S1");
		assert_eq!(sent[1]["params"]["contextId"], 7);
	}

	#[tokio::test]
	async fn wait_for_change_ignores_other_sessions() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let connection = Arc::new(Connection::new(parts));
		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });
		let page = page_on(Arc::clone(&connection));

		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			controller.inject_event("Page.frameNavigated", json!({}), Some("S2"));
			tokio::time::sleep(Duration::from_millis(20)).await;
			controller.inject_event("Page.frameNavigated", json!({}), Some("S1"));
		});

		let started = Instant::now();
		assert!(page.wait_for_change(Duration::from_secs(2)).await.unwrap());
		assert!(started.elapsed() >= Duration::from_millis(35));
	}

	#[tokio::test]
	async fn wait_for_change_times_out_quietly() {
		let (parts, _controller) = FakeTransportBuilder::new().build();
		let connection = Arc::new(Connection::new(parts));
		let page = page_on(connection);
		assert!(!page.wait_for_change(Duration::from_millis(30)).await.unwrap());
	}
}
