//! Chrome DevTools Protocol message envelopes and the payloads slotclaim uses.
//!
//! Messages are sent in "flat" session mode: page-scoped commands carry a
//! `sessionId` obtained from `Target.attachToTarget` with `flatten: true`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method names sent over the wire.
pub mod method {
	pub const CREATE_BROWSER_CONTEXT: &str = "Target.createBrowserContext";
	pub const DISPOSE_BROWSER_CONTEXT: &str = "Target.disposeBrowserContext";
	pub const CREATE_TARGET: &str = "Target.createTarget";
	pub const ATTACH_TO_TARGET: &str = "Target.attachToTarget";
	pub const CLOSE_TARGET: &str = "Target.closeTarget";
	pub const PAGE_ENABLE: &str = "Page.enable";
	pub const PAGE_NAVIGATE: &str = "Page.navigate";
	pub const PAGE_GET_FRAME_TREE: &str = "Page.getFrameTree";
	pub const PAGE_CREATE_ISOLATED_WORLD: &str = "Page.createIsolatedWorld";
	pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
	pub const BROWSER_CLOSE: &str = "Browser.close";
}

/// Events the driver reacts to.
pub mod event {
	pub const FRAME_NAVIGATED: &str = "Page.frameNavigated";
	pub const LOAD_EVENT_FIRED: &str = "Page.loadEventFired";
	pub const FRAME_STOPPED_LOADING: &str = "Page.frameStoppedLoading";
	pub const DETACHED_FROM_TARGET: &str = "Target.detachedFromTarget";
}

/// Command sent to the browser.
///
/// ```json
/// { "id": 7, "method": "Page.navigate", "params": { "url": "https://example.com" }, "sessionId": "A1B2" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
	pub id: u64,
	pub method: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub params: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Reply correlated to a [`Request`] by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
	pub id: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Protocol-level error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
}

/// Unsolicited notification. Events carry no `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Anything the browser can send. Responses are tried first since only they carry `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	Response(Response),
	Event(Event),
}

/// `/json/version` response subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
	#[serde(rename = "Browser", default)]
	pub browser: Option<String>,
	#[serde(rename = "Protocol-Version", default)]
	pub protocol_version: Option<String>,
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBrowserContextResult {
	pub browser_context_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetParams {
	pub url: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub browser_context_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetResult {
	pub target_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetResult {
	pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
	pub frame_id: String,
	#[serde(default)]
	pub error_text: Option<String>,
}

/// One frame as reported by `Page.getFrameTree`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
	pub id: String,
	#[serde(default)]
	pub parent_id: Option<String>,
	pub url: String,
	#[serde(default)]
	pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTree {
	pub frame: Frame,
	#[serde(default)]
	pub child_frames: Vec<FrameTree>,
}

impl FrameTree {
	/// Depth-first list of every frame in the tree, root first.
	pub fn flatten(&self) -> Vec<&Frame> {
		let mut out = vec![&self.frame];
		for child in &self.child_frames {
			out.extend(child.flatten());
		}
		out
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTreeResult {
	pub frame_tree: FrameTree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIsolatedWorldResult {
	pub execution_context_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub value: Option<Value>,
	#[serde(default)]
	pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
	pub text: String,
	#[serde(default)]
	pub exception: Option<RemoteObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
	pub result: RemoteObject,
	#[serde(default)]
	pub exception_details: Option<ExceptionDetails>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_and_event_are_distinguished_by_id() {
		let response: Message = serde_json::from_str(r#"{"id": 3, "result": {"frameId": "F1"}, "sessionId": "S"}"#).unwrap();
		let Message::Response(response) = response else {
			panic!("expected response");
		};
		assert_eq!(response.id, 3);
		assert_eq!(response.session_id.as_deref(), Some("S"));

		let event: Message = serde_json::from_str(r#"{"method": "Page.loadEventFired", "params": {"timestamp": 1.5}, "sessionId": "S"}"#).unwrap();
		let Message::Event(event) = event else {
			panic!("expected event");
		};
		assert_eq!(event.method, event::LOAD_EVENT_FIRED);
	}

	#[test]
	fn request_omits_empty_fields() {
		let request = Request {
			id: 1,
			method: method::BROWSER_CLOSE.to_string(),
			params: Value::Null,
			session_id: None,
		};
		let text = serde_json::to_string(&request).unwrap();
		assert_eq!(text, r#"{"id":1,"method":"Browser.close"}"#);
	}

	#[test]
	fn frame_tree_flattens_depth_first() {
		let tree: FrameTreeResult = serde_json::from_str(
			r#"{"frameTree": {
				"frame": {"id": "root", "url": "https://host/app"},
				"childFrames": [
					{"frame": {"id": "outer", "parentId": "root", "url": "https://host/Reservaciones"},
					 "childFrames": [{"frame": {"id": "inner", "parentId": "outer", "url": "https://host/Solicitud", "name": "form"}}]}
				]
			}}"#,
		)
		.unwrap();
		let ids: Vec<&str> = tree.frame_tree.flatten().iter().map(|f| f.id.as_str()).collect();
		assert_eq!(ids, vec!["root", "outer", "inner"]);
	}

	#[test]
	fn version_info_parses_devtools_names() {
		let info: VersionInfo =
			serde_json::from_str(r#"{"Browser": "Chrome/130.0", "Protocol-Version": "1.3", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/x"}"#)
				.unwrap();
		assert_eq!(info.browser.as_deref(), Some("Chrome/130.0"));
		assert!(info.web_socket_debugger_url.starts_with("ws://"));
	}
}
