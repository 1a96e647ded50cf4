//! DevTools endpoint probing.

use std::time::Duration;

use slotclaim_protocol::VersionInfo;

use crate::error::{Error, Result};

/// Fetches `/json/version` from an `http://host:port` DevTools base URL.
pub async fn fetch_version(base_url: &str) -> Result<VersionInfo> {
	let client = reqwest::Client::builder()
		.timeout(Duration::from_millis(400))
		.build()
		.map_err(|e| Error::Discovery(format!("failed to create HTTP client: {e}")))?;
	let url = format!("{}/json/version", base_url.trim_end_matches('/'));

	let response = client
		.get(&url)
		.send()
		.await
		.map_err(|e| Error::Discovery(format!("{url}: {e}")))?;
	if !response.status().is_success() {
		return Err(Error::Discovery(format!("{url}: unexpected status {}", response.status())));
	}

	response
		.json()
		.await
		.map_err(|e| Error::Discovery(format!("failed to parse DevTools version from {url}: {e}")))
}

/// Tries the loopback spellings of `port` in turn.
pub async fn fetch_version_on_port(port: u16) -> Result<VersionInfo> {
	let mut last_error = "no response".to_string();
	for base in [
		format!("http://127.0.0.1:{port}"),
		format!("http://localhost:{port}"),
		format!("http://[::1]:{port}"),
	] {
		match fetch_version(&base).await {
			Ok(info) => return Ok(info),
			Err(e) => last_error = e.to_string(),
		}
	}
	Err(Error::Discovery(format!("no DevTools endpoint on port {port}: {last_error}")))
}

/// Turns a user-supplied endpoint into a browser websocket URL.
///
/// `ws://` and `wss://` endpoints are used as-is; `http://` endpoints are probed.
pub async fn resolve_ws_endpoint(endpoint: &str) -> Result<String> {
	if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
		return Ok(endpoint.to_string());
	}
	if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
		return fetch_version(endpoint).await.map(|info| info.web_socket_debugger_url);
	}
	Err(Error::Discovery(format!("unsupported endpoint scheme: {endpoint}")))
}
