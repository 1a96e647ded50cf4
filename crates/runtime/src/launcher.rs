//! Chromium discovery and launch.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use slotclaim_protocol::VersionInfo;
use tracing::{debug, info, warn};

use crate::discovery::fetch_version_on_port;
use crate::error::{Error, Result};
use crate::process::{free_port, port_available};

/// How to start a local browser.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
	/// Explicit executable; searched on `PATH` and well-known locations when absent.
	pub executable: Option<PathBuf>,
	pub headless: bool,
	/// Remote debugging port; a free one is picked when absent.
	pub port: Option<u16>,
	pub user_data_dir: Option<PathBuf>,
	pub extra_args: Vec<String>,
}

/// A browser process owned by this run. Killed on drop.
pub struct BrowserProcess {
	child: Child,
	port: u16,
	version: VersionInfo,
}

impl BrowserProcess {
	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn ws_endpoint(&self) -> &str {
		&self.version.web_socket_debugger_url
	}

	pub fn version(&self) -> &VersionInfo {
		&self.version
	}
}

impl Drop for BrowserProcess {
	fn drop(&mut self) {
		if let Ok(None) = self.child.try_wait() {
			debug!(target = "slotclaim.runtime", pid = self.child.id(), "terminating browser");
			let _ = self.child.kill();
			let _ = self.child.wait();
		}
	}
}

/// Launches Chromium with remote debugging and waits for its DevTools endpoint.
pub async fn launch(options: &LaunchOptions) -> Result<BrowserProcess> {
	let executable = match &options.executable {
		Some(path) => path.to_string_lossy().into_owned(),
		None => find_chrome_executable().ok_or_else(|| Error::Launch("could not find a Chrome/Chromium executable; pass one explicitly".into()))?,
	};
	let port = match options.port {
		Some(port) if !port_available(port) => return Err(Error::Launch(format!("port {port} is already in use"))),
		Some(port) => port,
		None => free_port()?,
	};
	let user_data_dir = options
		.user_data_dir
		.clone()
		.unwrap_or_else(|| std::env::temp_dir().join(format!("slotclaim-profile-{}", std::process::id())));

	let args = launch_args(port, options.headless, &user_data_dir, &options.extra_args);
	info!(target = "slotclaim.runtime", %executable, port, headless = options.headless, "launching browser");

	let mut cmd = Command::new(&executable);
	cmd.args(&args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
	#[cfg(unix)]
	std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

	let mut child = cmd.spawn().map_err(|e| Error::Launch(format!("failed to start {executable}: {e}")))?;

	let mut last_error = "endpoint not reachable".to_string();
	for _ in 0..40 {
		tokio::time::sleep(Duration::from_millis(150)).await;

		if let Ok(Some(status)) = child.try_wait() {
			return Err(Error::Launch(format!("browser exited before its DevTools endpoint came up (status: {status})")));
		}

		match fetch_version_on_port(port).await {
			Ok(version) => {
				debug!(target = "slotclaim.runtime", browser = ?version.browser, ws = %version.web_socket_debugger_url, "browser ready");
				return Ok(BrowserProcess { child, port, version });
			}
			Err(e) => last_error = e.to_string(),
		}
	}

	warn!(target = "slotclaim.runtime", port, "browser never exposed DevTools; killing it");
	let _ = child.kill();
	let _ = child.wait();
	Err(Error::Launch(format!("DevTools endpoint not available on port {port}: {last_error}")))
}

fn launch_args(port: u16, headless: bool, user_data_dir: &Path, extra: &[String]) -> Vec<String> {
	let mut args = vec![
		format!("--remote-debugging-port={port}"),
		format!("--user-data-dir={}", user_data_dir.display()),
		"--no-first-run".to_string(),
		"--no-default-browser-check".to_string(),
		// Keeps cross-origin iframes in-process so every frame is reachable from the page session.
		"--disable-features=site-per-process,IsolateOrigins".to_string(),
		"--disable-site-isolation-trials".to_string(),
	];
	if headless {
		args.push("--headless=new".to_string());
	}
	args.extend(extra.iter().cloned());
	args.push("about:blank".to_string());
	args
}

fn find_chrome_executable() -> Option<String> {
	let candidates: Vec<&str> = if cfg!(target_os = "macos") {
		vec![
			"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
			"/Applications/Chromium.app/Contents/MacOS/Chromium",
			"/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
		]
	} else if cfg!(target_os = "windows") {
		vec![
			r"C:\Program Files\Google\Chrome\Application\chrome.exe",
			r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
			r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
		]
	} else {
		vec![
			"google-chrome-stable",
			"google-chrome",
			"chromium-browser",
			"chromium",
			"brave-browser",
			"/usr/bin/google-chrome-stable",
			"/usr/bin/chromium",
			"/snap/bin/chromium",
		]
	};

	for candidate in candidates {
		if candidate.starts_with('/') || candidate.contains('\\') {
			if Path::new(candidate).exists() {
				return Some(candidate.to_string());
			}
		} else if which::which(candidate).is_ok() {
			return Some(candidate.to_string());
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn launch_args_carry_port_profile_and_headless() {
		let args = launch_args(9333, true, Path::new("/tmp/profile"), &["--lang=es-MX".to_string()]);
		assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
		assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
		assert!(args.contains(&"--headless=new".to_string()));
		assert!(args.contains(&"--lang=es-MX".to_string()));
		assert_eq!(args.last().map(String::as_str), Some("about:blank"));
	}

	#[test]
	fn headful_launch_omits_headless_flag() {
		let args = launch_args(9333, false, Path::new("/tmp/profile"), &[]);
		assert!(!args.iter().any(|a| a.starts_with("--headless")));
	}

	#[tokio::test]
	async fn missing_executable_fails_fast() {
		let options = LaunchOptions {
			executable: Some(PathBuf::from("/nonexistent/slotclaim-browser")),
			port: Some(1),
			..Default::default()
		};
		assert!(matches!(launch(&options).await, Err(Error::Launch(_))));
	}

	#[tokio::test]
	async fn busy_port_is_refused_before_spawning() {
		let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
		let options = LaunchOptions {
			executable: Some(PathBuf::from("/nonexistent/slotclaim-browser")),
			port: Some(listener.local_addr().unwrap().port()),
			..Default::default()
		};
		let err = launch(&options).await.unwrap_err();
		assert!(err.to_string().contains("already in use"), "{err}");
	}
}
