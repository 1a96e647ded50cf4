//! Authenticated browser contexts and how attempts share them.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserContext, Page};
use crate::classifier::Classifier;
use crate::error::{ClaimError, Result};
use crate::navigator::{Navigator, Timeouts};
use crate::site::SiteProfile;

/// How attempts map onto authenticated contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
	/// One context, one page per attempt.
	#[default]
	Shared,
	/// One context per attempt.
	Isolated,
}

impl std::fmt::Display for SessionMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			SessionMode::Shared => "shared",
			SessionMode::Isolated => "isolated",
		})
	}
}

impl FromStr for SessionMode {
	type Err = ClaimError;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"shared" => Ok(SessionMode::Shared),
			"isolated" => Ok(SessionMode::Isolated),
			other => Err(ClaimError::Config(format!("unknown session mode `{other}` (expected shared or isolated)"))),
		}
	}
}

#[derive(Clone)]
pub struct Credentials {
	pub username: String,
	password: String,
}

impl Credentials {
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
		}
	}

	pub fn password(&self) -> &str {
		&self.password
	}
}

impl std::fmt::Debug for Credentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Credentials").field("username", &self.username).field("password", &"<redacted>").finish()
	}
}

/// An authenticated context. Invalidated when an attempt detects auth loss.
pub struct SessionHandle {
	mode: SessionMode,
	context: Arc<dyn BrowserContext>,
	account: String,
	valid: AtomicBool,
}

impl std::fmt::Debug for SessionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionHandle")
			.field("id", &self.id())
			.field("mode", &self.mode)
			.field("account", &self.account)
			.field("valid", &self.is_valid())
			.finish()
	}
}

impl SessionHandle {
	pub fn id(&self) -> &str {
		self.context.id()
	}

	pub fn mode(&self) -> SessionMode {
		self.mode
	}

	pub fn account(&self) -> &str {
		&self.account
	}

	pub fn is_valid(&self) -> bool {
		self.valid.load(Ordering::SeqCst)
	}

	pub fn invalidate(&self) {
		self.valid.store(false, Ordering::SeqCst);
	}

	/// A fresh page in this context. Attempts only ever navigate their own page.
	pub async fn new_page(&self) -> Result<Arc<dyn Page>> {
		self.context.new_page().await
	}

	pub async fn close(&self) -> Result<()> {
		self.context.close().await
	}
}

/// Creates and authenticates sessions.
pub struct SessionManager {
	browser: Arc<dyn Browser>,
	site: Arc<SiteProfile>,
	classifier: Arc<Classifier>,
	timeouts: Timeouts,
}

impl SessionManager {
	pub fn new(browser: Arc<dyn Browser>, site: Arc<SiteProfile>, classifier: Arc<Classifier>, timeouts: Timeouts) -> Self {
		Self {
			browser,
			site,
			classifier,
			timeouts,
		}
	}

	/// New context, logged in through a throwaway page.
	pub async fn authenticate(&self, mode: SessionMode, credentials: &Credentials) -> Result<Arc<SessionHandle>> {
		let context = self.browser.new_context().await?;
		let page = context.new_page().await?;
		let mut nav = Navigator::new(Arc::clone(&page), Arc::clone(&self.site), Arc::clone(&self.classifier), self.timeouts);
		let login = nav.authenticate(credentials).await;
		if let Err(e) = page.close().await {
			debug!(target = "slotclaim.session", error = %e, "failed to close login page");
		}
		if let Err(e) = login {
			if let Err(close) = context.close().await {
				debug!(target = "slotclaim.session", error = %close, "failed to close context after rejected login");
			}
			return Err(e);
		}
		Ok(Arc::new(SessionHandle {
			mode,
			context,
			account: credentials.username.clone(),
			valid: AtomicBool::new(true),
		}))
	}

	/// Authenticates what `attempts` attempts need in `mode`.
	///
	/// Shared: one session; failing it is fatal. Isolated: one per attempt,
	/// authenticated concurrently; fatal only when none succeed.
	pub async fn prepare(&self, mode: SessionMode, credentials: &Credentials, attempts: usize) -> Result<SessionPool> {
		match mode {
			SessionMode::Shared => {
				let session = self.authenticate(mode, credentials).await?;
				info!(target = "slotclaim.session", mode = %mode, session = %session.id(), attempts, "session ready");
				Ok(SessionPool {
					mode,
					slots: vec![Ok(session)],
				})
			}
			SessionMode::Isolated => {
				let results = join_all((0..attempts.max(1)).map(|_| self.authenticate(mode, credentials))).await;
				let ready = results.iter().filter(|r| r.is_ok()).count();
				if ready == 0 {
					let reasons: Vec<String> = results.iter().filter_map(|r| r.as_ref().err().map(ToString::to_string)).collect();
					return Err(ClaimError::Auth(format!("no isolated session authenticated: {}", reasons.join("; "))));
				}
				if ready < results.len() {
					warn!(target = "slotclaim.session", ready, wanted = results.len(), "some isolated sessions failed to authenticate");
				} else {
					info!(target = "slotclaim.session", mode = %mode, sessions = ready, "sessions ready");
				}
				Ok(SessionPool {
					mode,
					slots: results.into_iter().map(|r| r.map_err(|e| e.to_string())).collect(),
				})
			}
		}
	}
}

/// Sessions prepared for one run.
pub struct SessionPool {
	mode: SessionMode,
	slots: Vec<std::result::Result<Arc<SessionHandle>, String>>,
}

impl std::fmt::Debug for SessionPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionPool").field("mode", &self.mode).field("slots", &self.slots.len()).finish_non_exhaustive()
	}
}

impl SessionPool {
	pub fn mode(&self) -> SessionMode {
		self.mode
	}

	/// Session for the attempt at `index`. An isolated slot whose login failed yields an auth error.
	pub fn session_for(&self, index: usize) -> Result<Arc<SessionHandle>> {
		let slot = match self.mode {
			SessionMode::Shared => self.slots.first(),
			SessionMode::Isolated => self.slots.get(index),
		};
		match slot {
			Some(Ok(session)) => Ok(Arc::clone(session)),
			Some(Err(reason)) => Err(ClaimError::Auth(reason.clone())),
			None => Err(ClaimError::Auth(format!("no session prepared for attempt {index}"))),
		}
	}

	pub fn sessions(&self) -> impl Iterator<Item = &Arc<SessionHandle>> {
		self.slots.iter().filter_map(|s| s.as_ref().ok())
	}

	pub async fn close_all(&self) {
		for session in self.sessions() {
			if let Err(e) = session.close().await {
				debug!(target = "slotclaim.session", session = %session.id(), error = %e, "failed to close session");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::browser::fake::FakeSite;

	fn manager(site: &FakeSite) -> SessionManager {
		SessionManager::new(
			Arc::new(site.browser()),
			Arc::new(SiteProfile::default()),
			Arc::new(Classifier::default()),
			Timeouts {
				navigation: std::time::Duration::from_millis(500),
				selector: std::time::Duration::from_millis(200),
			},
		)
	}

	#[test]
	fn mode_parses_case_insensitively() {
		assert_eq!("Isolated".parse::<SessionMode>().unwrap(), SessionMode::Isolated);
		assert!("both".parse::<SessionMode>().is_err());
		assert_eq!(SessionMode::Shared.to_string(), "shared");
	}

	#[test]
	fn credentials_debug_hides_password() {
		let text = format!("{:?}", Credentials::new("ana", "hunter2"));
		assert!(text.contains("ana"));
		assert!(!text.contains("hunter2"));
	}

	#[tokio::test]
	async fn shared_prepare_logs_in_once() {
		let site = FakeSite::new(SiteProfile::default()).with_account("ana", "pw");
		let pool = manager(&site).prepare(SessionMode::Shared, &Credentials::new("ana", "pw"), 3).await.unwrap();
		assert_eq!(site.login_count(), 1);
		assert_eq!(pool.session_for(2).unwrap().id(), pool.session_for(0).unwrap().id());
	}

	#[tokio::test]
	async fn isolated_prepare_logs_in_per_attempt() {
		let site = FakeSite::new(SiteProfile::default()).with_account("ana", "pw");
		let pool = manager(&site).prepare(SessionMode::Isolated, &Credentials::new("ana", "pw"), 2).await.unwrap();
		assert_eq!(site.login_count(), 2);
		assert_ne!(pool.session_for(0).unwrap().id(), pool.session_for(1).unwrap().id());
	}

	#[tokio::test]
	async fn bad_password_is_fatal_auth_error() {
		let site = FakeSite::new(SiteProfile::default()).with_account("ana", "pw");
		let err = manager(&site).prepare(SessionMode::Shared, &Credentials::new("ana", "nope"), 1).await.unwrap_err();
		assert!(matches!(err, ClaimError::Auth(ref m) if m.contains("login rejected")), "{err}");

		let err = manager(&site).prepare(SessionMode::Isolated, &Credentials::new("ana", "nope"), 2).await.unwrap_err();
		assert!(matches!(err, ClaimError::Auth(_)));
	}

	#[tokio::test]
	async fn rejected_login_closes_its_context() {
		let site = FakeSite::new(SiteProfile::default()).with_account("ana", "pw");
		let manager = manager(&site);
		assert!(manager.authenticate(SessionMode::Shared, &Credentials::new("ana", "nope")).await.is_err());
		assert_eq!(site.contexts_created(), 1);
		assert_eq!(site.contexts_closed(), 1);

		let pool = manager.prepare(SessionMode::Isolated, &Credentials::new("ana", "pw"), 2).await.unwrap();
		assert_eq!(site.contexts_closed(), 1);
		pool.close_all().await;
		assert_eq!(site.contexts_closed(), 3);
	}
}
