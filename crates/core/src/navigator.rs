//! Claim flow over the remote surface, one transition per operation.
//!
//! ```text
//! LoggedOut → LoggingIn → Dashboard → ClaimSurfaceOpen → ResourceSelected → CalendarLoaded
//!   → DateUnlockPending → DateSelected → FormOpen → SlotSelected → Submitted → Success | Failure
//! ```
//!
//! Every selector and URL comes from the [`SiteProfile`].

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use slotclaim_protocol::{ClaimParams, ClaimReply};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{OptionChoice, Page, SelectOption};
use crate::classifier::{ClaimOutcome, Classifier};
use crate::error::{ClaimError, Result, UnlockTimeout};
use crate::frame::{FrameHandle, FramePredicate, locate_frame};
use crate::session::Credentials;
use crate::site::SiteProfile;

/// Backstop between result checks when no navigation event arrives.
const RESULT_BACKSTOP: Duration = Duration::from_millis(250);
/// Polls between periodic unlock diagnostics.
const DIAGNOSTIC_EVERY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavState {
	LoggedOut,
	LoggingIn,
	Dashboard,
	ClaimSurfaceOpen,
	ResourceSelected,
	CalendarLoaded,
	DateUnlockPending,
	DateSelected,
	FormOpen,
	SlotSelected,
	Submitted,
	Success,
	Failure,
}

impl std::fmt::Display for NavState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Debug::fmt(self, f)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
	pub navigation: Duration,
	pub selector: Duration,
}

impl Default for Timeouts {
	fn default() -> Self {
		Self {
			navigation: Duration::from_secs(30),
			selector: Duration::from_secs(10),
		}
	}
}

/// Progress of one unlock poll. Only ever advances.
#[derive(Debug, Clone)]
pub struct UnlockPollState {
	resource: String,
	date: NaiveDate,
	started: Instant,
	attempts: u32,
	max_wait: Duration,
}

impl UnlockPollState {
	fn new(resource: &str, date: NaiveDate, max_wait: Duration) -> Self {
		Self {
			resource: resource.to_string(),
			date,
			started: Instant::now(),
			attempts: 0,
			max_wait,
		}
	}

	pub fn resource(&self) -> &str {
		&self.resource
	}

	pub fn date(&self) -> NaiveDate {
		self.date
	}

	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}

	pub fn max_wait(&self) -> Duration {
		self.max_wait
	}

	fn expired(&self) -> bool {
		self.elapsed() >= self.max_wait
	}
}

/// How the slot option was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotMatch {
	Id,
	StartTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSelection {
	pub option: SelectOption,
	pub matched_by: SlotMatch,
}

/// What `submit` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
	/// The submit control was activated.
	Sent(ClaimParams),
	/// Dry run: nothing was sent.
	Preview(ClaimParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultSource {
	Marker,
	Text,
}

/// A classified result surface.
#[derive(Debug, Clone)]
pub struct ResultCapture {
	pub outcome: ClaimOutcome,
	pub source: ResultSource,
	pub frame_url: String,
}

/// Drives one page through the claim flow.
pub struct Navigator {
	page: Arc<dyn Page>,
	site: Arc<SiteProfile>,
	classifier: Arc<Classifier>,
	timeouts: Timeouts,
	state: NavState,
	account: String,
	resource: Option<String>,
	unlocked: Option<NaiveDate>,
	surface: Option<FrameHandle>,
	form: Option<FrameHandle>,
	selection: Option<SlotSelection>,
	poll_refresh: bool,
}

impl Navigator {
	pub fn new(page: Arc<dyn Page>, site: Arc<SiteProfile>, classifier: Arc<Classifier>, timeouts: Timeouts) -> Self {
		let poll_refresh = !site.surface.poll_refresh.is_empty();
		Self {
			page,
			site,
			classifier,
			timeouts,
			state: NavState::LoggedOut,
			account: String::new(),
			resource: None,
			unlocked: None,
			surface: None,
			form: None,
			selection: None,
			poll_refresh,
		}
	}

	/// A navigator on a page whose context is already authenticated as `account`.
	pub fn authenticated(page: Arc<dyn Page>, site: Arc<SiteProfile>, classifier: Arc<Classifier>, timeouts: Timeouts, account: &str) -> Self {
		let mut nav = Self::new(page, site, classifier, timeouts);
		nav.state = NavState::Dashboard;
		nav.account = account.to_string();
		nav
	}

	pub fn state(&self) -> NavState {
		self.state
	}

	pub fn page(&self) -> &Arc<dyn Page> {
		&self.page
	}

	fn require(&self, step: &'static str, allowed: &[NavState]) -> Result<()> {
		if allowed.contains(&self.state) {
			Ok(())
		} else {
			Err(ClaimError::InvalidState {
				step,
				state: self.state.to_string(),
			})
		}
	}

	fn fail(&mut self, err: ClaimError) -> ClaimError {
		self.state = NavState::Failure;
		err
	}

	/// Logs in and waits for the dashboard marker. Any failure is an auth error.
	pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
		self.require("authenticate", &[NavState::LoggedOut, NavState::Failure])?;
		self.state = NavState::LoggingIn;
		match self.try_authenticate(credentials).await {
			Ok(()) => {
				self.state = NavState::Dashboard;
				self.account = credentials.username.clone();
				info!(target = "slotclaim.navigator", account = %credentials.username, "authenticated");
				Ok(())
			}
			Err(ClaimError::Auth(reason)) => Err(self.fail(ClaimError::Auth(reason))),
			Err(other) => Err(self.fail(ClaimError::Auth(other.to_string()))),
		}
	}

	async fn try_authenticate(&self, credentials: &Credentials) -> Result<()> {
		let login = &self.site.login;
		self.page.goto(&self.site.login_url()?, self.timeouts.navigation).await?;
		let main = locate_frame(&self.page, &FramePredicate::Main, self.timeouts.navigation).await?;
		main.wait_for_selector(&login.username, self.timeouts.selector).await?;
		main.fill(&login.username, &credentials.username).await?;
		main.fill(&login.password, credentials.password()).await?;
		main.click(&login.submit).await?;

		let deadline = Instant::now() + self.timeouts.navigation;
		loop {
			if main.count(&login.dashboard_marker).await.unwrap_or(0) > 0 {
				return Ok(());
			}
			if !login.error.is_empty() && main.count(&login.error).await.unwrap_or(0) > 0 {
				let message = main.read(&login.error).await.ok().flatten().unwrap_or_default();
				return Err(ClaimError::Auth(format!("login rejected: {}", message.trim())));
			}
			let now = Instant::now();
			if now >= deadline {
				return Err(ClaimError::Auth(format!(
					"dashboard marker `{}` not seen within {}ms",
					login.dashboard_marker,
					self.timeouts.navigation.as_millis()
				)));
			}
			self.page.wait_for_change((deadline - now).min(RESULT_BACKSTOP)).await?;
		}
	}

	/// Loads the claim page and waits for the nested surface.
	pub async fn open_claim_surface(&mut self) -> Result<FrameHandle> {
		self.require("open_claim_surface", &[NavState::Dashboard])?;
		let url = self.site.claim_url()?;
		if let Err(e) = self.page.goto(&url, self.timeouts.navigation).await {
			return Err(self.fail(e));
		}
		let current = self.page.url().await?;
		if self.site.is_login_url(&current) {
			return Err(self.fail(ClaimError::SessionInvalidated(format!("claim page redirected to {current}"))));
		}
		let surface = match self.locate_surface().await {
			Ok(surface) => surface,
			Err(e) => return Err(self.fail(e)),
		};
		self.state = NavState::ClaimSurfaceOpen;
		debug!(target = "slotclaim.navigator", page = %self.page.id(), frame = %surface.identity(), "claim surface open");
		Ok(surface)
	}

	async fn locate_surface(&mut self) -> Result<FrameHandle> {
		let surface = locate_frame(&self.page, &self.site.surface.frame, self.timeouts.navigation).await?;
		surface.wait_for_selector(&self.site.surface.resource_select, self.timeouts.selector).await?;
		self.surface = Some(surface.clone());
		Ok(surface)
	}

	fn surface(&self) -> Result<&FrameHandle> {
		self.surface.as_ref().ok_or(ClaimError::InvalidState {
			step: "surface",
			state: self.state.to_string(),
		})
	}

	/// Picks the resource, confirms, and waits for the calendar.
	pub async fn select_resource_and_continue(&mut self, resource: &str) -> Result<()> {
		self.require("select_resource_and_continue", &[NavState::ClaimSurfaceOpen])?;
		match self.try_select_resource(resource).await {
			Ok(()) => {
				self.state = NavState::CalendarLoaded;
				debug!(target = "slotclaim.navigator", %resource, "calendar loaded");
				Ok(())
			}
			Err(e) => Err(self.fail(e)),
		}
	}

	async fn try_select_resource(&mut self, resource: &str) -> Result<()> {
		let surface = self.surface()?.clone();
		let selector = &self.site.surface.resource_select;
		let chosen = match surface.select(selector, &OptionChoice::Value(resource.to_string())).await? {
			Some(option) => option,
			None => surface
				.select(selector, &OptionChoice::TextContains(resource.to_string()))
				.await?
				.ok_or_else(|| ClaimError::ElementNotFound {
					selector: format!("{selector} option `{resource}`"),
				})?,
		};
		self.resource = Some(resource.to_string());
		self.state = NavState::ResourceSelected;

		// The picker may post back before the continue control is usable.
		self.page.wait_for_change(Duration::from_millis(300)).await?;
		let surface = locate_frame(&self.page, &self.site.surface.frame, self.timeouts.navigation).await?;
		surface.wait_for_selector(&self.site.surface.resource_continue, self.timeouts.selector).await?;
		surface.click(&self.site.surface.resource_continue).await?;
		surface.wait_for_selector(&self.site.surface.calendar_marker, self.timeouts.navigation).await?;
		debug!(target = "slotclaim.navigator", value = %chosen.value, text = %chosen.text, "resource selected");
		self.surface = Some(surface);
		Ok(())
	}

	/// Re-checks the date affordance every `interval` until it appears or `max_wait` runs out.
	///
	/// The first iteration records the set of available affordances, refreshed
	/// every tenth poll; the timeout error carries the last one seen.
	pub async fn poll_for_unlock(&mut self, date: NaiveDate, interval: Duration, max_wait: Duration, mut on_tick: impl FnMut(Duration)) -> Result<Duration> {
		self.require("poll_for_unlock", &[NavState::CalendarLoaded, NavState::DateUnlockPending])?;
		self.state = NavState::DateUnlockPending;
		self.unlocked = None;

		let surface = self.surface()?.clone();
		let selector = self.site.date_selector(date);
		let resource = self.resource.clone().unwrap_or_default();
		let mut poll = UnlockPollState::new(&resource, date, max_wait);
		let mut available: Vec<String> = Vec::new();

		loop {
			poll.attempts += 1;
			if poll.attempts == 1 || poll.attempts % DIAGNOSTIC_EVERY == 0 {
				available = self.available_affordances(&surface).await;
				debug!(
					target = "slotclaim.navigator",
					%resource,
					%date,
					attempts = poll.attempts,
					frame = %surface.identity(),
					%selector,
					available = ?available,
					"unlock poll diagnostics"
				);
			} else if self.poll_refresh {
				if let Err(e) = surface.click(&self.site.surface.poll_refresh).await {
					debug!(target = "slotclaim.navigator", error = %e, "calendar refresh failed");
				}
			}
			on_tick(poll.elapsed());

			let found = match surface.count(&selector).await {
				Ok(n) => n > 0,
				Err(ClaimError::Runtime(e)) if e.is_stale_context() => false,
				Err(e) => return Err(self.fail(e)),
			};
			let elapsed = poll.elapsed();
			if found && elapsed < max_wait {
				self.unlocked = Some(date);
				info!(target = "slotclaim.navigator", %resource, %date, attempts = poll.attempts, elapsed_ms = elapsed.as_millis() as u64, "date unlocked");
				return Ok(elapsed);
			}
			if poll.expired() {
				let err = UnlockTimeout {
					date,
					attempts: poll.attempts,
					elapsed_ms: elapsed.as_millis() as u64,
					frame: surface.identity(),
					selector,
					available,
				};
				warn!(target = "slotclaim.navigator", %resource, error = %err, "unlock wait exhausted");
				return Err(self.fail(err.into()));
			}
			tokio::time::sleep(interval.min(max_wait.saturating_sub(elapsed))).await;
		}
	}

	async fn available_affordances(&self, surface: &FrameHandle) -> Vec<String> {
		let s = &self.site.surface;
		surface.attribute_values(&s.available_affordances, &s.affordance_attribute).await.unwrap_or_default()
	}

	/// Clicks the unlocked date. Only valid right after a successful [`poll_for_unlock`](Self::poll_for_unlock) for `date`.
	pub async fn select_date(&mut self, date: NaiveDate) -> Result<()> {
		if self.state != NavState::DateUnlockPending || self.unlocked != Some(date) {
			return Err(ClaimError::InvalidState {
				step: "select_date",
				state: format!("{} (unlocked: {:?})", self.state, self.unlocked),
			});
		}
		let surface = self.surface()?.clone();
		let result = async {
			surface.click(&self.site.date_selector(date)).await?;
			surface.wait_for_selector(&self.site.surface.request_button, self.timeouts.selector).await
		}
		.await;
		match result {
			Ok(()) => {
				self.state = NavState::DateSelected;
				Ok(())
			}
			Err(e) => Err(self.fail(e)),
		}
	}

	/// Activates the request control and returns the form frame.
	pub async fn open_form(&mut self) -> Result<FrameHandle> {
		self.require("open_form", &[NavState::DateSelected])?;
		let surface = self.surface()?.clone();
		let result = async {
			surface.click(&self.site.surface.request_button).await?;
			let form = locate_frame(&self.page, &self.site.form.frame, self.timeouts.navigation).await?;
			form.wait_for_selector(&self.site.form.slot_select, self.timeouts.selector).await?;
			Ok::<_, ClaimError>(form)
		}
		.await;
		match result {
			Ok(form) => {
				self.form = Some(form.clone());
				self.state = NavState::FormOpen;
				debug!(target = "slotclaim.navigator", frame = %form.identity(), "form open");
				Ok(form)
			}
			Err(e) => Err(self.fail(e)),
		}
	}

	/// Selects by slot id, else by the visible start time.
	pub async fn select_slot(&mut self, slot_id: &str, fallback_text: &str) -> Result<SlotSelection> {
		self.require("select_slot", &[NavState::FormOpen, NavState::SlotSelected])?;
		let form = self.form.clone().ok_or(ClaimError::InvalidState {
			step: "select_slot",
			state: self.state.to_string(),
		})?;
		let selector = self.site.form.slot_select.clone();

		let by_id = match form.select(&selector, &OptionChoice::Value(slot_id.to_string())).await {
			Ok(found) => found,
			Err(e) => return Err(self.fail(e)),
		};
		let selection = match by_id {
			Some(option) => SlotSelection {
				option,
				matched_by: SlotMatch::Id,
			},
			None => {
				let by_text = if fallback_text.trim().is_empty() {
					None
				} else {
					match form.select(&selector, &OptionChoice::TextContains(fallback_text.trim().to_string())).await {
						Ok(found) => found,
						Err(e) => return Err(self.fail(e)),
					}
				};
				let Some(option) = by_text else {
					let offered = form.options(&selector).await.unwrap_or_default();
					let offered: Vec<_> = offered.iter().map(|o| format!("{}={}", o.value, o.text)).collect();
					return Err(self.fail(ClaimError::ElementNotFound {
						selector: format!("{selector} option `{slot_id}` or `{fallback_text}` (offered: {})", offered.join(", ")),
					}));
				};
				warn!(target = "slotclaim.navigator", %slot_id, fallback = %fallback_text, selected = %option.value, "slot id absent; matched by start time");
				SlotSelection {
					option,
					matched_by: SlotMatch::StartTime,
				}
			}
		};
		self.selection = Some(selection.clone());
		self.state = NavState::SlotSelected;
		Ok(selection)
	}

	/// Submits the form. With `dry_run` nothing is sent and the would-be parameters are returned.
	pub async fn submit(&mut self, date: NaiveDate, dry_run: bool) -> Result<Submit> {
		self.require("submit", &[NavState::SlotSelected])?;
		let selection = self.selection.clone().ok_or(ClaimError::InvalidState {
			step: "submit",
			state: self.state.to_string(),
		})?;
		let params = ClaimParams {
			resource_id: self.resource.clone().unwrap_or_default(),
			date: self.site.format_date(date),
			slot_id: selection.option.value,
			account: self.account.clone(),
		};
		if dry_run {
			info!(target = "slotclaim.navigator", resource = %params.resource_id, date = %params.date, slot = %params.slot_id, "submit not sent");
			return Ok(Submit::Preview(params));
		}

		let form = self.form.clone().ok_or(ClaimError::InvalidState {
			step: "submit",
			state: self.state.to_string(),
		})?;
		if let Err(e) = form.click(&self.site.form.submit).await {
			return Err(self.fail(e));
		}
		self.state = NavState::Submitted;
		info!(target = "slotclaim.navigator", resource = %params.resource_id, date = %params.date, slot = %params.slot_id, "claim submitted");
		Ok(Submit::Sent(params))
	}

	/// Waits for a result surface, extracts marker or text, and classifies it.
	pub async fn await_result(&mut self, timeout: Duration) -> Result<ResultCapture> {
		self.require("await_result", &[NavState::Submitted])?;
		let deadline = Instant::now() + timeout;
		loop {
			let url = self.page.url().await.unwrap_or_default();
			if self.site.is_login_url(&url) {
				return Err(self.fail(ClaimError::SessionInvalidated(format!("redirected to {url} after submit"))));
			}

			if let Some(capture) = self.capture_result().await {
				self.state = if capture.outcome.is_success() { NavState::Success } else { NavState::Failure };
				return Ok(capture);
			}

			let now = Instant::now();
			if now >= deadline {
				return Err(self.fail(ClaimError::Timeout {
					ms: timeout.as_millis() as u64,
					condition: "result surface".to_string(),
				}));
			}
			if let Err(e) = self.page.wait_for_change((deadline - now).min(RESULT_BACKSTOP)).await {
				return Err(self.fail(e));
			}
		}
	}

	async fn capture_result(&self) -> Option<ResultCapture> {
		let result = &self.site.result;
		let frames = self.page.frames().await.ok()?;
		for frame in frames {
			let handle = FrameHandle::new(Arc::clone(&self.page), frame.clone());
			if let Some(reply) = handle.read(&result.marker).await.ok().flatten().as_deref().and_then(ClaimReply::from_marker) {
				let outcome = self.classifier.classify(&reply.message);
				if reply.succeeded() != outcome.is_success() {
					warn!(target = "slotclaim.navigator", flag = reply.success, status = %outcome.status(), "marker flag disagrees with message");
				}
				return Some(ResultCapture {
					outcome,
					source: ResultSource::Marker,
					frame_url: frame.url,
				});
			}
			let text = handle.read(&result.text).await.ok().flatten().filter(|t| !t.trim().is_empty());
			if let Some(text) = text {
				return Some(ResultCapture {
					outcome: self.classifier.classify(&text),
					source: ResultSource::Text,
					frame_url: frame.url,
				});
			}
			if self.site.is_result_url(&frame.url) {
				debug!(target = "slotclaim.navigator", url = %frame.url, "result page without message yet");
			}
		}
		None
	}
}
