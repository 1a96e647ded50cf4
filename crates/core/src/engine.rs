//! Concurrent claim attempts over prepared sessions.
//!
//! All attempts of a run are polled together on the current task with
//! `join_all`; dropping the returned future drops every attempt. Each attempt
//! is caught separately, so an error or panic in one only ever produces that
//! attempt's failure record.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::classifier::{Classifier, normalize};
use crate::error::{ClaimError, FailureKind, Result};
use crate::navigator::{Navigator, Submit, Timeouts};
use crate::report::{AttemptRecord, AttemptResult, ClaimRequest, FallbackEvent, PhaseTimings, UnlockMark};
use crate::schedule::start_time;
use crate::session::{SessionHandle, SessionMode, SessionPool};
use crate::site::SiteProfile;

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
	/// Delay between starting consecutive attempts.
	pub stagger: Duration,
	pub poll_interval: Duration,
	pub max_unlock_wait: Duration,
	pub result_timeout: Duration,
	pub dry_run: bool,
	/// Final submit gate. Without it the flow stops at slot selection.
	pub allow_submit: bool,
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self {
			stagger: Duration::from_millis(40),
			poll_interval: Duration::from_millis(250),
			max_unlock_wait: Duration::from_secs(120),
			result_timeout: Duration::from_secs(30),
			dry_run: false,
			allow_submit: false,
		}
	}
}

/// Evidence that a session may have lost its authentication.
#[derive(Debug, Clone, Copy)]
pub enum InvalidationSignal<'a> {
	/// Current page URL.
	Redirect(&'a str),
	/// Raw remote response text.
	Response(&'a str),
	/// Already recognized by the navigator.
	Reported(&'a str),
}

pub struct ExecutionEngine {
	site: Arc<SiteProfile>,
	classifier: Arc<Classifier>,
	timeouts: Timeouts,
	options: EngineOptions,
	fallbacks: Mutex<Vec<FallbackEvent>>,
	prefer_isolated: AtomicBool,
}

impl ExecutionEngine {
	pub fn new(site: Arc<SiteProfile>, classifier: Arc<Classifier>, timeouts: Timeouts, options: EngineOptions) -> Self {
		Self {
			site,
			classifier,
			timeouts,
			options,
			fallbacks: Mutex::new(Vec::new()),
			prefer_isolated: AtomicBool::new(false),
		}
	}

	pub fn options(&self) -> &EngineOptions {
		&self.options
	}

	/// Runs every request concurrently. Returns one record per request, in request order.
	pub async fn run_concurrent(&self, pool: &SessionPool, requests: Vec<ClaimRequest>, unlock: &UnlockMark) -> Vec<AttemptRecord> {
		info!(target = "slotclaim.engine", attempts = requests.len(), mode = %pool.mode(), "dispatching attempts");
		let attempts = requests.into_iter().enumerate().map(|(index, request)| {
			let fallback_request = request.clone();
			async move {
				if index > 0 {
					tokio::time::sleep(self.options.stagger * index as u32).await;
				}
				match AssertUnwindSafe(self.run_attempt(pool, index, request, unlock)).catch_unwind().await {
					Ok(record) => record,
					Err(panic) => {
						let message = panic_message(panic.as_ref());
						error!(target = "slotclaim.engine", resource = %fallback_request.resource_id, %message, "attempt panicked");
						let resource = fallback_request.resource_id.clone();
						AttemptRecord::failed(&resource, Some(fallback_request), FailureKind::Panic, format!("attempt panicked: {message}"))
					}
				}
			}
		});
		join_all(attempts).await
	}

	async fn run_attempt(&self, pool: &SessionPool, index: usize, request: ClaimRequest, unlock: &UnlockMark) -> AttemptRecord {
		let resource = request.resource_id.clone();
		let session = match pool.session_for(index) {
			Ok(session) => session,
			Err(e) => {
				warn!(target = "slotclaim.engine", %resource, error = %e, "no session for attempt");
				return AttemptRecord::failed(&resource, Some(request), e.kind(), e.to_string());
			}
		};
		let page = match session.new_page().await {
			Ok(page) => page,
			Err(e) => {
				let mut record = AttemptRecord::failed(&resource, Some(request), e.kind(), e.to_string());
				record.session = Some(session.id().to_string());
				return record;
			}
		};

		let mut timings = PhaseTimings::default();
		let mut nav = Navigator::authenticated(Arc::clone(&page), Arc::clone(&self.site), Arc::clone(&self.classifier), self.timeouts, session.account());
		let result = match self.drive(&mut nav, &request, unlock, &mut timings).await {
			Ok(result) => result,
			Err(err) => {
				let url = page.url().await.unwrap_or_default();
				let signal = match &err {
					ClaimError::SessionInvalidated(reason) => Some(InvalidationSignal::Reported(reason)),
					_ if self.site.is_login_url(&url) => Some(InvalidationSignal::Redirect(&url)),
					_ => None,
				};
				if let Some(signal) = signal {
					self.detect_session_invalidation(&resource, signal, &session);
				}
				warn!(target = "slotclaim.engine", %resource, state = %nav.state(), kind = %err.kind(), error = %err, "attempt failed");
				AttemptResult::Failed {
					kind: err.kind(),
					message: err.to_string(),
				}
			}
		};
		if let AttemptResult::Classified { outcome, .. } = &result {
			if !outcome.is_success() {
				self.detect_session_invalidation(&resource, InvalidationSignal::Response(outcome.raw()), &session);
			}
		}

		if let Err(e) = page.close().await {
			debug!(target = "slotclaim.engine", %resource, error = %e, "failed to close attempt page");
		}
		AttemptRecord {
			resource,
			request: Some(request),
			result,
			timings,
			session: Some(session.id().to_string()),
		}
	}

	/// One attempt's sequential flow, from the claim surface to the classified result.
	async fn drive(&self, nav: &mut Navigator, request: &ClaimRequest, unlock: &UnlockMark, timings: &mut PhaseTimings) -> Result<AttemptResult> {
		let resource = request.resource_id.as_str();
		nav.open_claim_surface().await?;
		nav.select_resource_and_continue(resource).await?;

		nav.poll_for_unlock(request.date, self.options.poll_interval, self.options.max_unlock_wait, |elapsed| {
			trace!(target = "slotclaim.engine", %resource, elapsed_ms = elapsed.as_millis() as u64, "poll");
		})
		.await?;
		timings.time_to_unlock_ms = Some(unlock.since());

		nav.select_date(request.date).await?;
		nav.open_form().await?;
		timings.time_to_form_ready_ms = Some(unlock.since());

		let selection = nav.select_slot(request.slot_id.as_str(), start_time(&request.window)).await?;
		let hold = self.options.dry_run || !self.options.allow_submit;
		let submitted = nav.submit(request.date, hold).await?;
		timings.time_to_submit_ms = Some(unlock.since());

		match submitted {
			Submit::Preview(params) if self.options.dry_run => Ok(AttemptResult::DryRun {
				params,
				matched_by: selection.matched_by,
			}),
			Submit::Preview(params) => {
				warn!(target = "slotclaim.engine", %resource, slot = %params.slot_id, "allow-submit not set; final submit withheld");
				Ok(AttemptResult::Withheld {
					params,
					matched_by: selection.matched_by,
				})
			}
			Submit::Sent(_) => {
				let capture = nav.await_result(self.options.result_timeout).await?;
				timings.time_to_result_ms = Some(unlock.since());
				if capture.outcome.is_success() {
					info!(target = "slotclaim.engine", %resource, outcome = "success", message = %capture.outcome.message(), "slot claimed");
				} else {
					warn!(target = "slotclaim.engine", %resource, status = %capture.outcome.status(), raw = %capture.outcome.raw(), "claim not granted");
				}
				Ok(AttemptResult::Classified {
					outcome: capture.outcome,
					source: capture.source,
				})
			}
		}
	}

	/// Records a fallback event when `signal` shows auth loss. No retry happens in this run.
	pub fn detect_session_invalidation(&self, resource: &str, signal: InvalidationSignal<'_>, session: &SessionHandle) -> Option<FallbackEvent> {
		let reason = match signal {
			InvalidationSignal::Redirect(url) if self.site.is_login_url(url) => format!("redirected to login page {url}"),
			InvalidationSignal::Redirect(_) => return None,
			InvalidationSignal::Response(text) => {
				let normalized = normalize(text);
				let marker = self.site.invalidation_marker(&normalized)?;
				format!("response mentions `{marker}`")
			}
			InvalidationSignal::Reported(reason) => reason.to_string(),
		};
		session.invalidate();

		if !self.site.session_required {
			info!(target = "slotclaim.engine", %resource, session = %session.id(), %reason, "session signal ignored; claims do not depend on the session");
			return None;
		}

		let event = FallbackEvent {
			resource: resource.to_string(),
			session: session.id().to_string(),
			mode: session.mode(),
			reason,
			recommended: SessionMode::Isolated,
		};
		warn!(target = "slotclaim.engine", %resource, session = %event.session, reason = %event.reason, "session invalidated; next run should use isolated mode");
		self.prefer_isolated.store(true, Ordering::SeqCst);
		self.fallbacks.lock().push(event.clone());
		Some(event)
	}

	pub fn fallbacks(&self) -> Vec<FallbackEvent> {
		self.fallbacks.lock().clone()
	}

	/// `Some(Isolated)` once any session loss was recorded.
	pub fn recommended_mode(&self) -> Option<SessionMode> {
		self.prefer_isolated.load(Ordering::SeqCst).then_some(SessionMode::Isolated)
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::browser::fake::FakeSite;
	use crate::session::{Credentials, SessionManager};

	async fn session(site: &FakeSite, profile: &SiteProfile) -> Arc<SessionHandle> {
		SessionManager::new(Arc::new(site.browser()), Arc::new(profile.clone()), Arc::new(Classifier::default()), Timeouts::default())
			.authenticate(SessionMode::Shared, &Credentials::new("ana", "pw"))
			.await
			.unwrap()
	}

	fn engine(profile: &SiteProfile) -> ExecutionEngine {
		ExecutionEngine::new(Arc::new(profile.clone()), Arc::new(Classifier::default()), Timeouts::default(), EngineOptions::default())
	}

	#[tokio::test]
	async fn csrf_text_records_fallback_and_recommends_isolated() {
		let profile = SiteProfile::default();
		let site = FakeSite::new(profile.clone()).with_account("ana", "pw");
		let session = session(&site, &profile).await;
		let engine = engine(&profile);

		let event = engine
			.detect_session_invalidation("courtA", InvalidationSignal::Response("Error: Token CSRF inválido."), &session)
			.unwrap();
		assert_eq!(event.recommended, SessionMode::Isolated);
		assert!(!session.is_valid());
		assert_eq!(engine.recommended_mode(), Some(SessionMode::Isolated));
		assert_eq!(engine.fallbacks().len(), 1);
	}

	#[tokio::test]
	async fn ordinary_responses_and_urls_are_not_signals() {
		let profile = SiteProfile::default();
		let site = FakeSite::new(profile.clone()).with_account("ana", "pw");
		let session = session(&site, &profile).await;
		let engine = engine(&profile);

		assert!(engine.detect_session_invalidation("courtA", InvalidationSignal::Response("El cupo está lleno."), &session).is_none());
		assert!(
			engine
				.detect_session_invalidation("courtA", InvalidationSignal::Redirect("https://reservaciones.example.org/Reservaciones/Default.aspx"), &session)
				.is_none()
		);
		assert!(session.is_valid());
		assert_eq!(engine.recommended_mode(), None);
	}

	#[tokio::test]
	async fn signal_without_session_dependency_is_only_logged() {
		let profile = SiteProfile {
			session_required: false,
			..SiteProfile::default()
		};
		let site = FakeSite::new(profile.clone()).with_account("ana", "pw");
		let session = session(&site, &profile).await;
		let engine = engine(&profile);

		let url = "https://reservaciones.example.org/Login.aspx?ReturnUrl=%2f";
		assert!(engine.detect_session_invalidation("courtA", InvalidationSignal::Redirect(url), &session).is_none());
		assert!(!session.is_valid());
		assert_eq!(engine.recommended_mode(), None);
	}

	#[test]
	fn panic_payloads_render() {
		let boxed: Box<dyn Any + Send> = Box::new("boom");
		assert_eq!(panic_message(boxed.as_ref()), "boom");
		let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
		assert_eq!(panic_message(boxed.as_ref()), "bang");
	}
}
