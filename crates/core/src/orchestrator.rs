//! One claim run, phase by phase.
//!
//! 1. measure clock skew
//! 2. authenticate `pre_auth_lead` before the unlock
//! 3. wait for the unlock
//! 4. compute the target date and resolve slot ids (never before the unlock)
//! 5. dispatch attempts concurrently
//! 6. aggregate into one report
//! 7. deliver the report
//!
//! Only setup failures (configuration, authentication) abort the run.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::browser::Browser;
use crate::classifier::Classifier;
use crate::clock::ClockService;
use crate::config::RunConfig;
use crate::engine::ExecutionEngine;
use crate::error::{ClaimError, Result};
use crate::report::{AttemptRecord, ClaimRequest, ReportEntry, ReportSink, RunReport, UnlockMark};
use crate::session::{Credentials, SessionManager, SessionPool};
use crate::site::SiteProfile;

pub struct Orchestrator {
	config: Arc<RunConfig>,
	browser: Arc<dyn Browser>,
	clock: Arc<ClockService>,
	classifier: Arc<Classifier>,
	credentials: Credentials,
	sink: Arc<dyn ReportSink>,
}

impl Orchestrator {
	/// Validates `config`; nothing is contacted yet.
	pub fn new(config: RunConfig, browser: Arc<dyn Browser>, credentials: Credentials, sink: Arc<dyn ReportSink>) -> Result<Self> {
		config.validate()?;
		if credentials.username.trim().is_empty() {
			return Err(ClaimError::Config("username is empty".to_string()));
		}
		let clock = ClockService::new(config.unlock.clone()).with_progress_every(config.timing.progress_every);
		let classifier = config.classifier()?;
		Ok(Self {
			config: Arc::new(config),
			browser,
			clock: Arc::new(clock),
			classifier: Arc::new(classifier),
			credentials,
			sink,
		})
	}

	/// Replaces the clock, e.g. with one on a fixed time source.
	pub fn with_clock(mut self, clock: ClockService) -> Self {
		self.clock = Arc::new(clock);
		self
	}

	pub fn config(&self) -> &RunConfig {
		&self.config
	}

	/// Runs every phase. `Ok(None)` means no resource needed action; nothing was contacted.
	pub async fn run(&self) -> Result<Option<RunReport>> {
		let active = self.config.active_resources();
		if active.is_empty() {
			info!(target = "slotclaim.orchestrator", "no resource needed action this run");
			return Ok(None);
		}

		let skew = if self.config.measure_skew {
			self.clock.remote_skew(self.config.skew_url(), self.config.timing.skew_timeout).await
		} else {
			debug!(target = "slotclaim.orchestrator", "skew measurement disabled");
			TimeDelta::zero()
		};
		self.clock.set_skew(skew);

		let shadow = self.config.shadow;
		let planned_unlock = self.clock.next_unlock();
		if shadow {
			info!(target = "slotclaim.orchestrator", resources = active.len(), "shadow run: no unlock wait, submit disabled");
		} else {
			let lead = TimeDelta::from_std(self.config.timing.pre_auth_lead).unwrap_or(TimeDelta::zero());
			let pre_auth_at = planned_unlock.with_timezone(&Utc) - lead;
			info!(
				target = "slotclaim.orchestrator",
				unlock = %planned_unlock,
				pre_auth_at = %pre_auth_at,
				ms_until_unlock = self.clock.ms_until_unlock(),
				"run scheduled"
			);
			self.clock.wait_until(pre_auth_at).await;
		}

		let timeouts = self.config.timeouts();
		let site = Arc::new(self.config.site.clone());
		let sessions = SessionManager::new(Arc::clone(&self.browser), Arc::clone(&site), Arc::clone(&self.classifier), timeouts);
		let pool = sessions.prepare(self.config.mode, &self.credentials, active.len()).await?;

		let report = self.race(&pool, site, skew, shadow, planned_unlock).await;
		pool.close_all().await;

		self.sink.deliver(&report).await?;
		Ok(Some(report))
	}

	/// Waits for `planned_unlock`, the instant fixed before authentication.
	async fn race(&self, pool: &SessionPool, site: Arc<SiteProfile>, skew: TimeDelta, shadow: bool, planned_unlock: DateTime<Tz>) -> RunReport {
		let unlock = if shadow {
			self.clock.now().with_timezone(&self.clock.schedule().timezone)
		} else {
			self.clock.wait_until(planned_unlock.with_timezone(&Utc)).await;
			planned_unlock
		};

		// "Today" is only known once the boundary has been crossed.
		let target_date = self.target_date(shadow, unlock);
		info!(target = "slotclaim.orchestrator", %target_date, %unlock, "unlock reached; resolving slots");

		let mut records: Vec<Option<AttemptRecord>> = Vec::new();
		let mut requests = Vec::new();
		for target in self.config.active_resources() {
			match self.config.schedule.resolve(&target.id, target_date, &target.window) {
				Ok(slot_id) => {
					requests.push(ClaimRequest {
						resource_id: target.id.clone(),
						date: target_date,
						slot_id,
						window: target.window.clone(),
					});
					records.push(None);
				}
				Err(e) => {
					warn!(target = "slotclaim.orchestrator", resource = %target.id, error = %e, "slot resolution failed");
					let err = ClaimError::from(e);
					records.push(Some(AttemptRecord::failed(&target.id, None, err.kind(), err.to_string())));
				}
			}
		}

		let engine = ExecutionEngine::new(site, Arc::clone(&self.classifier), self.config.timeouts(), self.config.engine_options());
		let mark = UnlockMark::new(unlock.with_timezone(&Utc), skew);
		let mut dispatched = engine.run_concurrent(pool, requests, &mark).await.into_iter();
		let records: Vec<AttemptRecord> = records.into_iter().filter_map(|slot| slot.or_else(|| dispatched.next())).collect();

		RunReport {
			unlock: unlock.fixed_offset(),
			target_date,
			mode: pool.mode(),
			dry_run: self.config.effective_dry_run(),
			shadow,
			allow_submit: self.config.allow_submit,
			skew_ms: skew.num_milliseconds(),
			entries: records.iter().map(ReportEntry::from).collect(),
			fallbacks: engine.fallbacks(),
			recommended_mode: engine.recommended_mode(),
		}
	}

	fn target_date(&self, shadow: bool, unlock: DateTime<Tz>) -> NaiveDate {
		if let Some(date) = self.config.target_date {
			return date;
		}
		if shadow {
			self.config.unlock.latest_open_date(self.clock.now())
		} else {
			self.config.unlock.target_date(unlock)
		}
	}
}
