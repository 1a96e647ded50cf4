//! Immutable run configuration, validated once before anything touches the network.

use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDate;

use crate::classifier::{Classifier, RuleSpec};
use crate::clock::UnlockSchedule;
use crate::engine::EngineOptions;
use crate::error::{ClaimError, Result};
use crate::navigator::Timeouts;
use crate::schedule::ScheduleTable;
use crate::session::SessionMode;
use crate::site::SiteProfile;

/// A resource to claim and the window wanted on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTarget {
	pub id: String,
	pub window: String,
	pub skip: bool,
}

impl ResourceTarget {
	pub fn new(id: impl Into<String>, window: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			window: window.into(),
			skip: false,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
	pub poll_interval: Duration,
	pub max_unlock_wait: Duration,
	pub navigation_timeout: Duration,
	pub selector_timeout: Duration,
	pub result_timeout: Duration,
	/// How long before the unlock sessions are authenticated.
	pub pre_auth_lead: Duration,
	pub stagger: Duration,
	pub progress_every: Duration,
	pub skew_timeout: Duration,
}

impl Default for Timing {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_millis(250),
			max_unlock_wait: Duration::from_secs(120),
			navigation_timeout: Duration::from_secs(30),
			selector_timeout: Duration::from_secs(10),
			result_timeout: Duration::from_secs(30),
			pre_auth_lead: Duration::from_secs(90),
			stagger: Duration::from_millis(40),
			progress_every: Duration::from_secs(30),
			skew_timeout: Duration::from_secs(5),
		}
	}
}

#[derive(Debug, Clone)]
pub struct RunConfig {
	pub resources: Vec<ResourceTarget>,
	pub schedule: ScheduleTable,
	pub site: SiteProfile,
	pub unlock: UnlockSchedule,
	pub timing: Timing,
	pub mode: SessionMode,
	/// Replaces the date computed from the unlock schedule.
	pub target_date: Option<NaiveDate>,
	pub dry_run: bool,
	/// Skip the unlock wait and rehearse against an already-open date. Implies dry run.
	pub shadow: bool,
	pub allow_submit: bool,
	/// URL whose `Date` header calibrates the clock; the site base URL when unset.
	pub skew_url: Option<String>,
	/// When false the local clock is trusted as is.
	pub measure_skew: bool,
	pub classifier_rules: Vec<RuleSpec>,
}

impl RunConfig {
	pub fn new(site: SiteProfile, schedule: ScheduleTable, unlock: UnlockSchedule) -> Self {
		Self {
			resources: Vec::new(),
			schedule,
			site,
			unlock,
			timing: Timing::default(),
			mode: SessionMode::default(),
			target_date: None,
			dry_run: false,
			shadow: false,
			allow_submit: false,
			skew_url: None,
			measure_skew: true,
			classifier_rules: Vec::new(),
		}
	}

	pub fn with_resource(mut self, target: ResourceTarget) -> Self {
		self.resources.push(target);
		self
	}

	/// Resources not skipped, in configured order.
	pub fn active_resources(&self) -> Vec<&ResourceTarget> {
		self.resources.iter().filter(|r| !r.skip).collect()
	}

	/// Dry run requested directly or implied by shadow mode.
	pub fn effective_dry_run(&self) -> bool {
		self.dry_run || self.shadow
	}

	pub fn skew_url(&self) -> &str {
		self.skew_url.as_deref().unwrap_or(&self.site.base_url)
	}

	pub fn timeouts(&self) -> Timeouts {
		Timeouts {
			navigation: self.timing.navigation_timeout,
			selector: self.timing.selector_timeout,
		}
	}

	pub fn engine_options(&self) -> EngineOptions {
		EngineOptions {
			stagger: self.timing.stagger,
			poll_interval: self.timing.poll_interval,
			max_unlock_wait: self.timing.max_unlock_wait,
			result_timeout: self.timing.result_timeout,
			dry_run: self.effective_dry_run(),
			allow_submit: self.allow_submit,
		}
	}

	pub fn classifier(&self) -> Result<Classifier> {
		Classifier::from_specs(&self.classifier_rules)
	}

	pub fn validate(&self) -> Result<()> {
		if self.resources.is_empty() {
			return Err(ClaimError::Config("no resources configured".to_string()));
		}
		let mut seen = HashSet::new();
		for target in &self.resources {
			if target.id.trim().is_empty() {
				return Err(ClaimError::Config("resource with empty id".to_string()));
			}
			if !seen.insert(target.id.as_str()) {
				return Err(ClaimError::Config(format!("resource `{}` listed twice", target.id)));
			}
			if !target.skip && target.window.trim().is_empty() {
				return Err(ClaimError::Config(format!("resource `{}` has no time window", target.id)));
			}
		}

		let t = &self.timing;
		if t.poll_interval.is_zero() {
			return Err(ClaimError::Config("poll interval must be positive".to_string()));
		}
		if t.max_unlock_wait < t.poll_interval {
			return Err(ClaimError::Config("max unlock wait must be at least one poll interval".to_string()));
		}
		if t.navigation_timeout.is_zero() || t.selector_timeout.is_zero() || t.result_timeout.is_zero() {
			return Err(ClaimError::Config("timeouts must be positive".to_string()));
		}
		if t.stagger > Duration::from_secs(1) {
			return Err(ClaimError::Config(format!("stagger of {}ms is not a small stagger", t.stagger.as_millis())));
		}

		self.site.validate()?;
		self.classifier()?;
		Ok(())
	}
}
