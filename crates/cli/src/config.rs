//! The JSON configuration file and its merge with command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use slotclaim::{Credentials, ResourceTarget, RuleSpec, RunConfig, ScheduleSpec, ScheduleTable, SessionMode, SiteProfile, Timing, UnlockSchedule};

use crate::cli::RunArgs;

pub const USERNAME_VAR: &str = "SLOTCLAIM_USERNAME";
pub const PASSWORD_VAR: &str = "SLOTCLAIM_PASSWORD";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigFile {
	pub site: SiteProfile,
	/// resource → weekday → window → slot id
	pub schedule: ScheduleSpec,
	pub resources: Vec<ResourceEntry>,
	pub unlock: UnlockEntry,
	pub timing: TimingEntry,
	pub mode: SessionMode,
	pub allow_submit: bool,
	pub skew_url: Option<String>,
	pub classifier_rules: Vec<RuleSpec>,
	pub browser: BrowserEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceEntry {
	pub id: String,
	pub window: String,
	pub skip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UnlockEntry {
	/// Wall-clock time, `HH:MM` or `HH:MM:SS`.
	pub time: String,
	/// IANA zone name.
	pub timezone: String,
	pub lead_days: u32,
	pub late_grace_secs: u64,
}

impl Default for UnlockEntry {
	fn default() -> Self {
		Self {
			time: "00:00".to_string(),
			timezone: "America/Mexico_City".to_string(),
			lead_days: 8,
			late_grace_secs: 600,
		}
	}
}

impl UnlockEntry {
	pub fn to_schedule(&self) -> Result<UnlockSchedule> {
		let time = NaiveTime::parse_from_str(&self.time, "%H:%M:%S")
			.or_else(|_| NaiveTime::parse_from_str(&self.time, "%H:%M"))
			.with_context(|| format!("invalid unlock time `{}`", self.time))?;
		let timezone: Tz = self.timezone.parse().map_err(|e| anyhow::anyhow!("invalid timezone `{}`: {e}", self.timezone))?;
		Ok(UnlockSchedule {
			time,
			timezone,
			lead_days: self.lead_days,
			late_grace: Duration::from_secs(self.late_grace_secs),
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimingEntry {
	pub poll_interval_ms: u64,
	pub max_unlock_wait_secs: u64,
	pub navigation_timeout_ms: u64,
	pub selector_timeout_ms: u64,
	pub result_timeout_ms: u64,
	pub pre_auth_lead_secs: u64,
	pub stagger_ms: u64,
	pub progress_every_secs: u64,
	pub skew_timeout_ms: u64,
}

impl Default for TimingEntry {
	fn default() -> Self {
		let t = Timing::default();
		Self {
			poll_interval_ms: t.poll_interval.as_millis() as u64,
			max_unlock_wait_secs: t.max_unlock_wait.as_secs(),
			navigation_timeout_ms: t.navigation_timeout.as_millis() as u64,
			selector_timeout_ms: t.selector_timeout.as_millis() as u64,
			result_timeout_ms: t.result_timeout.as_millis() as u64,
			pre_auth_lead_secs: t.pre_auth_lead.as_secs(),
			stagger_ms: t.stagger.as_millis() as u64,
			progress_every_secs: t.progress_every.as_secs(),
			skew_timeout_ms: t.skew_timeout.as_millis() as u64,
		}
	}
}

impl From<&TimingEntry> for Timing {
	fn from(t: &TimingEntry) -> Self {
		Timing {
			poll_interval: Duration::from_millis(t.poll_interval_ms),
			max_unlock_wait: Duration::from_secs(t.max_unlock_wait_secs),
			navigation_timeout: Duration::from_millis(t.navigation_timeout_ms),
			selector_timeout: Duration::from_millis(t.selector_timeout_ms),
			result_timeout: Duration::from_millis(t.result_timeout_ms),
			pre_auth_lead: Duration::from_secs(t.pre_auth_lead_secs),
			stagger: Duration::from_millis(t.stagger_ms),
			progress_every: Duration::from_secs(t.progress_every_secs),
			skew_timeout: Duration::from_millis(t.skew_timeout_ms),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserEntry {
	pub cdp_endpoint: Option<String>,
	pub executable: Option<PathBuf>,
	pub headless: bool,
}

impl Default for BrowserEntry {
	fn default() -> Self {
		Self {
			cdp_endpoint: None,
			executable: None,
			headless: true,
		}
	}
}

impl ConfigFile {
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
		serde_json::from_str(&content).with_context(|| format!("failed to parse config file {}", path.display()))
	}

	/// Like [`load`](Self::load), but a missing file yields the defaults.
	pub fn load_or_default(path: &Path) -> Result<Self> {
		if path.exists() { Self::load(path) } else { Ok(Self::default()) }
	}

	pub fn schedule_table(&self) -> Result<ScheduleTable> {
		Ok(ScheduleTable::from_spec(&self.schedule)?)
	}

	/// File values with `args` applied on top.
	pub fn into_run_config(self, args: &RunArgs) -> Result<RunConfig> {
		let schedule = self.schedule_table()?;
		let unlock = self.unlock.to_schedule()?;
		let mut config = RunConfig::new(self.site, schedule, unlock);
		config.resources = self
			.resources
			.into_iter()
			.map(|r| ResourceTarget {
				id: r.id,
				window: r.window,
				skip: r.skip,
			})
			.collect();

		for (resource, window) in &args.windows {
			let target = find_resource(&mut config.resources, resource)?;
			target.window = window.clone();
		}
		for resource in &args.skip {
			find_resource(&mut config.resources, resource)?.skip = true;
		}

		config.timing = Timing::from(&self.timing);
		if let Some(ms) = args.poll_interval {
			config.timing.poll_interval = Duration::from_millis(ms);
		}
		if let Some(secs) = args.max_wait {
			config.timing.max_unlock_wait = Duration::from_secs(secs);
		}
		if let Some(ms) = args.navigation_timeout {
			config.timing.navigation_timeout = Duration::from_millis(ms);
		}
		if let Some(ms) = args.selector_timeout {
			config.timing.selector_timeout = Duration::from_millis(ms);
		}

		config.mode = args.mode.unwrap_or(self.mode);
		config.target_date = args.date;
		config.dry_run = args.dry_run;
		config.shadow = args.shadow;
		config.allow_submit = args.allow_submit || self.allow_submit;
		config.skew_url = self.skew_url;
		config.measure_skew = !args.no_skew;
		config.classifier_rules = self.classifier_rules;
		config.validate()?;
		Ok(config)
	}
}

fn find_resource<'a>(resources: &'a mut [ResourceTarget], id: &str) -> Result<&'a mut ResourceTarget> {
	match resources.iter_mut().find(|r| r.id == id) {
		Some(target) => Ok(target),
		None => bail!("resource `{id}` is not in the configuration"),
	}
}

/// Credentials from the environment. Rehearsals against the simulated site may omit them.
pub fn credentials(rehearsal: bool) -> Result<Credentials> {
	let username = std::env::var(USERNAME_VAR).ok().filter(|v| !v.trim().is_empty());
	let password = std::env::var(PASSWORD_VAR).ok();
	match (username, password) {
		(Some(username), Some(password)) => Ok(Credentials::new(username, password)),
		_ if rehearsal => Ok(Credentials::new("rehearsal", "rehearsal")),
		_ => bail!("set {USERNAME_VAR} and {PASSWORD_VAR} to the account's credentials"),
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	const SAMPLE: &str = r#"{
		"schedule": {"courtA": {"wednesday": {"06:00-07:00": "4411", "07:00-08:00": "4412"}}},
		"resources": [{"id": "courtA", "window": "06:00-07:00"}, {"id": "courtB", "window": "06:00-07:00", "skip": true}],
		"unlock": {"time": "07:30", "timezone": "UTC", "leadDays": 3},
		"timing": {"pollIntervalMs": 100},
		"mode": "isolated"
	}"#;

	fn sample() -> ConfigFile {
		serde_json::from_str(SAMPLE).unwrap()
	}

	#[test]
	fn missing_keys_take_defaults() {
		let file = sample();
		assert_eq!(file.timing.poll_interval_ms, 100);
		assert_eq!(file.timing.stagger_ms, 40);
		assert_eq!(file.unlock.late_grace_secs, 600);
		assert_eq!(file.site, SiteProfile::default());
		assert!(file.browser.headless);
	}

	#[test]
	fn file_values_become_the_run_config() {
		let config = sample().into_run_config(&RunArgs::default()).unwrap();
		assert_eq!(config.mode, SessionMode::Isolated);
		assert_eq!(config.timing.poll_interval, Duration::from_millis(100));
		assert_eq!(config.unlock.time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
		assert_eq!(config.unlock.timezone, chrono_tz::UTC);
		assert_eq!(config.unlock.lead_days, 3);
		assert_eq!(config.active_resources().len(), 1);
		assert!(!config.allow_submit);
	}

	#[test]
	fn flags_override_file_values() {
		let args = RunArgs {
			windows: vec![("courtA".into(), "07:00-08:00".into())],
			skip: vec!["courtA".into()],
			mode: Some(SessionMode::Shared),
			poll_interval: Some(50),
			shadow: true,
			no_skew: true,
			..RunArgs::default()
		};
		let config = sample().into_run_config(&args).unwrap();
		assert_eq!(config.resources[0].window, "07:00-08:00");
		assert!(config.resources[0].skip);
		assert_eq!(config.mode, SessionMode::Shared);
		assert_eq!(config.timing.poll_interval, Duration::from_millis(50));
		assert!(config.effective_dry_run());
		assert!(!config.measure_skew);
	}

	#[test]
	fn unknown_resource_override_is_an_error() {
		let args = RunArgs {
			skip: vec!["courtZ".into()],
			..RunArgs::default()
		};
		let err = sample().into_run_config(&args).unwrap_err();
		assert!(err.to_string().contains("courtZ"));
	}

	#[test]
	fn bad_unlock_entries_are_reported() {
		let mut entry = UnlockEntry::default();
		entry.time = "7h30".into();
		assert!(entry.to_schedule().unwrap_err().to_string().contains("7h30"));
		let mut entry = UnlockEntry::default();
		entry.timezone = "Mars/Olympus".into();
		assert!(entry.to_schedule().is_err());
	}

	#[test]
	fn load_reads_file_and_names_it_on_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("slotclaim.json");
		std::fs::File::create(&path).unwrap().write_all(SAMPLE.as_bytes()).unwrap();
		assert_eq!(ConfigFile::load(&path).unwrap(), sample());

		let broken = dir.path().join("broken.json");
		std::fs::write(&broken, "{ not json").unwrap();
		let err = ConfigFile::load(&broken).unwrap_err();
		assert!(format!("{err:#}").contains("broken.json"));

		let missing = dir.path().join("missing.json");
		assert_eq!(ConfigFile::load_or_default(&missing).unwrap(), ConfigFile::default());
	}
}
