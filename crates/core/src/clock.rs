//! Skew-corrected wall clock and the unlock schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

/// Longest DST gap searched when the unlock wall time does not exist.
const MAX_GAP_MINUTES: u32 = 24 * 60;

/// Source of "now". Swappable so schedule arithmetic can be tested at fixed instants.
pub trait TimeSource: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTime;

impl TimeSource for SystemTime {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// When new dates open: a wall-clock time in a timezone, opening the date `lead_days` ahead.
#[derive(Debug, Clone)]
pub struct UnlockSchedule {
	pub time: NaiveTime,
	pub timezone: Tz,
	pub lead_days: u32,
	/// A run started this long after the instant still targets it instead of tomorrow's.
	pub late_grace: Duration,
}

impl UnlockSchedule {
	/// The unlock instant that governs `now`.
	pub fn next_unlock(&self, now: DateTime<Utc>) -> DateTime<Tz> {
		let local = now.with_timezone(&self.timezone);
		let today = self.instant_on(local.date_naive());
		let grace = TimeDelta::from_std(self.late_grace).unwrap_or(TimeDelta::zero());
		if now <= today.with_timezone(&Utc) + grace {
			today
		} else {
			self.instant_on(local.date_naive() + TimeDelta::days(1))
		}
	}

	/// The date that opens at `unlock`.
	pub fn target_date(&self, unlock: DateTime<Tz>) -> NaiveDate {
		unlock.date_naive() + TimeDelta::days(i64::from(self.lead_days))
	}

	/// The most recent date that is already open at `now`.
	pub fn latest_open_date(&self, now: DateTime<Utc>) -> NaiveDate {
		let local = now.with_timezone(&self.timezone);
		let today = self.instant_on(local.date_naive());
		let last_unlock = if now >= today.with_timezone(&Utc) {
			today
		} else {
			self.instant_on(local.date_naive() - TimeDelta::days(1))
		};
		self.target_date(last_unlock)
	}

	fn instant_on(&self, date: NaiveDate) -> DateTime<Tz> {
		let mut naive = date.and_time(self.time);
		// Inside a DST gap the wall time does not exist; take the first minute after it.
		for _ in 0..=MAX_GAP_MINUTES {
			if let Some(instant) = self.timezone.from_local_datetime(&naive).earliest() {
				return instant;
			}
			naive += TimeDelta::minutes(1);
		}
		self.timezone.from_utc_datetime(&naive)
	}
}

/// Timezone-aware clock corrected by the measured remote skew.
pub struct ClockService {
	schedule: UnlockSchedule,
	source: Arc<dyn TimeSource>,
	skew_ms: AtomicI64,
	progress_every: Duration,
}

impl ClockService {
	pub fn new(schedule: UnlockSchedule) -> Self {
		Self::with_source(schedule, Arc::new(SystemTime))
	}

	pub fn with_source(schedule: UnlockSchedule, source: Arc<dyn TimeSource>) -> Self {
		Self {
			schedule,
			source,
			skew_ms: AtomicI64::new(0),
			progress_every: Duration::from_secs(30),
		}
	}

	/// Cadence of progress lines while waiting for the unlock.
	pub fn with_progress_every(mut self, every: Duration) -> Self {
		self.progress_every = every.max(Duration::from_millis(1));
		self
	}

	pub fn schedule(&self) -> &UnlockSchedule {
		&self.schedule
	}

	pub fn set_skew(&self, skew: TimeDelta) {
		self.skew_ms.store(skew.num_milliseconds(), Ordering::SeqCst);
	}

	pub fn skew(&self) -> TimeDelta {
		TimeDelta::milliseconds(self.skew_ms.load(Ordering::SeqCst))
	}

	/// Local time shifted onto the remote server's clock.
	pub fn now(&self) -> DateTime<Utc> {
		self.source.now() + self.skew()
	}

	pub fn next_unlock(&self) -> DateTime<Tz> {
		self.schedule.next_unlock(self.now())
	}

	/// Milliseconds until the next unlock instant; zero once it has passed.
	pub fn ms_until_unlock(&self) -> u64 {
		self.ms_until(self.next_unlock().with_timezone(&Utc))
	}

	pub fn ms_until(&self, instant: DateTime<Utc>) -> u64 {
		(instant - self.now()).num_milliseconds().max(0) as u64
	}

	/// Blocks until the next unlock instant and returns it.
	pub async fn wait_until_unlock(&self) -> DateTime<Tz> {
		let unlock = self.next_unlock();
		self.wait_until(unlock.with_timezone(&Utc)).await;
		unlock
	}

	/// Sleeps until `instant` on the corrected clock.
	///
	/// The sleep is split only at the progress cadence, and the final segment
	/// is sized to land on the instant. The loop re-reads the wall clock after
	/// every segment so it never returns early.
	pub async fn wait_until(&self, instant: DateTime<Utc>) {
		loop {
			let remaining = self.ms_until(instant);
			if remaining == 0 && self.now() >= instant {
				break;
			}
			let remaining = Duration::from_millis(remaining.max(1));
			if remaining > self.progress_every {
				info!(target = "slotclaim.clock", remaining_ms = remaining.as_millis() as u64, unlock = %instant, "waiting for unlock");
				tokio::time::sleep(self.progress_every).await;
			} else {
				tokio::time::sleep(remaining).await;
			}
		}
		debug!(target = "slotclaim.clock", unlock = %instant, late_ms = (self.now() - instant).num_milliseconds(), "unlock instant reached");
	}

	/// Measures `server - local` using the `Date` header of a `HEAD` request.
	///
	/// Never fails: any network or parse problem yields zero skew.
	pub async fn remote_skew(&self, url: &str, timeout: Duration) -> TimeDelta {
		match self.measure_skew(url, timeout).await {
			Ok(skew) => {
				info!(target = "slotclaim.clock", %url, skew_ms = skew.num_milliseconds(), "measured remote clock skew");
				skew
			}
			Err(reason) => {
				warn!(target = "slotclaim.clock", %url, %reason, "clock skew unavailable; assuming zero");
				TimeDelta::zero()
			}
		}
	}

	async fn measure_skew(&self, url: &str, timeout: Duration) -> std::result::Result<TimeDelta, String> {
		let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| e.to_string())?;
		let sent = self.source.now();
		let response = client.head(url).send().await.map_err(|e| e.to_string())?;
		let received = self.source.now();

		let header = response
			.headers()
			.get(reqwest::header::DATE)
			.ok_or_else(|| "response has no Date header".to_string())?
			.to_str()
			.map_err(|e| e.to_string())?;
		let server = parse_http_date(header).ok_or_else(|| format!("unparseable Date header: {header}"))?;

		let local_mid = sent + (received - sent) / 2;
		// Date has whole-second resolution; centre it.
		Ok(server + TimeDelta::milliseconds(500) - local_mid)
	}
}

/// Parses an RFC 7231 `Date` value such as `Sat, 17 Oct 2026 05:59:58 GMT`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
	DateTime::parse_from_rfc2822(value.trim()).ok().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
	use std::time::Instant;

	use axum::Router;
	use axum::http::header;
	use axum::routing::get;

	use super::*;

	struct FixedTime(DateTime<Utc>);

	impl TimeSource for FixedTime {
		fn now(&self) -> DateTime<Utc> {
			self.0
		}
	}

	fn mexico_midnight() -> UnlockSchedule {
		UnlockSchedule {
			time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
			timezone: chrono_tz::America::Mexico_City,
			lead_days: 8,
			late_grace: Duration::from_secs(600),
		}
	}

	fn utc(s: &str) -> DateTime<Utc> {
		DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
	}

	#[test]
	fn next_unlock_is_local_midnight_in_target_timezone() {
		let schedule = mexico_midnight();
		// 23:58 in Mexico City (UTC-6).
		let unlock = schedule.next_unlock(utc("2026-10-17T05:58:00Z"));
		assert_eq!(unlock.with_timezone(&Utc), utc("2026-10-17T06:00:00Z"));
		assert_eq!(schedule.target_date(unlock), NaiveDate::from_ymd_opt(2026, 10, 25).unwrap());
	}

	#[test]
	fn unlock_inside_dst_gap_moves_to_first_valid_local_time() {
		// Santiago skips 00:00-01:00 local on 2026-09-06.
		let schedule = UnlockSchedule {
			timezone: chrono_tz::America::Santiago,
			..mexico_midnight()
		};
		let now = utc("2026-09-06T03:00:00Z");
		let unlock = schedule.next_unlock(now);
		assert!(unlock.with_timezone(&Utc) > now, "unlock {unlock} is not after {now}");
		assert_eq!(unlock.date_naive(), NaiveDate::from_ymd_opt(2026, 9, 6).unwrap());
		assert_eq!(unlock.time(), NaiveTime::from_hms_opt(1, 0, 0).unwrap());
		assert_eq!(schedule.target_date(unlock), NaiveDate::from_ymd_opt(2026, 9, 14).unwrap());
	}

	#[test]
	fn run_inside_grace_targets_the_instant_just_passed() {
		let schedule = mexico_midnight();
		let unlock = schedule.next_unlock(utc("2026-10-17T06:03:00Z"));
		assert_eq!(unlock.with_timezone(&Utc), utc("2026-10-17T06:00:00Z"));

		let later = schedule.next_unlock(utc("2026-10-17T07:00:00Z"));
		assert_eq!(later.with_timezone(&Utc), utc("2026-10-18T06:00:00Z"));
	}

	#[test]
	fn latest_open_date_depends_on_side_of_instant() {
		let schedule = mexico_midnight();
		assert_eq!(schedule.latest_open_date(utc("2026-10-17T05:59:00Z")), NaiveDate::from_ymd_opt(2026, 10, 24).unwrap());
		assert_eq!(schedule.latest_open_date(utc("2026-10-17T06:00:00Z")), NaiveDate::from_ymd_opt(2026, 10, 25).unwrap());
	}

	#[test]
	fn ms_until_unlock_applies_skew() {
		let clock = ClockService::with_source(mexico_midnight(), Arc::new(FixedTime(utc("2026-10-17T05:59:50Z"))));
		assert_eq!(clock.ms_until_unlock(), 10_000);
		clock.set_skew(TimeDelta::milliseconds(2_500));
		assert_eq!(clock.ms_until_unlock(), 7_500);
	}

	#[test]
	fn http_date_parses() {
		assert_eq!(parse_http_date("Sat, 17 Oct 2026 05:59:58 GMT"), Some(utc("2026-10-17T05:59:58Z")));
		assert_eq!(parse_http_date("yesterday"), None);
	}

	#[tokio::test]
	async fn wait_until_never_returns_early_and_wakes_promptly() {
		let clock = ClockService::new(mexico_midnight()).with_progress_every(Duration::from_millis(40));
		let target = Utc::now() + TimeDelta::milliseconds(150);
		let started = Instant::now();
		clock.wait_until(target).await;
		let woke = Utc::now();

		assert!(woke >= target, "woke {woke} before {target}");
		assert!(woke - target < TimeDelta::milliseconds(50), "woke {}ms late", (woke - target).num_milliseconds());
		assert!(started.elapsed() >= Duration::from_millis(140));
	}

	#[tokio::test]
	async fn wait_until_unlock_returns_the_instant_it_waited_for() {
		let target = Utc::now() + TimeDelta::milliseconds(120);
		let schedule = UnlockSchedule {
			time: target.time(),
			timezone: chrono_tz::UTC,
			lead_days: 8,
			late_grace: Duration::ZERO,
		};
		let clock = ClockService::new(schedule);
		let unlock = clock.wait_until_unlock().await;
		assert!(Utc::now() >= unlock.with_timezone(&Utc));
		assert!(unlock.with_timezone(&Utc) - target < TimeDelta::seconds(1));
	}

	#[tokio::test]
	async fn wait_until_past_instant_returns_immediately() {
		let clock = ClockService::new(mexico_midnight());
		let started = Instant::now();
		clock.wait_until(Utc::now() - TimeDelta::seconds(5)).await;
		assert!(started.elapsed() < Duration::from_millis(20));
	}

	#[tokio::test]
	async fn remote_skew_is_zero_when_unreachable() {
		let clock = ClockService::new(mexico_midnight());
		let skew = clock.remote_skew("http://127.0.0.1:1/", Duration::from_millis(200)).await;
		assert_eq!(skew, TimeDelta::zero());
	}

	#[tokio::test]
	async fn remote_skew_reads_date_header() {
		let app = Router::new().route("/", get(|| async { ([(header::DATE, "Sat, 01 Jan 2000 00:00:00 GMT")], "ok") }));
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

		let clock = ClockService::new(mexico_midnight());
		let skew = clock.remote_skew(&format!("http://{addr}/"), Duration::from_secs(2)).await;
		let expected = utc("2000-01-01T00:00:00Z") - Utc::now();
		assert!((skew - expected).num_seconds().abs() <= 2, "skew {skew} vs {expected}");
	}
}
