//! Slot resolution: resource → weekday → time window → opaque slot id.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::classifier::normalize;
use crate::error::{ClaimError, Result, SlotResolutionError};

/// Opaque identifier the remote form expects instead of a time range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(String);

impl SlotId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for SlotId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// Serialized shape: `{ resource: { weekday: { "06:00-07:00": "slot id" } } }`.
pub type ScheduleSpec = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

#[derive(Debug, Clone)]
struct Window {
	display: String,
	slot: SlotId,
}

/// Immutable lookup table. Ids are specific to both resource and weekday.
#[derive(Debug, Clone, Default)]
pub struct ScheduleTable {
	entries: BTreeMap<String, BTreeMap<u32, BTreeMap<String, Window>>>,
}

impl ScheduleTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds one mapping. Later entries for the same key replace earlier ones.
	pub fn with_slot(mut self, resource: &str, weekday: Weekday, window: &str, slot: impl Into<String>) -> Self {
		self.entries
			.entry(resource.to_string())
			.or_default()
			.entry(weekday.num_days_from_monday())
			.or_default()
			.insert(
				window_key(window),
				Window {
					display: window.trim().to_string(),
					slot: SlotId::new(slot),
				},
			);
		self
	}

	/// Builds the table from its serialized form, rejecting unknown weekdays and
	/// windows that collide once whitespace is ignored.
	pub fn from_spec(spec: &ScheduleSpec) -> Result<Self> {
		let mut table = Self::new();
		for (resource, days) in spec {
			for (day, windows) in days {
				let weekday = parse_weekday(day).ok_or_else(|| ClaimError::Config(format!("schedule for {resource}: unknown weekday `{day}`")))?;
				for (window, slot) in windows {
					if table.lookup(resource, weekday, window).is_some() {
						return Err(ClaimError::Config(format!("schedule for {resource}: window `{window}` listed twice on {weekday}")));
					}
					table = table.with_slot(resource, weekday, window, slot.clone());
				}
			}
		}
		Ok(table)
	}

	/// Looks up the slot id for `window` on the weekday of `date`.
	pub fn resolve(&self, resource: &str, date: NaiveDate, window: &str) -> std::result::Result<SlotId, SlotResolutionError> {
		let weekday = date.weekday();
		self.lookup(resource, weekday, window).cloned().ok_or_else(|| SlotResolutionError {
			resource: resource.to_string(),
			weekday,
			window: window.to_string(),
			valid: self.windows(resource, weekday),
		})
	}

	/// Windows recorded for `resource` on `weekday`, in time order.
	pub fn windows(&self, resource: &str, weekday: Weekday) -> Vec<String> {
		self.day(resource, weekday)
			.map(|windows| windows.values().map(|w| w.display.clone()).collect())
			.unwrap_or_default()
	}

	pub fn resources(&self) -> impl Iterator<Item = &str> {
		self.entries.keys().map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn day(&self, resource: &str, weekday: Weekday) -> Option<&BTreeMap<String, Window>> {
		self.entries.get(resource)?.get(&weekday.num_days_from_monday())
	}

	fn lookup(&self, resource: &str, weekday: Weekday, window: &str) -> Option<&SlotId> {
		self.day(resource, weekday)?.get(&window_key(window)).map(|w| &w.slot)
	}
}

/// Start time of a window ("06:00 - 07:00" → "06:00"), used to match visible option text.
pub fn start_time(window: &str) -> &str {
	window.split('-').next().unwrap_or(window).trim()
}

fn window_key(window: &str) -> String {
	window.chars().filter(|c| !c.is_whitespace()).collect()
}

/// English names and abbreviations via chrono, plus Spanish day names.
pub fn parse_weekday(value: &str) -> Option<Weekday> {
	if let Ok(day) = value.trim().parse::<Weekday>() {
		return Some(day);
	}
	match normalize(value).as_str() {
		"lunes" => Some(Weekday::Mon),
		"martes" => Some(Weekday::Tue),
		"miercoles" => Some(Weekday::Wed),
		"jueves" => Some(Weekday::Thu),
		"viernes" => Some(Weekday::Fri),
		"sabado" => Some(Weekday::Sat),
		"domingo" => Some(Weekday::Sun),
		_ => None,
	}
}
