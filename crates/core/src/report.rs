//! Attempt records and the aggregated run report.

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use slotclaim_protocol::ClaimParams;
use tracing::{info, warn};

use crate::classifier::{ClaimOutcome, ClaimStatus};
use crate::error::{FailureKind, Result};
use crate::navigator::{ResultSource, SlotMatch};
use crate::schedule::SlotId;
use crate::session::SessionMode;

/// One attempt's inputs. Built once, after the unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
	pub resource_id: String,
	pub date: NaiveDate,
	pub slot_id: SlotId,
	/// Window as configured; its start time is the fallback option text.
	pub window: String,
}

/// The unlock instant attempts measure their phases against.
#[derive(Debug, Clone, Copy)]
pub struct UnlockMark {
	pub at: DateTime<Utc>,
	pub skew: TimeDelta,
}

impl UnlockMark {
	pub fn new(at: DateTime<Utc>, skew: TimeDelta) -> Self {
		Self { at, skew }
	}

	/// Milliseconds since the unlock on the skew-corrected clock; negative before it.
	pub fn since(&self) -> i64 {
		(Utc::now() + self.skew - self.at).num_milliseconds()
	}
}

/// Phase timings relative to the unlock instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTimings {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub time_to_unlock_ms: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub time_to_form_ready_ms: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub time_to_submit_ms: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub time_to_result_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "type")]
pub enum AttemptResult {
	Classified { outcome: ClaimOutcome, source: ResultSource },
	/// Dry run: the flow stopped at the submit.
	DryRun { params: ClaimParams, matched_by: SlotMatch },
	/// Allow-submit was not set; the submit was held back.
	Withheld { params: ClaimParams, matched_by: SlotMatch },
	Failed { kind: FailureKind, message: String },
}

/// Exactly one per attempted resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
	pub resource: String,
	pub request: Option<ClaimRequest>,
	pub result: AttemptResult,
	pub timings: PhaseTimings,
	pub session: Option<String>,
}

impl AttemptRecord {
	pub fn failed(resource: &str, request: Option<ClaimRequest>, kind: FailureKind, message: impl Into<String>) -> Self {
		Self {
			resource: resource.to_string(),
			request,
			result: AttemptResult::Failed {
				kind,
				message: message.into(),
			},
			timings: PhaseTimings::default(),
			session: None,
		}
	}

	pub fn is_success(&self) -> bool {
		matches!(&self.result, AttemptResult::Classified { outcome, .. } if outcome.is_success())
	}
}

/// Auth loss seen during the run and the mode recommended because of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackEvent {
	pub resource: String,
	pub session: String,
	pub mode: SessionMode,
	pub reason: String,
	pub recommended: SessionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
	Success,
	SlotTaken,
	LimitExceeded,
	NotYetAvailable,
	Unknown,
	DryRun,
	Withheld,
	Failure,
}

impl From<ClaimStatus> for EntryStatus {
	fn from(status: ClaimStatus) -> Self {
		match status {
			ClaimStatus::Success => EntryStatus::Success,
			ClaimStatus::SlotTaken => EntryStatus::SlotTaken,
			ClaimStatus::LimitExceeded => EntryStatus::LimitExceeded,
			ClaimStatus::NotYetAvailable => EntryStatus::NotYetAvailable,
			ClaimStatus::Unknown => EntryStatus::Unknown,
		}
	}
}

impl std::fmt::Display for EntryStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			EntryStatus::Success => "SUCCESS",
			EntryStatus::SlotTaken => "SLOT_TAKEN",
			EntryStatus::LimitExceeded => "LIMIT_EXCEEDED",
			EntryStatus::NotYetAvailable => "NOT_YET_AVAILABLE",
			EntryStatus::Unknown => "UNKNOWN",
			EntryStatus::DryRun => "DRY_RUN",
			EntryStatus::Withheld => "WITHHELD",
			EntryStatus::Failure => "FAILURE",
		};
		f.write_str(name)
	}
}

/// One resource's line in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
	pub resource: String,
	pub status: EntryStatus,
	pub message: String,
	pub raw: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure: Option<FailureKind>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub slot_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub window: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub days_before_unlock: Option<u32>,
	pub timings: PhaseTimings,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session: Option<String>,
}

impl From<&AttemptRecord> for ReportEntry {
	fn from(record: &AttemptRecord) -> Self {
		let (status, message, raw, failure, days, sent_slot) = match &record.result {
			AttemptResult::Classified { outcome, .. } => (
				EntryStatus::from(outcome.status()),
				outcome.message().to_string(),
				outcome.raw().to_string(),
				None,
				outcome.days_before_unlock(),
				None,
			),
			AttemptResult::DryRun { params, matched_by } => (
				EntryStatus::DryRun,
				format!("Dry run: would submit slot {} ({})", params.slot_id, describe_match(*matched_by)),
				serde_json::to_string(params).unwrap_or_default(),
				None,
				None,
				Some(params.slot_id.clone()),
			),
			AttemptResult::Withheld { params, matched_by } => (
				EntryStatus::Withheld,
				format!("Submit withheld: allow-submit not set (slot {}, {})", params.slot_id, describe_match(*matched_by)),
				serde_json::to_string(params).unwrap_or_default(),
				None,
				None,
				Some(params.slot_id.clone()),
			),
			AttemptResult::Failed { kind, message } => (EntryStatus::Failure, message.clone(), String::new(), Some(*kind), None, None),
		};
		Self {
			resource: record.resource.clone(),
			status,
			message,
			raw,
			failure,
			slot_id: sent_slot.or_else(|| record.request.as_ref().map(|r| r.slot_id.to_string())),
			window: record.request.as_ref().map(|r| r.window.clone()),
			days_before_unlock: days,
			timings: record.timings,
			session: record.session.clone(),
		}
	}
}

fn describe_match(matched_by: SlotMatch) -> &'static str {
	match matched_by {
		SlotMatch::Id => "matched by id",
		SlotMatch::StartTime => "matched by start time",
	}
}

/// The single aggregated result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
	pub unlock: DateTime<FixedOffset>,
	pub target_date: NaiveDate,
	pub mode: SessionMode,
	pub dry_run: bool,
	pub shadow: bool,
	pub allow_submit: bool,
	pub skew_ms: i64,
	pub entries: Vec<ReportEntry>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub fallbacks: Vec<FallbackEvent>,
	/// Set when auth loss was detected; the next run should use this mode.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub recommended_mode: Option<SessionMode>,
}

impl RunReport {
	pub fn successes(&self) -> usize {
		self.entries.iter().filter(|e| e.status == EntryStatus::Success).count()
	}

	pub fn entry(&self, resource: &str) -> Option<&ReportEntry> {
		self.entries.iter().find(|e| e.resource == resource)
	}

	pub fn render_text(&self) -> String {
		let mut out = String::new();
		let mut flags = Vec::new();
		if self.shadow {
			flags.push("shadow");
		}
		if self.dry_run {
			flags.push("dry-run");
		}
		if !self.allow_submit {
			flags.push("submit withheld");
		}
		let _ = writeln!(
			out,
			"Run for {} (unlock {}, mode {}, skew {}ms{}{})",
			self.target_date,
			self.unlock.to_rfc3339(),
			self.mode,
			self.skew_ms,
			if flags.is_empty() { "" } else { ", " },
			flags.join(", ")
		);
		for entry in &self.entries {
			let _ = write!(out, "  {:<12} {:<18} {}", entry.resource, entry.status.to_string(), entry.message);
			if let Some(kind) = entry.failure {
				let _ = write!(out, " [{kind}]");
			}
			if let Some(days) = entry.days_before_unlock {
				let _ = write!(out, " (opens {days} days before)");
			}
			let _ = writeln!(out);
			if !entry.raw.is_empty() && !matches!(entry.status, EntryStatus::DryRun | EntryStatus::Withheld) {
				let _ = writeln!(out, "  {:<12} remote: {}", "", entry.raw.trim());
			}
			let t = &entry.timings;
			if t.time_to_unlock_ms.is_some() || t.time_to_submit_ms.is_some() {
				let _ = writeln!(
					out,
					"  {:<12} unlock {} / form {} / submit {} / result {}",
					"",
					fmt_ms(t.time_to_unlock_ms),
					fmt_ms(t.time_to_form_ready_ms),
					fmt_ms(t.time_to_submit_ms),
					fmt_ms(t.time_to_result_ms)
				);
			}
		}
		for event in &self.fallbacks {
			let _ = writeln!(
				out,
				"  session {} ({}) lost during {}: {}; next run should use {}",
				event.session, event.mode, event.resource, event.reason, event.recommended
			);
		}
		out
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string_pretty(self)?)
	}
}

fn fmt_ms(ms: Option<i64>) -> String {
	ms.map(|ms| format!("+{ms}ms")).unwrap_or_else(|| "-".to_string())
}

/// Receives the run report.
#[async_trait]
pub trait ReportSink: Send + Sync {
	async fn deliver(&self, report: &RunReport) -> Result<()>;
}

/// Writes the report as log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
	async fn deliver(&self, report: &RunReport) -> Result<()> {
		for entry in &report.entries {
			match entry.status {
				EntryStatus::Success => info!(target = "slotclaim.report", resource = %entry.resource, outcome = "success", message = %entry.message, "claim succeeded"),
				EntryStatus::DryRun | EntryStatus::Withheld => {
					info!(target = "slotclaim.report", resource = %entry.resource, status = %entry.status, message = %entry.message, "claim not submitted")
				}
				_ => warn!(target = "slotclaim.report", resource = %entry.resource, status = %entry.status, message = %entry.message, raw = %entry.raw, "claim did not succeed"),
			}
		}
		if let Some(mode) = report.recommended_mode {
			warn!(target = "slotclaim.report", recommended = %mode, "session loss detected; switch mode for the next run");
		}
		Ok(())
	}
}
