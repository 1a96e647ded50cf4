use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// No slot id is recorded for a resource/day/window combination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no slot for {resource} on {weekday} at {window}; {}", describe_windows(.valid))]
pub struct SlotResolutionError {
	pub resource: String,
	pub weekday: Weekday,
	pub window: String,
	/// Windows that do exist for this resource on this weekday.
	pub valid: Vec<String>,
}

fn describe_windows(valid: &[String]) -> String {
	if valid.is_empty() {
		"no windows are scheduled that day".to_string()
	} else {
		format!("valid windows: {}", valid.join(", "))
	}
}

/// The date affordance never showed up within the maximum wait.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{date} not claimable after {elapsed_ms}ms ({attempts} polls, frame {frame}, selector `{selector}`); available: [{}]", .available.join(", "))]
pub struct UnlockTimeout {
	pub date: NaiveDate,
	pub attempts: u32,
	pub elapsed_ms: u64,
	/// Identity (id and URL) of the frame that was polled.
	pub frame: String,
	pub selector: String,
	/// Affordances visible at the last diagnostic capture.
	pub available: Vec<String>,
}

/// Errors raised while preparing or running claim attempts.
#[derive(Debug, Error)]
pub enum ClaimError {
	#[error("authentication failed: {0}")]
	Auth(String),

	#[error(transparent)]
	UnlockTimeout(Box<UnlockTimeout>),

	#[error(transparent)]
	SlotResolution(#[from] SlotResolutionError),

	#[error("session invalidated: {0}")]
	SessionInvalidated(String),

	#[error("no frame matching {predicate} within {timeout_ms}ms")]
	FrameNotFound { predicate: String, timeout_ms: u64 },

	#[error("no element matching `{selector}`")]
	ElementNotFound { selector: String },

	#[error("timed out after {ms}ms waiting for {condition}")]
	Timeout { ms: u64, condition: String },

	#[error("navigation to {url} failed: {reason}")]
	Navigation { url: String, reason: String },

	#[error("{step} is not allowed in state {state}")]
	InvalidState { step: &'static str, state: String },

	#[error("browser: {0}")]
	Browser(String),

	#[error(transparent)]
	Runtime(#[from] slotclaim_runtime::Error),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl From<UnlockTimeout> for ClaimError {
	fn from(err: UnlockTimeout) -> Self {
		ClaimError::UnlockTimeout(Box::new(err))
	}
}

impl ClaimError {
	/// Coarse category used in reports.
	pub fn kind(&self) -> FailureKind {
		match self {
			ClaimError::Auth(_) => FailureKind::Auth,
			ClaimError::UnlockTimeout(_) => FailureKind::UnlockTimeout,
			ClaimError::SlotResolution(_) => FailureKind::SlotResolution,
			ClaimError::SessionInvalidated(_) => FailureKind::SessionInvalidated,
			ClaimError::Timeout { .. } => FailureKind::Timeout,
			ClaimError::FrameNotFound { .. } | ClaimError::ElementNotFound { .. } | ClaimError::Navigation { .. } | ClaimError::InvalidState { .. } => {
				FailureKind::Navigation
			}
			ClaimError::Browser(_) | ClaimError::Runtime(_) | ClaimError::Json(_) => FailureKind::Browser,
			ClaimError::Config(_) => FailureKind::Config,
		}
	}
}

/// Why an attempt produced no classified outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
	Auth,
	UnlockTimeout,
	SlotResolution,
	SessionInvalidated,
	Navigation,
	Timeout,
	Browser,
	Config,
	Panic,
}

impl std::fmt::Display for FailureKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			FailureKind::Auth => "AUTH",
			FailureKind::UnlockTimeout => "UNLOCK_TIMEOUT",
			FailureKind::SlotResolution => "SLOT_RESOLUTION",
			FailureKind::SessionInvalidated => "SESSION_INVALIDATED",
			FailureKind::Navigation => "NAVIGATION",
			FailureKind::Timeout => "TIMEOUT",
			FailureKind::Browser => "BROWSER",
			FailureKind::Config => "CONFIG",
			FailureKind::Panic => "PANIC",
		};
		f.write_str(name)
	}
}

pub type Result<T> = std::result::Result<T, ClaimError>;
