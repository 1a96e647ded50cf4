use thiserror::Error;

/// Errors raised by the DevTools connection and browser process helpers.
#[derive(Debug, Error)]
pub enum Error {
	#[error("transport error: {0}")]
	Transport(String),

	#[error("connection closed")]
	ConnectionClosed,

	#[error("protocol error {code}: {message}")]
	Protocol { code: i64, message: String },

	#[error("unexpected reply to {method}: {reason}")]
	UnexpectedReply { method: String, reason: String },

	#[error("browser discovery failed: {0}")]
	Discovery(String),

	#[error("browser launch failed: {0}")]
	Launch(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl Error {
	/// `true` when the error means the evaluation context went away (frame navigated or detached).
	pub fn is_stale_context(&self) -> bool {
		match self {
			Error::Protocol { message, .. } => {
				message.contains("Cannot find context") || message.contains("Execution context was destroyed") || message.contains("No frame")
			}
			_ => false,
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;
