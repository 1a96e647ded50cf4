//! Payload shapes of the remote reservation endpoint.
//!
//! The endpoint answers with an ASP.NET-style wrapper: `{"d": {"success": 1, "message": "..."}}`.
//! The flag is numeric and the message is free text; the text is what gets classified.

use serde::{Deserialize, Serialize};

/// The `{"d": ...}` wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedPayload {
	#[serde(rename = "d")]
	pub reply: ClaimReply,
}

/// Numeric success flag plus free-text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReply {
	#[serde(rename = "success", alias = "Success", alias = "exito", alias = "Exito")]
	pub success: i64,
	#[serde(rename = "message", alias = "Message", alias = "mensaje", alias = "Mensaje")]
	pub message: String,
}

impl ClaimReply {
	pub fn succeeded(&self) -> bool {
		self.success == 1
	}

	/// Parses a marker embedded in the result surface. Accepts the wrapped or the bare form.
	pub fn from_marker(text: &str) -> Option<Self> {
		let text = text.trim();
		if text.is_empty() {
			return None;
		}
		if let Ok(wrapped) = serde_json::from_str::<WrappedPayload>(text) {
			return Some(wrapped.reply);
		}
		serde_json::from_str::<ClaimReply>(text).ok()
	}
}

/// Parameters of one claim submission, as they would be posted.
///
/// The password never appears here; only the account name is echoed so dry
/// runs can be audited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimParams {
	pub resource_id: String,
	pub date: String,
	pub slot_id: String,
	pub account: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wrapped_marker_is_unwrapped() {
		let reply = ClaimReply::from_marker(r#"{"d": {"Exito": 1, "Mensaje": "Su reservación se ha realizado con éxito"}}"#).unwrap();
		assert!(reply.succeeded());
		assert!(reply.message.starts_with("Su reservación"));
	}

	#[test]
	fn bare_marker_is_accepted() {
		let reply = ClaimReply::from_marker(r#"{"success": 0, "message": "Cupo lleno"}"#).unwrap();
		assert!(!reply.succeeded());
		assert_eq!(reply.message, "Cupo lleno");
	}

	#[test]
	fn garbage_marker_is_none() {
		assert!(ClaimReply::from_marker("").is_none());
		assert!(ClaimReply::from_marker("<html>").is_none());
	}
}
