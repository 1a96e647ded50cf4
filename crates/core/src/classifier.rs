//! Free-text reservation responses → outcome taxonomy.
//!
//! The remote system answers only in natural language, and wordings of
//! different failure classes overlap. Rules are data evaluated in status
//! priority order (success first), first match wins.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::{ClaimError, Result};

/// Classified result of one claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
	Success,
	SlotTaken,
	LimitExceeded,
	NotYetAvailable,
	Unknown,
}

impl ClaimStatus {
	fn priority(self) -> u8 {
		match self {
			ClaimStatus::Success => 0,
			ClaimStatus::SlotTaken => 1,
			ClaimStatus::LimitExceeded => 2,
			ClaimStatus::NotYetAvailable => 3,
			ClaimStatus::Unknown => 4,
		}
	}
}

impl std::fmt::Display for ClaimStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			ClaimStatus::Success => "SUCCESS",
			ClaimStatus::SlotTaken => "SLOT_TAKEN",
			ClaimStatus::LimitExceeded => "LIMIT_EXCEEDED",
			ClaimStatus::NotYetAvailable => "NOT_YET_AVAILABLE",
			ClaimStatus::Unknown => "UNKNOWN",
		};
		f.write_str(name)
	}
}

/// Outcome of classifying one remote response. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
	status: ClaimStatus,
	message: String,
	raw: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	days_before_unlock: Option<u32>,
}

impl ClaimOutcome {
	pub fn status(&self) -> ClaimStatus {
		self.status
	}

	/// Short human-readable explanation.
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Remote text exactly as received.
	pub fn raw(&self) -> &str {
		&self.raw
	}

	/// "Days before unlock" hint extracted from not-yet-open responses.
	pub fn days_before_unlock(&self) -> Option<u32> {
		self.days_before_unlock
	}

	pub fn is_success(&self) -> bool {
		self.status == ClaimStatus::Success
	}
}

/// One classification rule. The optional hint pattern's first capture group must be numeric.
#[derive(Debug, Clone)]
pub struct Rule {
	status: ClaimStatus,
	pattern: Regex,
	message: String,
	hint: Option<Regex>,
}

impl Rule {
	pub fn new(status: ClaimStatus, pattern: &str, message: &str) -> Result<Self> {
		Ok(Self {
			status,
			pattern: compile(pattern)?,
			message: message.to_string(),
			hint: None,
		})
	}

	pub fn with_hint(mut self, pattern: &str) -> Result<Self> {
		self.hint = Some(compile(pattern)?);
		Ok(self)
	}

	fn extract_hint(&self, normalized: &str) -> Option<u32> {
		let captures = self.hint.as_ref()?.captures(normalized)?;
		captures.get(1)?.as_str().parse().ok()
	}
}

fn compile(pattern: &str) -> Result<Regex> {
	Regex::new(pattern).map_err(|e| ClaimError::Config(format!("invalid classifier pattern `{pattern}`: {e}")))
}

/// Serializable form of a [`Rule`], used to add wordings from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
	pub status: ClaimStatus,
	/// Regex matched against the normalized text (lowercase, no diacritics, single spaces).
	pub pattern: String,
	pub message: String,
	#[serde(default)]
	pub hint: Option<String>,
}

impl TryFrom<&RuleSpec> for Rule {
	type Error = ClaimError;

	fn try_from(spec: &RuleSpec) -> Result<Self> {
		let rule = Rule::new(spec.status, &spec.pattern, &spec.message)?;
		match &spec.hint {
			Some(hint) => rule.with_hint(hint),
			None => Ok(rule),
		}
	}
}

const NO_CONTENT: &str = "No content in response";
const UNRECOGNIZED: &str = "Unrecognized response";

/// (status, pattern, friendly message, hint)
const STANDARD_RULES: &[(ClaimStatus, &str, &str, Option<&str>)] = &[
	(
		ClaimStatus::Success,
		r"se ha realizado con exito|ya se encuentra aprobada|(reservacion|reserva|solicitud) (ha sido|fue) (realizada|registrada|aprobada|confirmada)|reservacion (exitosa|confirmada)|successfully (booked|reserved)|booking confirmed",
		"Reservation confirmed",
		None,
	),
	(
		ClaimStatus::SlotTaken,
		r"cupo (esta |se encuentra )?(lleno|agotado|completo)|sin cupo|no hay cupo|excede (el|la) (cupo|capacidad)|capacidad (maxima|excedida|completa)|(horario|espacio|lugar) (ya )?(esta |se encuentra )?(ocupado|reservado|no disponible)|ya no hay (lugares|espacios)|fully booked|slot (is )?(already )?taken",
		"Slot already taken (capacity reached)",
		None,
	),
	(
		ClaimStatus::LimitExceeded,
		r"limite de reservaciones|(alcanzado|excedido|rebasado) (el|su) (limite|maximo|numero maximo)|maximo de reservaciones|ya cuenta con (una|otra) reservacion|solo (se permite|puede realizar) una reservacion|reservation limit|limit (reached|exceeded)",
		"Reservation limit reached for this account",
		None,
	),
	(
		ClaimStatus::NotYetAvailable,
		r"(aun|todavia) no (esta|se encuentra) (disponible|habilitad)|(seran|sera|estan) habilitad[ao]s? \d+ dias antes|not (yet )?(available|open) yet|not yet (available|open)",
		"Date not open for reservations yet",
		Some(r"(\d+) (dias|days) (antes|before)"),
	),
];

static STANDARD: LazyLock<Classifier> = LazyLock::new(|| {
	let rules = STANDARD_RULES
		.iter()
		.map(|(status, pattern, message, hint)| {
			let rule = Rule::new(*status, pattern, message).expect("standard classifier pattern should compile");
			match hint {
				Some(hint) => rule.with_hint(hint).expect("standard hint pattern should compile"),
				None => rule,
			}
		})
		.collect();
	Classifier { rules }
});

/// Ordered rule list. Cloning is cheap enough for per-run use.
#[derive(Debug, Clone)]
pub struct Classifier {
	rules: Vec<Rule>,
}

impl Default for Classifier {
	fn default() -> Self {
		STANDARD.clone()
	}
}

impl Classifier {
	/// Standard rules plus `extra`. Extra rules of a status are tried after the
	/// standard ones of that status; status priority order is preserved.
	pub fn with_rules(extra: impl IntoIterator<Item = Rule>) -> Self {
		let mut rules = STANDARD.rules.clone();
		rules.extend(extra);
		rules.sort_by_key(|rule| rule.status.priority());
		Self { rules }
	}

	pub fn from_specs(specs: &[RuleSpec]) -> Result<Self> {
		let extra = specs.iter().map(Rule::try_from).collect::<Result<Vec<_>>>()?;
		Ok(Self::with_rules(extra))
	}

	/// Total and pure: any input yields an outcome.
	pub fn classify(&self, raw: &str) -> ClaimOutcome {
		let normalized = normalize(raw);
		if normalized.is_empty() {
			return ClaimOutcome {
				status: ClaimStatus::Unknown,
				message: NO_CONTENT.to_string(),
				raw: raw.to_string(),
				days_before_unlock: None,
			};
		}

		for rule in &self.rules {
			if rule.pattern.is_match(&normalized) {
				return ClaimOutcome {
					status: rule.status,
					message: rule.message.clone(),
					raw: raw.to_string(),
					days_before_unlock: rule.extract_hint(&normalized),
				};
			}
		}

		ClaimOutcome {
			status: ClaimStatus::Unknown,
			message: UNRECOGNIZED.to_string(),
			raw: raw.to_string(),
			days_before_unlock: None,
		}
	}
}

/// Classifies with the standard rules.
pub fn classify(raw: &str) -> ClaimOutcome {
	STANDARD.classify(raw)
}

/// Lowercase, strip diacritics, collapse whitespace.
pub fn normalize(text: &str) -> String {
	let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
	stripped.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn success_example() {
		let outcome = classify("Su reservación se ha realizado con éxito y ya se encuentra aprobada.");
		assert_eq!(outcome.status(), ClaimStatus::Success);
		assert_eq!(outcome.message(), "Reservation confirmed");
	}

	#[test]
	fn not_yet_available_example_extracts_days() {
		let outcome = classify("Esta fecha aún no está disponible para reservación. Las reservaciones serán habilitadas 8 días antes.");
		assert_eq!(outcome.status(), ClaimStatus::NotYetAvailable);
		assert_eq!(outcome.days_before_unlock(), Some(8));
	}

	#[test]
	fn success_ignores_case_accents_and_spacing() {
		for raw in [
			"SU RESERVACIÓN SE HA REALIZADO CON ÉXITO",
			"su reservacion se ha realizado con exito",
			"  Su   reservación\n se ha\trealizado   con éxito ",
		] {
			assert_eq!(classify(raw).status(), ClaimStatus::Success, "{raw:?}");
		}
	}

	#[test]
	fn success_wins_over_overlapping_failure_wording() {
		// "reservado" alone would read as a taken slot.
		let outcome = classify("El horario ya se encuentra reservado a su nombre: su reservación se ha realizado con éxito.");
		assert_eq!(outcome.status(), ClaimStatus::Success);
	}

	#[test]
	fn capacity_and_quota_are_distinguished() {
		assert_eq!(classify("Lo sentimos, el cupo está lleno para este horario.").status(), ClaimStatus::SlotTaken);
		assert_eq!(classify("Ha alcanzado el límite de reservaciones permitidas por semana.").status(), ClaimStatus::LimitExceeded);
		assert_eq!(classify("Usted ya cuenta con una reservación para este día.").status(), ClaimStatus::LimitExceeded);
	}

	#[test]
	fn empty_input_is_unknown_with_no_content() {
		for raw in ["", "   ", "\n\t"] {
			let outcome = classify(raw);
			assert_eq!(outcome.status(), ClaimStatus::Unknown);
			assert_eq!(outcome.message(), NO_CONTENT);
		}
	}

	#[test]
	fn unrecognized_text_is_preserved() {
		let outcome = classify("Error inesperado del servidor (500)");
		assert_eq!(outcome.status(), ClaimStatus::Unknown);
		assert_eq!(outcome.raw(), "Error inesperado del servidor (500)");
	}

	#[test]
	fn classification_is_idempotent() {
		let raw = "Las reservaciones serán habilitadas 3 días antes.";
		assert_eq!(classify(raw), classify(raw));
	}

	#[test]
	fn extra_rules_slot_in_by_priority() {
		let custom = RuleSpec {
			status: ClaimStatus::SlotTaken,
			pattern: "instalacion saturada".into(),
			message: "Facility saturated".into(),
			hint: None,
		};
		let classifier = Classifier::from_specs(&[custom]).unwrap();
		assert_eq!(classifier.classify("Instalación saturada").status(), ClaimStatus::SlotTaken);
		// Standard success still wins.
		assert_eq!(
			classifier.classify("Instalación saturada, pero su reservación se ha realizado con éxito").status(),
			ClaimStatus::Success
		);
	}

	#[test]
	fn invalid_pattern_is_a_config_error() {
		let spec = RuleSpec {
			status: ClaimStatus::Unknown,
			pattern: "(unclosed".into(),
			message: "x".into(),
			hint: None,
		};
		assert!(matches!(Classifier::from_specs(&[spec]), Err(ClaimError::Config(_))));
	}

	#[test]
	fn normalize_strips_marks() {
		assert_eq!(normalize("  Sesión  EXPIRADA\n"), "sesion expirada");
	}
}
