//! Everything site-specific: URLs, selectors, frame predicates, result and
//! invalidation patterns. The navigator reads these and nothing else.

use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classifier::normalize;
use crate::error::{ClaimError, Result};
use crate::frame::FramePredicate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SiteProfile {
	pub base_url: String,
	pub login_path: String,
	pub claim_path: String,
	/// `chrono` format used for dates inside affordance selectors and attributes.
	pub date_format: String,
	pub login: LoginSelectors,
	pub surface: SurfaceSelectors,
	pub form: FormSelectors,
	pub result: ResultSelectors,
	pub invalidation: InvalidationSignals,
	/// Whether the claim endpoint depends on the session cookie. When false,
	/// invalidation signals are logged but no fallback is recommended.
	pub session_required: bool,
}

impl Default for SiteProfile {
	fn default() -> Self {
		Self {
			base_url: "https://reservaciones.example.org/".to_string(),
			login_path: "Login.aspx".to_string(),
			claim_path: "Reservaciones/Default.aspx".to_string(),
			date_format: "%Y-%m-%d".to_string(),
			login: LoginSelectors::default(),
			surface: SurfaceSelectors::default(),
			form: FormSelectors::default(),
			result: ResultSelectors::default(),
			invalidation: InvalidationSignals::default(),
			session_required: true,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginSelectors {
	pub username: String,
	pub password: String,
	pub submit: String,
	/// Present only once the dashboard has loaded.
	pub dashboard_marker: String,
	/// Inline error shown on rejected credentials.
	pub error: String,
}

impl Default for LoginSelectors {
	fn default() -> Self {
		Self {
			username: "#txtUsuario".to_string(),
			password: "#txtContrasena".to_string(),
			submit: "#btnIngresar".to_string(),
			dashboard_marker: "#lnkCerrarSesion".to_string(),
			error: "#lblErrorLogin".to_string(),
		}
	}
}

/// The nested surface holding the resource picker and calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SurfaceSelectors {
	pub frame: FramePredicate,
	pub resource_select: String,
	pub resource_continue: String,
	pub calendar_marker: String,
	/// Selector template; `{date}` is replaced by the formatted date.
	pub date_affordance: String,
	/// Every currently claimable date.
	pub available_affordances: String,
	/// Attribute naming the date of an affordance; text content when empty.
	pub affordance_attribute: String,
	/// Opens the request form once a date is selected.
	pub request_button: String,
	/// Clicked between unlock polls to re-render the calendar; empty to only re-read it.
	pub poll_refresh: String,
}

impl Default for SurfaceSelectors {
	fn default() -> Self {
		Self {
			frame: FramePredicate::UrlContains("Calendario".to_string()),
			resource_select: "#ddlInstalacion".to_string(),
			resource_continue: "#btnContinuar".to_string(),
			calendar_marker: "#calReservaciones".to_string(),
			date_affordance: "a.dia-disponible[data-fecha='{date}']".to_string(),
			available_affordances: "a.dia-disponible".to_string(),
			affordance_attribute: "data-fecha".to_string(),
			request_button: "#btnSolicitar".to_string(),
			poll_refresh: String::new(),
		}
	}
}

/// The request form one layer below the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormSelectors {
	pub frame: FramePredicate,
	pub slot_select: String,
	pub submit: String,
}

impl Default for FormSelectors {
	fn default() -> Self {
		Self {
			frame: FramePredicate::UrlContains("Solicitud".to_string()),
			slot_select: "#ddlHorario".to_string(),
			submit: "#btnReservar".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResultSelectors {
	/// Substrings of a frame URL that mark a result page.
	pub url_patterns: Vec<String>,
	/// Element carrying the machine-readable `{"d": ...}` payload.
	pub marker: String,
	/// Element carrying the visible message.
	pub text: String,
}

impl Default for ResultSelectors {
	fn default() -> Self {
		Self {
			url_patterns: vec!["Resultado".to_string(), "Confirmacion".to_string()],
			marker: "#hfRespuesta".to_string(),
			text: "#lblMensaje".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InvalidationSignals {
	pub login_url_patterns: Vec<String>,
	/// Matched against normalized response text.
	pub text_markers: Vec<String>,
}

impl Default for InvalidationSignals {
	fn default() -> Self {
		Self {
			login_url_patterns: vec!["Login.aspx".to_string(), "SesionExpirada".to_string()],
			text_markers: ["unauthorized", "no autorizado", "sesion expirada", "sesion ha expirado", "session expired", "csrf", "token invalido"]
				.into_iter()
				.map(String::from)
				.collect(),
		}
	}
}

impl SiteProfile {
	pub fn login_url(&self) -> Result<String> {
		self.join(&self.login_path)
	}

	pub fn claim_url(&self) -> Result<String> {
		self.join(&self.claim_path)
	}

	fn join(&self, path: &str) -> Result<String> {
		let base = Url::parse(&self.base_url).map_err(|e| ClaimError::Config(format!("invalid base url `{}`: {e}", self.base_url)))?;
		let joined = base.join(path).map_err(|e| ClaimError::Config(format!("invalid path `{path}`: {e}")))?;
		Ok(joined.into())
	}

	pub fn format_date(&self, date: NaiveDate) -> String {
		date.format(&self.date_format).to_string()
	}

	/// Selector of the affordance for `date`.
	pub fn date_selector(&self, date: NaiveDate) -> String {
		self.surface.date_affordance.replace("{date}", &self.format_date(date))
	}

	pub fn is_login_url(&self, url: &str) -> bool {
		let url = url.to_lowercase();
		self.invalidation.login_url_patterns.iter().any(|p| url.contains(&p.to_lowercase()))
	}

	pub fn is_result_url(&self, url: &str) -> bool {
		let url = url.to_lowercase();
		self.result.url_patterns.iter().any(|p| url.contains(&p.to_lowercase()))
	}

	/// Returns the first invalidation marker found in already-normalized text.
	/// Markers are normalized the same way before comparing.
	pub fn invalidation_marker(&self, normalized: &str) -> Option<&str> {
		self.invalidation.text_markers.iter().map(String::as_str).find(|m| {
			let marker = normalize(m);
			!marker.is_empty() && normalized.contains(&marker)
		})
	}

	/// Checks that URLs parse and the date format renders.
	pub fn validate(&self) -> Result<()> {
		self.login_url()?;
		self.claim_url()?;
		if !self.surface.date_affordance.contains("{date}") {
			return Err(ClaimError::Config("surface.dateAffordance must contain `{date}`".to_string()));
		}
		let mut rendered = String::new();
		write!(rendered, "{}", NaiveDate::MIN.format(&self.date_format)).map_err(|_| ClaimError::Config(format!("invalid dateFormat `{}`", self.date_format)))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn urls_join_against_base() {
		let site = SiteProfile::default();
		assert_eq!(site.login_url().unwrap(), "https://reservaciones.example.org/Login.aspx");
		assert_eq!(site.claim_url().unwrap(), "https://reservaciones.example.org/Reservaciones/Default.aspx");
	}

	#[test]
	fn date_selector_uses_format() {
		let mut site = SiteProfile::default();
		let date = NaiveDate::from_ymd_opt(2026, 10, 25).unwrap();
		assert_eq!(site.date_selector(date), "a.dia-disponible[data-fecha='2026-10-25']");
		site.date_format = "%d/%m/%Y".into();
		assert_eq!(site.date_selector(date), "a.dia-disponible[data-fecha='25/10/2026']");
	}

	#[test]
	fn login_url_detection_is_case_insensitive() {
		let site = SiteProfile::default();
		assert!(site.is_login_url("https://reservaciones.example.org/login.aspx?ReturnUrl=%2f"));
		assert!(!site.is_login_url("https://reservaciones.example.org/Reservaciones/Resultado.aspx"));
		assert!(site.is_result_url("https://reservaciones.example.org/Reservaciones/Resultado.aspx"));
	}

	#[test]
	fn partial_json_keeps_defaults() {
		let site: SiteProfile = serde_json::from_value(serde_json::json!({
			"baseUrl": "https://club.example.com/",
			"login": { "username": "#user" }
		}))
		.unwrap();
		assert_eq!(site.login.username, "#user");
		assert_eq!(site.login.submit, "#btnIngresar");
		assert!(site.session_required);
	}

	#[test]
	fn configured_markers_match_regardless_of_case_and_accents() {
		let mut site = SiteProfile::default();
		site.invalidation.text_markers = vec!["Sesión Expirada".into(), "CSRF".into(), "  ".into()];
		assert_eq!(site.invalidation_marker(&normalize("Su sesión ha EXPIRADA, ingrese de nuevo")), None);
		assert_eq!(site.invalidation_marker(&normalize("Aviso: SESION EXPIRADA")), Some("Sesión Expirada"));
		assert_eq!(site.invalidation_marker(&normalize("invalid csrf token")), Some("CSRF"));
		assert_eq!(site.invalidation_marker("reservacion confirmada"), None);
	}

	#[test]
	fn validate_rejects_template_without_placeholder() {
		let mut site = SiteProfile::default();
		site.surface.date_affordance = "a.dia".into();
		assert!(site.validate().is_err());
		assert!(SiteProfile::default().validate().is_ok());
	}
}
