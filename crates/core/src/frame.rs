//! Typed frame location over nested presentation surfaces.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

use crate::browser::{FrameInfo, OptionChoice, Page, SelectOption};
use crate::error::{ClaimError, Result};

const LOCATE_INTERVAL: Duration = Duration::from_millis(50);

/// Which frame of a page an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum FramePredicate {
	Main,
	UrlContains(String),
	Name(String),
	/// First frame, in tree order, containing an element matching the selector.
	HasSelector(String),
}

impl std::fmt::Display for FramePredicate {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FramePredicate::Main => f.write_str("main frame"),
			FramePredicate::UrlContains(part) => write!(f, "frame with url containing `{part}`"),
			FramePredicate::Name(name) => write!(f, "frame named `{name}`"),
			FramePredicate::HasSelector(selector) => write!(f, "frame containing `{selector}`"),
		}
	}
}

impl FramePredicate {
	async fn matches(&self, page: &dyn Page, frame: &FrameInfo) -> Result<bool> {
		Ok(match self {
			FramePredicate::Main => frame.is_main,
			FramePredicate::UrlContains(part) => frame.url.to_lowercase().contains(&part.to_lowercase()),
			FramePredicate::Name(name) => frame.name.as_deref() == Some(name.as_str()),
			FramePredicate::HasSelector(selector) => page.count(&frame.id, selector).await? > 0,
		})
	}
}

/// A frame of a page, addressed by id. Operations go through the owning page.
#[derive(Clone)]
pub struct FrameHandle {
	page: Arc<dyn Page>,
	info: FrameInfo,
}

impl std::fmt::Debug for FrameHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FrameHandle").field("page", &self.page.id()).field("frame", &self.info).finish()
	}
}

impl FrameHandle {
	pub fn new(page: Arc<dyn Page>, info: FrameInfo) -> Self {
		Self { page, info }
	}

	pub fn info(&self) -> &FrameInfo {
		&self.info
	}

	/// Frame id plus URL, for diagnostics.
	pub fn identity(&self) -> String {
		format!("{} {}", self.info.id, self.info.url)
	}

	pub async fn count(&self, selector: &str) -> Result<usize> {
		self.page.count(&self.info.id, selector).await
	}

	pub async fn click(&self, selector: &str) -> Result<()> {
		self.page.click(&self.info.id, selector).await
	}

	pub async fn fill(&self, selector: &str, value: &str) -> Result<()> {
		self.page.fill(&self.info.id, selector, value).await
	}

	pub async fn options(&self, selector: &str) -> Result<Vec<SelectOption>> {
		self.page.options(&self.info.id, selector).await
	}

	pub async fn select(&self, selector: &str, choice: &OptionChoice) -> Result<Option<SelectOption>> {
		self.page.select(&self.info.id, selector, choice).await
	}

	pub async fn read(&self, selector: &str) -> Result<Option<String>> {
		self.page.read(&self.info.id, selector).await
	}

	pub async fn attribute_values(&self, selector: &str, attribute: &str) -> Result<Vec<String>> {
		self.page.attribute_values(&self.info.id, selector, attribute).await
	}

	/// Waits until `selector` matches at least one element of this frame.
	pub async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
		let deadline = Instant::now() + timeout;
		loop {
			match self.count(selector).await {
				Ok(n) if n > 0 => return Ok(()),
				Ok(_) => {}
				// The frame may be mid-navigation; keep waiting.
				Err(ClaimError::Runtime(e)) if e.is_stale_context() => {}
				Err(e) => return Err(e),
			}
			if Instant::now() >= deadline {
				return Err(ClaimError::Timeout {
					ms: timeout.as_millis() as u64,
					condition: format!("`{selector}` in {}", self.identity()),
				});
			}
			tokio::time::sleep(LOCATE_INTERVAL).await;
		}
	}
}

/// Polls the page's frame tree until a frame satisfies `predicate`.
pub async fn locate_frame(page: &Arc<dyn Page>, predicate: &FramePredicate, timeout: Duration) -> Result<FrameHandle> {
	let deadline = Instant::now() + timeout;
	loop {
		for frame in page.frames().await? {
			match predicate.matches(page.as_ref(), &frame).await {
				Ok(true) => {
					trace!(target = "slotclaim.frame", %predicate, frame = %frame.id, url = %frame.url, "frame located");
					return Ok(FrameHandle::new(Arc::clone(page), frame));
				}
				Ok(false) => {}
				Err(ClaimError::Runtime(e)) if e.is_stale_context() => {}
				Err(e) => return Err(e),
			}
		}
		if Instant::now() >= deadline {
			return Err(ClaimError::FrameNotFound {
				predicate: predicate.to_string(),
				timeout_ms: timeout.as_millis() as u64,
			});
		}
		tokio::time::sleep(LOCATE_INTERVAL).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn predicate_serializes_tagged() {
		let json = serde_json::to_value(FramePredicate::UrlContains("Calendario".into())).unwrap();
		assert_eq!(json, serde_json::json!({ "kind": "urlContains", "value": "Calendario" }));
		let main: FramePredicate = serde_json::from_value(serde_json::json!({ "kind": "main" })).unwrap();
		assert_eq!(main, FramePredicate::Main);
	}

	#[test]
	fn predicate_display_names_the_condition() {
		assert_eq!(FramePredicate::Name("contenido".into()).to_string(), "frame named `contenido`");
	}

	#[tokio::test]
	async fn locates_by_selector_and_times_out_on_absent_frames() {
		use crate::browser::fake::FakeSite;
		use crate::browser::Browser;
		use crate::site::SiteProfile;

		let profile = SiteProfile::default();
		let context = FakeSite::new(profile.clone()).browser().new_context().await.unwrap();
		let page = context.new_page().await.unwrap();
		page.goto(&profile.login_url().unwrap(), Duration::from_secs(1)).await.unwrap();

		let login = locate_frame(&page, &FramePredicate::HasSelector(profile.login.username.clone()), Duration::from_millis(200)).await.unwrap();
		assert!(login.info().is_main);

		let err = locate_frame(&page, &FramePredicate::UrlContains("Calendario".into()), Duration::from_millis(120)).await.unwrap_err();
		assert!(matches!(err, ClaimError::FrameNotFound { ref predicate, timeout_ms: 120 } if predicate.contains("Calendario")), "{err}");
	}
}
