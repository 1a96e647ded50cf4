//! Browser driver seam.
//!
//! The navigator talks to pages only through these traits. [`cdp`] drives a
//! real Chromium over the DevTools protocol; [`fake`] is an in-memory site used
//! by tests and rehearsals.

pub mod cdp;
pub mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use cdp::CdpBrowser;

/// A browser able to create isolated cookie jars.
#[async_trait]
pub trait Browser: Send + Sync {
	async fn new_context(&self) -> Result<Arc<dyn BrowserContext>>;

	async fn close(&self) -> Result<()>;
}

/// One cookie jar. Pages of the same context share authentication.
#[async_trait]
pub trait BrowserContext: Send + Sync {
	fn id(&self) -> &str;

	async fn new_page(&self) -> Result<Arc<dyn Page>>;

	async fn close(&self) -> Result<()>;
}

/// One tab. Element operations address a frame by id and act on the first match of a CSS selector.
#[async_trait]
pub trait Page: Send + Sync {
	fn id(&self) -> &str;

	/// Navigates the main frame and waits for its load event.
	async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

	/// URL of the main frame.
	async fn url(&self) -> Result<String>;

	/// Every frame, in tree order, main frame first.
	async fn frames(&self) -> Result<Vec<FrameInfo>>;

	async fn count(&self, frame: &str, selector: &str) -> Result<usize>;

	async fn click(&self, frame: &str, selector: &str) -> Result<()>;

	async fn fill(&self, frame: &str, selector: &str, value: &str) -> Result<()>;

	async fn options(&self, frame: &str, selector: &str) -> Result<Vec<SelectOption>>;

	/// Selects the first option matching `choice`; `None` when nothing matches.
	async fn select(&self, frame: &str, selector: &str, choice: &OptionChoice) -> Result<Option<SelectOption>>;

	/// Value of a form field, else visible text; `None` when nothing matches.
	async fn read(&self, frame: &str, selector: &str) -> Result<Option<String>>;

	/// `attribute` of every match; text content when `attribute` is empty.
	async fn attribute_values(&self, frame: &str, selector: &str, attribute: &str) -> Result<Vec<String>>;

	/// Resolves `true` on the next navigation or load in any frame, `false` on timeout.
	async fn wait_for_change(&self, timeout: Duration) -> Result<bool>;

	async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
	pub id: String,
	pub url: String,
	pub name: Option<String>,
	pub is_main: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
	pub value: String,
	pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionChoice {
	Value(String),
	/// Case-insensitive substring of the visible option text.
	TextContains(String),
}

impl OptionChoice {
	pub fn matches(&self, option: &SelectOption) -> bool {
		match self {
			OptionChoice::Value(value) => option.value == *value,
			OptionChoice::TextContains(text) => option.text.to_lowercase().contains(&text.to_lowercase()),
		}
	}
}

impl std::fmt::Display for OptionChoice {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OptionChoice::Value(value) => write!(f, "value `{value}`"),
			OptionChoice::TextContains(text) => write!(f, "text containing `{text}`"),
		}
	}
}
