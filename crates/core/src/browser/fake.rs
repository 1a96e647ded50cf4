//! In-memory reservation site behind the [`Browser`] traits.
//!
//! Screens follow the real flow (login, dashboard, claim surface, calendar,
//! request form, result) and answer exactly the selectors of the
//! [`SiteProfile`] they were built with. Used by tests and `--fake` rehearsals.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use slotclaim_protocol::{ClaimReply, WrappedPayload};
use tokio::sync::Notify;

use super::{Browser, BrowserContext, FrameInfo, OptionChoice, Page, SelectOption};
use crate::classifier::classify;
use crate::error::{ClaimError, Result};
use crate::frame::FramePredicate;
use crate::site::SiteProfile;

const MAIN: &str = "main";
const SURFACE: &str = "surface";
const FORM: &str = "form";
const DEFAULT_RESPONSE: &str = "Su reservación se ha realizado con éxito y ya se encuentra aprobada.";

/// What a resource does when selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
	Error,
	Panic,
}

/// One submit the site received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
	pub context: String,
	pub account: String,
	pub resource: String,
	pub date: NaiveDate,
	pub slot_id: String,
}

#[derive(Debug, Clone)]
struct Resource {
	/// (option value, visible text)
	slots: Vec<(String, String)>,
	response: String,
}

#[derive(Default)]
struct Config {
	accounts: HashMap<String, String>,
	open_dates: BTreeSet<NaiveDate>,
	/// Date → remaining checks before it opens.
	pending: HashMap<NaiveDate, u32>,
	resources: BTreeMap<String, Resource>,
	faults: HashMap<String, Fault>,
	expire_on_submit: HashSet<String>,
	embed_marker: bool,
	result_delay: Duration,
	latency: Duration,
}

#[derive(Default)]
struct Log {
	submissions: Vec<Submission>,
	logins: u32,
	contexts: u32,
	contexts_closed: u32,
}

struct SiteState {
	profile: SiteProfile,
	config: Mutex<Config>,
	log: Mutex<Log>,
	next_id: AtomicU64,
}

impl SiteState {
	fn next_id(&self, prefix: &str) -> String {
		format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.profile.base_url.trim_end_matches('/'), path)
	}
}

/// Configurable fake site. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FakeSite {
	state: Arc<SiteState>,
}

impl FakeSite {
	pub fn new(profile: SiteProfile) -> Self {
		Self {
			state: Arc::new(SiteState {
				profile,
				config: Mutex::new(Config {
					embed_marker: true,
					..Config::default()
				}),
				log: Mutex::new(Log::default()),
				next_id: AtomicU64::new(0),
			}),
		}
	}

	pub fn with_account(self, username: &str, password: &str) -> Self {
		self.state.config.lock().accounts.insert(username.to_string(), password.to_string());
		self
	}

	pub fn with_open_date(self, date: NaiveDate) -> Self {
		self.state.config.lock().open_dates.insert(date);
		self
	}

	/// `date` becomes claimable after its affordance has been looked for `checks` times.
	pub fn with_date_opening_after(self, date: NaiveDate, checks: u32) -> Self {
		if checks == 0 {
			return self.with_open_date(date);
		}
		self.state.config.lock().pending.insert(date, checks);
		self
	}

	/// Adds a resource with its `(slot id, visible text)` options. It answers the default success text.
	pub fn with_resource(self, name: &str, slots: &[(&str, &str)]) -> Self {
		self.state.config.lock().resources.insert(
			name.to_string(),
			Resource {
				slots: slots.iter().map(|(id, text)| (id.to_string(), text.to_string())).collect(),
				response: DEFAULT_RESPONSE.to_string(),
			},
		);
		self
	}

	/// Text the site answers after a submit for `resource`.
	pub fn with_response(self, resource: &str, text: &str) -> Self {
		if let Some(r) = self.state.config.lock().resources.get_mut(resource) {
			r.response = text.to_string();
		}
		self
	}

	pub fn with_fault(self, resource: &str, fault: Fault) -> Self {
		self.state.config.lock().faults.insert(resource.to_string(), fault);
		self
	}

	/// Submitting `resource` drops the session and redirects to the login page.
	pub fn expiring_on_submit(self, resource: &str) -> Self {
		self.state.config.lock().expire_on_submit.insert(resource.to_string());
		self
	}

	/// Whether the result page embeds the `{"d": ...}` marker or only visible text.
	pub fn with_marker(self, embed: bool) -> Self {
		self.state.config.lock().embed_marker = embed;
		self
	}

	pub fn with_result_delay(self, delay: Duration) -> Self {
		self.state.config.lock().result_delay = delay;
		self
	}

	/// Delay added to every page operation.
	pub fn with_latency(self, latency: Duration) -> Self {
		self.state.config.lock().latency = latency;
		self
	}

	pub fn browser(&self) -> FakeBrowser {
		FakeBrowser {
			state: Arc::clone(&self.state),
		}
	}

	pub fn submissions(&self) -> Vec<Submission> {
		self.state.log.lock().submissions.clone()
	}

	pub fn login_count(&self) -> u32 {
		self.state.log.lock().logins
	}

	pub fn contexts_created(&self) -> u32 {
		self.state.log.lock().contexts
	}

	pub fn contexts_closed(&self) -> u32 {
		self.state.log.lock().contexts_closed
	}
}

pub struct FakeBrowser {
	state: Arc<SiteState>,
}

#[async_trait]
impl Browser for FakeBrowser {
	async fn new_context(&self) -> Result<Arc<dyn BrowserContext>> {
		self.state.log.lock().contexts += 1;
		Ok(Arc::new(FakeContext {
			shared: Arc::new(ContextState {
				id: self.state.next_id("ctx"),
				account: Mutex::new(None),
				closed: AtomicBool::new(false),
			}),
			state: Arc::clone(&self.state),
		}))
	}

	async fn close(&self) -> Result<()> {
		Ok(())
	}
}

struct ContextState {
	id: String,
	/// Authenticated account; the fake's cookie jar.
	account: Mutex<Option<String>>,
	closed: AtomicBool,
}

pub struct FakeContext {
	shared: Arc<ContextState>,
	state: Arc<SiteState>,
}

#[async_trait]
impl BrowserContext for FakeContext {
	fn id(&self) -> &str {
		&self.shared.id
	}

	async fn new_page(&self) -> Result<Arc<dyn Page>> {
		if self.shared.closed.load(Ordering::SeqCst) {
			return Err(ClaimError::Browser(format!("context {} is closed", self.shared.id)));
		}
		Ok(Arc::new(FakePage {
			inner: Arc::new(PageInner {
				id: self.state.next_id("page"),
				site: Arc::clone(&self.state),
				context: Arc::clone(&self.shared),
				view: Mutex::new(View::default()),
				changed: Notify::new(),
				closed: AtomicBool::new(false),
			}),
		}))
	}

	async fn close(&self) -> Result<()> {
		if !self.shared.closed.swap(true, Ordering::SeqCst) {
			self.state.log.lock().contexts_closed += 1;
		}
		*self.shared.account.lock() = None;
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
	#[default]
	Blank,
	Login,
	Dashboard,
	Surface,
	Calendar,
	DateSelected,
	Form,
	Submitting,
	Result,
}

#[derive(Default)]
struct View {
	screen: Screen,
	login_error: bool,
	fields: HashMap<String, String>,
	resource: Option<String>,
	date: Option<NaiveDate>,
	slot: Option<String>,
	response: Option<String>,
}

struct PageInner {
	id: String,
	site: Arc<SiteState>,
	context: Arc<ContextState>,
	view: Mutex<View>,
	changed: Notify,
	closed: AtomicBool,
}

pub struct FakePage {
	inner: Arc<PageInner>,
}

/// What a selector resolves to on the current screen.
enum Element {
	Field(String),
	Button(Action),
	ResourceSelect,
	SlotSelect,
	Present,
	Affordances(Vec<NaiveDate>),
	Marker,
	Text,
	LoginError,
}

#[derive(Clone, Copy)]
enum Action {
	Login,
	Continue,
	Date(NaiveDate),
	Request,
	Submit,
}

impl PageInner {
	fn profile(&self) -> &SiteProfile {
		&self.site.profile
	}

	fn surface_frame(&self) -> &'static str {
		if self.profile().surface.frame == FramePredicate::Main { MAIN } else { SURFACE }
	}

	fn form_frame(&self) -> &'static str {
		if self.profile().form.frame == FramePredicate::Main { MAIN } else { FORM }
	}

	fn authenticated(&self) -> bool {
		self.context.account.lock().is_some()
	}

	fn transition(&self, view: &mut View, screen: Screen) {
		view.screen = screen;
		self.changed.notify_waiters();
	}

	fn main_url(&self, screen: Screen) -> String {
		let profile = self.profile();
		match screen {
			Screen::Blank => "about:blank".to_string(),
			Screen::Login => profile.login_url().unwrap_or_else(|_| self.site.url(&profile.login_path)),
			Screen::Dashboard => self.site.url("Inicio.aspx"),
			Screen::Result => self.site.url(&format!("{}.aspx", profile.result.url_patterns.first().map(String::as_str).unwrap_or("Resultado"))),
			_ => profile.claim_url().unwrap_or_else(|_| self.site.url(&profile.claim_path)),
		}
	}

	fn frames(&self, screen: Screen) -> Vec<FrameInfo> {
		let mut frames = vec![FrameInfo {
			id: MAIN.to_string(),
			url: self.main_url(screen),
			name: None,
			is_main: true,
		}];
		let surface = matches!(screen, Screen::Surface | Screen::Calendar | Screen::DateSelected | Screen::Form | Screen::Submitting);
		if surface && self.surface_frame() != MAIN {
			frames.push(child_frame(SURFACE, &self.profile().surface.frame, &self.site, "Calendario"));
		}
		if matches!(screen, Screen::Form | Screen::Submitting) && self.form_frame() != MAIN {
			frames.push(child_frame(FORM, &self.profile().form.frame, &self.site, "Solicitud"));
		}
		frames
	}

	fn element(&self, view: &View, config: &Config, frame: &str, selector: &str) -> Option<Element> {
		let p = self.profile();
		let in_main = frame == MAIN;
		let in_surface = frame == self.surface_frame();
		let in_form = frame == self.form_frame();
		match view.screen {
			Screen::Login if in_main => {
				if selector == p.login.username || selector == p.login.password {
					Some(Element::Field(selector.to_string()))
				} else if selector == p.login.submit {
					Some(Element::Button(Action::Login))
				} else if selector == p.login.error && view.login_error {
					Some(Element::LoginError)
				} else {
					None
				}
			}
			Screen::Dashboard if in_main && selector == p.login.dashboard_marker => Some(Element::Present),
			Screen::Surface | Screen::Calendar | Screen::DateSelected | Screen::Form if in_surface => {
				let calendar = view.screen != Screen::Surface;
				if selector == p.surface.resource_select {
					Some(Element::ResourceSelect)
				} else if selector == p.surface.resource_continue {
					Some(Element::Button(Action::Continue))
				} else if calendar && selector == p.surface.calendar_marker {
					Some(Element::Present)
				} else if calendar && selector == p.surface.available_affordances {
					Some(Element::Affordances(config.open_dates.iter().copied().collect()))
				} else if view.screen == Screen::DateSelected && selector == p.surface.request_button {
					Some(Element::Button(Action::Request))
				} else if calendar {
					config
						.open_dates
						.iter()
						.find(|d| p.date_selector(**d) == selector)
						.map(|d| Element::Button(Action::Date(*d)))
				} else {
					None
				}
			}
			Screen::Form if in_form => {
				if selector == p.form.slot_select {
					Some(Element::SlotSelect)
				} else if selector == p.form.submit {
					Some(Element::Button(Action::Submit))
				} else {
					None
				}
			}
			Screen::Result if in_main => {
				if selector == p.result.marker && config.embed_marker {
					Some(Element::Marker)
				} else if selector == p.result.text {
					Some(Element::Text)
				} else {
					None
				}
			}
			_ => None,
		}
	}

	/// Counts one look at a pending date's affordance.
	fn observe_pending(&self, config: &mut Config, selector: &str) {
		let profile = self.profile();
		let Some(date) = config.pending.keys().copied().find(|d| profile.date_selector(*d) == selector) else {
			return;
		};
		let opened = match config.pending.get_mut(&date) {
			Some(remaining) => {
				*remaining = remaining.saturating_sub(1);
				*remaining == 0
			}
			None => false,
		};
		if opened {
			config.pending.remove(&date);
			config.open_dates.insert(date);
		}
	}

	fn slot_options(&self, view: &View, config: &Config) -> Vec<SelectOption> {
		view.resource
			.as_ref()
			.and_then(|r| config.resources.get(r))
			.map(|r| r.slots.iter().map(|(value, text)| SelectOption { value: value.clone(), text: text.clone() }).collect())
			.unwrap_or_default()
	}

	fn submit(self: &Arc<Self>, view: &mut View, config: &Config) {
		let resource = view.resource.clone().unwrap_or_default();
		let account = self.context.account.lock().clone().unwrap_or_default();
		if let (Some(date), Some(slot_id)) = (view.date, view.slot.clone()) {
			self.site.log.lock().submissions.push(Submission {
				context: self.context.id.clone(),
				account,
				resource: resource.clone(),
				date,
				slot_id,
			});
		}

		if config.expire_on_submit.contains(&resource) {
			*self.context.account.lock() = None;
			self.transition(view, Screen::Login);
			return;
		}

		view.response = Some(config.resources.get(&resource).map(|r| r.response.clone()).unwrap_or_default());
		if config.result_delay.is_zero() {
			self.transition(view, Screen::Result);
			return;
		}
		self.transition(view, Screen::Submitting);
		let page = Arc::clone(self);
		let delay = config.result_delay;
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let mut view = page.view.lock();
			if view.screen == Screen::Submitting {
				page.transition(&mut view, Screen::Result);
			}
		});
	}
}

fn child_frame(id: &str, predicate: &FramePredicate, site: &SiteState, fallback: &str) -> FrameInfo {
	let (url, name) = match predicate {
		FramePredicate::UrlContains(part) => (site.url(&format!("Reservaciones/{part}.aspx")), None),
		FramePredicate::Name(name) => (site.url(&format!("Reservaciones/{fallback}.aspx")), Some(name.clone())),
		_ => (site.url(&format!("Reservaciones/{fallback}.aspx")), None),
	};
	FrameInfo {
		id: id.to_string(),
		url,
		name,
		is_main: false,
	}
}

impl FakePage {
	async fn enter(&self) -> Result<()> {
		let latency = self.inner.site.config.lock().latency;
		if !latency.is_zero() {
			tokio::time::sleep(latency).await;
		}
		if self.inner.closed.load(Ordering::SeqCst) || self.inner.context.closed.load(Ordering::SeqCst) {
			return Err(ClaimError::Browser(format!("page {} is closed", self.inner.id)));
		}
		Ok(())
	}
}

#[async_trait]
impl Page for FakePage {
	fn id(&self) -> &str {
		&self.inner.id
	}

	async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
		self.enter().await?;
		let profile = self.inner.profile();
		let screen = if profile.login_url().is_ok_and(|u| u == url) {
			Screen::Login
		} else if profile.claim_url().is_ok_and(|u| u == url) {
			// Unauthenticated visits redirect to the login page.
			if self.inner.authenticated() { Screen::Surface } else { Screen::Login }
		} else if url == "about:blank" {
			Screen::Blank
		} else {
			return Err(ClaimError::Navigation {
				url: url.to_string(),
				reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
			});
		};
		let mut view = self.inner.view.lock();
		*view = View::default();
		self.inner.transition(&mut view, screen);
		Ok(())
	}

	async fn url(&self) -> Result<String> {
		self.enter().await?;
		let screen = self.inner.view.lock().screen;
		Ok(self.inner.main_url(screen))
	}

	async fn frames(&self) -> Result<Vec<FrameInfo>> {
		self.enter().await?;
		let screen = self.inner.view.lock().screen;
		Ok(self.inner.frames(screen))
	}

	async fn count(&self, frame: &str, selector: &str) -> Result<usize> {
		self.enter().await?;
		let view = self.inner.view.lock();
		let mut config = self.inner.site.config.lock();
		if matches!(view.screen, Screen::Calendar | Screen::DateSelected) && frame == self.inner.surface_frame() {
			self.inner.observe_pending(&mut config, selector);
		}
		Ok(match self.inner.element(&view, &config, frame, selector) {
			Some(Element::Affordances(dates)) => dates.len(),
			Some(_) => 1,
			None => 0,
		})
	}

	async fn click(&self, frame: &str, selector: &str) -> Result<()> {
		self.enter().await?;
		let mut view = self.inner.view.lock();
		let config = self.inner.site.config.lock();
		let Some(Element::Button(action)) = self.inner.element(&view, &config, frame, selector) else {
			return Err(ClaimError::ElementNotFound { selector: selector.to_string() });
		};
		match action {
			Action::Login => {
				let profile = self.inner.profile();
				let username = view.fields.get(&profile.login.username).cloned().unwrap_or_default();
				let password = view.fields.get(&profile.login.password).cloned().unwrap_or_default();
				if config.accounts.get(&username).is_some_and(|p| *p == password) {
					*self.inner.context.account.lock() = Some(username);
					self.inner.site.log.lock().logins += 1;
					view.login_error = false;
					self.inner.transition(&mut view, Screen::Dashboard);
				} else {
					view.login_error = true;
					self.inner.transition(&mut view, Screen::Login);
				}
			}
			Action::Continue => {
				if view.resource.is_some() {
					self.inner.transition(&mut view, Screen::Calendar);
				}
			}
			Action::Date(date) => {
				view.date = Some(date);
				self.inner.transition(&mut view, Screen::DateSelected);
			}
			Action::Request => self.inner.transition(&mut view, Screen::Form),
			Action::Submit => self.inner.submit(&mut view, &config),
		}
		Ok(())
	}

	async fn fill(&self, frame: &str, selector: &str, value: &str) -> Result<()> {
		self.enter().await?;
		let mut view = self.inner.view.lock();
		let config = self.inner.site.config.lock();
		let Some(Element::Field(key)) = self.inner.element(&view, &config, frame, selector) else {
			return Err(ClaimError::ElementNotFound { selector: selector.to_string() });
		};
		view.fields.insert(key, value.to_string());
		Ok(())
	}

	async fn options(&self, frame: &str, selector: &str) -> Result<Vec<SelectOption>> {
		self.enter().await?;
		let view = self.inner.view.lock();
		let config = self.inner.site.config.lock();
		Ok(match self.inner.element(&view, &config, frame, selector) {
			Some(Element::ResourceSelect) => config
				.resources
				.keys()
				.map(|r| SelectOption {
					value: r.clone(),
					text: r.clone(),
				})
				.collect(),
			Some(Element::SlotSelect) => self.inner.slot_options(&view, &config),
			_ => Vec::new(),
		})
	}

	async fn select(&self, frame: &str, selector: &str, choice: &OptionChoice) -> Result<Option<SelectOption>> {
		self.enter().await?;
		let fault = {
			let mut view = self.inner.view.lock();
			let config = self.inner.site.config.lock();
			match self.inner.element(&view, &config, frame, selector) {
				Some(Element::ResourceSelect) => {
					let Some(resource) = config.resources.keys().find(|r| choice.matches(&SelectOption { value: (*r).clone(), text: (*r).clone() })) else {
						return Ok(None);
					};
					view.resource = Some(resource.clone());
					let fault = config.faults.get(resource).copied();
					if fault.is_none() {
						return Ok(Some(SelectOption {
							value: resource.clone(),
							text: resource.clone(),
						}));
					}
					(resource.clone(), fault)
				}
				Some(Element::SlotSelect) => {
					let selected = self.inner.slot_options(&view, &config).into_iter().find(|o| choice.matches(o));
					if let Some(option) = &selected {
						view.slot = Some(option.value.clone());
					}
					return Ok(selected);
				}
				_ => return Err(ClaimError::ElementNotFound { selector: selector.to_string() }),
			}
		};

		match fault {
			(resource, Some(Fault::Panic)) => panic!("fake site fault while selecting {resource}"),
			(resource, _) => Err(ClaimError::Browser(format!("fake site fault while selecting {resource}"))),
		}
	}

	async fn read(&self, frame: &str, selector: &str) -> Result<Option<String>> {
		self.enter().await?;
		let view = self.inner.view.lock();
		let config = self.inner.site.config.lock();
		Ok(match self.inner.element(&view, &config, frame, selector) {
			Some(Element::Field(key)) => Some(view.fields.get(&key).cloned().unwrap_or_default()),
			Some(Element::LoginError) => Some("Usuario o contraseña incorrectos.".to_string()),
			Some(Element::Text) => view.response.clone(),
			Some(Element::Marker) => view.response.as_deref().map(|text| {
				let payload = WrappedPayload {
					reply: ClaimReply {
						success: i64::from(classify(text).is_success()),
						message: text.to_string(),
					},
				};
				serde_json::to_string(&payload).unwrap_or_default()
			}),
			Some(_) => Some(String::new()),
			None => None,
		})
	}

	async fn attribute_values(&self, frame: &str, selector: &str, _attribute: &str) -> Result<Vec<String>> {
		self.enter().await?;
		let view = self.inner.view.lock();
		let config = self.inner.site.config.lock();
		Ok(match self.inner.element(&view, &config, frame, selector) {
			Some(Element::Affordances(dates)) => dates.into_iter().map(|d| self.inner.profile().format_date(d)).collect(),
			_ => Vec::new(),
		})
	}

	async fn wait_for_change(&self, timeout: Duration) -> Result<bool> {
		self.enter().await?;
		Ok(tokio::time::timeout(timeout, self.inner.changed.notified()).await.is_ok())
	}

	async fn close(&self) -> Result<()> {
		self.inner.closed.store(true, Ordering::SeqCst);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn date() -> NaiveDate {
		NaiveDate::from_ymd_opt(2026, 10, 25).unwrap()
	}

	#[tokio::test]
	async fn unauthenticated_claim_visit_lands_on_login() {
		let site = FakeSite::new(SiteProfile::default());
		let context = site.browser().new_context().await.unwrap();
		let page = context.new_page().await.unwrap();
		page.goto(&SiteProfile::default().claim_url().unwrap(), Duration::from_secs(1)).await.unwrap();
		assert!(SiteProfile::default().is_login_url(&page.url().await.unwrap()));
	}

	#[tokio::test]
	async fn pages_of_one_context_share_login() {
		let profile = SiteProfile::default();
		let site = FakeSite::new(profile.clone()).with_account("ana", "pw");
		let context = site.browser().new_context().await.unwrap();
		let first = context.new_page().await.unwrap();
		first.goto(&profile.login_url().unwrap(), Duration::from_secs(1)).await.unwrap();
		first.fill(MAIN, &profile.login.username, "ana").await.unwrap();
		first.fill(MAIN, &profile.login.password, "pw").await.unwrap();
		first.click(MAIN, &profile.login.submit).await.unwrap();
		assert_eq!(first.count(MAIN, &profile.login.dashboard_marker).await.unwrap(), 1);

		let second = context.new_page().await.unwrap();
		second.goto(&profile.claim_url().unwrap(), Duration::from_secs(1)).await.unwrap();
		assert_eq!(second.frames().await.unwrap().len(), 2);
		assert_eq!(site.login_count(), 1);
	}

	#[tokio::test]
	async fn pending_date_opens_after_checks() {
		let profile = SiteProfile::default();
		let site = FakeSite::new(profile.clone()).with_date_opening_after(date(), 2);
		let state = &site.state;
		let page = PageInner {
			id: "p".into(),
			site: Arc::clone(state),
			context: Arc::new(ContextState {
				id: "c".into(),
				account: Mutex::new(None),
				closed: AtomicBool::new(false),
			}),
			view: Mutex::new(View::default()),
			changed: Notify::new(),
			closed: AtomicBool::new(false),
		};
		let selector = profile.date_selector(date());
		let mut config = state.config.lock();
		page.observe_pending(&mut config, &selector);
		assert!(!config.open_dates.contains(&date()));
		page.observe_pending(&mut config, &selector);
		assert!(config.open_dates.contains(&date()));
	}
}
