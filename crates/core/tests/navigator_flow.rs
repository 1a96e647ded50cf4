use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use slotclaim::browser::fake::FakeSite;
use slotclaim::{
	BrowserContext, ClaimError, ClaimStatus, Classifier, Credentials, NavState, Navigator, ResultSource, SiteProfile, SlotMatch, Submit, Timeouts,
};

fn date() -> NaiveDate {
	NaiveDate::from_ymd_opt(2026, 10, 25).unwrap()
}

fn timeouts() -> Timeouts {
	Timeouts {
		navigation: Duration::from_millis(800),
		selector: Duration::from_millis(400),
	}
}

async fn navigator(site: &FakeSite) -> Navigator {
	let browser = site.browser();
	let context = slotclaim::Browser::new_context(&browser).await.unwrap();
	let page = context.new_page().await.unwrap();
	let mut nav = Navigator::new(page, Arc::new(SiteProfile::default()), Arc::new(Classifier::default()), timeouts());
	nav.authenticate(&Credentials::new("ana", "pw")).await.unwrap();
	nav
}

/// Logged in, resource chosen, calendar showing.
async fn at_calendar(site: &FakeSite) -> Navigator {
	let mut nav = navigator(site).await;
	nav.open_claim_surface().await.unwrap();
	nav.select_resource_and_continue("courtA").await.unwrap();
	assert_eq!(nav.state(), NavState::CalendarLoaded);
	nav
}

fn site() -> FakeSite {
	FakeSite::new(SiteProfile::default())
		.with_account("ana", "pw")
		.with_resource("courtA", &[("4411", "06:00 - 07:00"), ("4412", "07:00 - 08:00")])
}

#[tokio::test]
async fn wrong_password_is_an_auth_error() {
	let site = site();
	let context = slotclaim::Browser::new_context(&site.browser()).await.unwrap();
	let page = context.new_page().await.unwrap();
	let mut nav = Navigator::new(page, Arc::new(SiteProfile::default()), Arc::new(Classifier::default()), timeouts());

	let err = nav.authenticate(&Credentials::new("ana", "nope")).await.unwrap_err();
	assert!(matches!(err, ClaimError::Auth(ref m) if m.contains("incorrectos")), "{err}");
	assert_eq!(nav.state(), NavState::Failure);
	assert_eq!(site.login_count(), 0);
}

#[tokio::test]
async fn poll_returns_once_the_date_opens() {
	let site = site().with_date_opening_after(date(), 4);
	let mut nav = at_calendar(&site).await;

	let mut ticks = 0;
	let elapsed = nav
		.poll_for_unlock(date(), Duration::from_millis(10), Duration::from_secs(2), |_| ticks += 1)
		.await
		.unwrap();
	assert!(elapsed < Duration::from_secs(2));
	assert!(ticks >= 4, "opened after {ticks} polls");
	assert_eq!(nav.state(), NavState::DateUnlockPending);
}

#[tokio::test]
async fn poll_timeout_reports_attempts_and_open_dates() {
	let open = date().pred_opt().unwrap();
	let site = site().with_open_date(open);
	let mut nav = at_calendar(&site).await;

	let err = nav.poll_for_unlock(date(), Duration::from_millis(20), Duration::from_millis(150), |_| {}).await.unwrap_err();
	let ClaimError::UnlockTimeout(timeout) = err else {
		panic!("expected unlock timeout, got {err}");
	};
	assert!(timeout.attempts > 0);
	assert!(timeout.elapsed_ms >= 100);
	assert_eq!(timeout.available, vec!["2026-10-24".to_string()]);
	assert_eq!(timeout.selector, "a.dia-disponible[data-fecha='2026-10-25']");
	assert_eq!(nav.state(), NavState::Failure);
}

#[tokio::test]
async fn select_date_requires_a_successful_poll() {
	let site = site().with_open_date(date());
	let mut nav = at_calendar(&site).await;

	let err = nav.select_date(date()).await.unwrap_err();
	assert!(matches!(err, ClaimError::InvalidState { step: "select_date", .. }), "{err}");

	nav.poll_for_unlock(date(), Duration::from_millis(10), Duration::from_secs(1), |_| {}).await.unwrap();
	let other = date().succ_opt().unwrap();
	assert!(matches!(nav.select_date(other).await, Err(ClaimError::InvalidState { .. })));
	nav.select_date(date()).await.unwrap();
	assert_eq!(nav.state(), NavState::DateSelected);
}

#[tokio::test]
async fn steps_out_of_order_are_rejected() {
	let site = site().with_open_date(date());
	let mut nav = navigator(&site).await;

	assert!(matches!(nav.open_form().await, Err(ClaimError::InvalidState { step: "open_form", .. })));
	assert!(matches!(nav.submit(date(), true).await, Err(ClaimError::InvalidState { step: "submit", .. })));
	assert!(matches!(nav.await_result(Duration::from_millis(50)).await, Err(ClaimError::InvalidState { .. })));
	assert_eq!(nav.state(), NavState::Dashboard);
}

async fn at_form(site: &FakeSite) -> Navigator {
	let mut nav = at_calendar(site).await;
	nav.poll_for_unlock(date(), Duration::from_millis(10), Duration::from_secs(1), |_| {}).await.unwrap();
	nav.select_date(date()).await.unwrap();
	nav.open_form().await.unwrap();
	assert_eq!(nav.state(), NavState::FormOpen);
	nav
}

#[tokio::test]
async fn missing_slot_id_falls_back_to_start_time() {
	let site = site().with_open_date(date());
	let mut nav = at_form(&site).await;

	let selection = nav.select_slot("9999", "07:00 - 08").await.unwrap();
	assert_eq!(selection.matched_by, SlotMatch::StartTime);
	assert_eq!(selection.option.value, "4412");

	let err = nav.select_slot("9999", "21:00").await.unwrap_err();
	assert!(err.to_string().contains("4411=06:00 - 07:00"), "{err}");
}

#[tokio::test]
async fn dry_run_submit_sends_nothing() {
	let site = site().with_open_date(date());
	let mut nav = at_form(&site).await;
	nav.select_slot("4411", "06:00").await.unwrap();

	let Submit::Preview(params) = nav.submit(date(), true).await.unwrap() else {
		panic!("dry run must not send");
	};
	assert_eq!(params.resource_id, "courtA");
	assert_eq!(params.date, "2026-10-25");
	assert_eq!(params.account, "ana");
	assert!(site.submissions().is_empty());
}

#[tokio::test]
async fn result_is_read_from_the_marker_first() {
	let site = site().with_open_date(date()).with_result_delay(Duration::from_millis(60));
	let mut nav = at_form(&site).await;
	nav.select_slot("4411", "06:00").await.unwrap();
	assert!(matches!(nav.submit(date(), false).await.unwrap(), Submit::Sent(_)));

	let capture = nav.await_result(Duration::from_secs(2)).await.unwrap();
	assert_eq!(capture.source, ResultSource::Marker);
	assert_eq!(capture.outcome.status(), ClaimStatus::Success);
	assert_eq!(nav.state(), NavState::Success);
	assert_eq!(site.submissions()[0].slot_id, "4411");
}

#[tokio::test]
async fn result_falls_back_to_visible_text() {
	let site = site()
		.with_open_date(date())
		.with_marker(false)
		.with_response("courtA", "Ya cuenta con el máximo de reservaciones permitidas.");
	let mut nav = at_form(&site).await;
	nav.select_slot("4411", "06:00").await.unwrap();
	nav.submit(date(), false).await.unwrap();

	let capture = nav.await_result(Duration::from_secs(1)).await.unwrap();
	assert_eq!(capture.source, ResultSource::Text);
	assert_eq!(capture.outcome.status(), ClaimStatus::LimitExceeded);
	assert_eq!(nav.state(), NavState::Failure);
}

#[tokio::test]
async fn login_redirect_after_submit_invalidates_the_session() {
	let site = site().with_open_date(date()).expiring_on_submit("courtA");
	let mut nav = at_form(&site).await;
	nav.select_slot("4411", "06:00").await.unwrap();
	nav.submit(date(), false).await.unwrap();

	let err = nav.await_result(Duration::from_secs(1)).await.unwrap_err();
	assert!(matches!(err, ClaimError::SessionInvalidated(_)), "{err}");
}

#[tokio::test]
async fn expired_session_is_caught_on_the_claim_page() {
	let site = site().with_open_date(date());
	let context = slotclaim::Browser::new_context(&site.browser()).await.unwrap();
	let page = context.new_page().await.unwrap();
	let mut nav = Navigator::authenticated(page, Arc::new(SiteProfile::default()), Arc::new(Classifier::default()), timeouts(), "ana");

	let err = nav.open_claim_surface().await.unwrap_err();
	assert!(matches!(err, ClaimError::SessionInvalidated(_)), "{err}");
}
