use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use slotclaim::browser::fake::FakeSite;
use slotclaim::{Browser, CdpBrowser, Credentials, Orchestrator, RunConfig};
use slotclaim_runtime::LaunchOptions;
use tracing::{debug, info, warn};

use crate::cli::RunArgs;
use crate::config::{BrowserEntry, ConfigFile, credentials};
use crate::output::{OutputFormat, StdoutSink};

pub async fn execute(config_path: &Path, args: RunArgs, format: OutputFormat) -> Result<()> {
	let file = ConfigFile::load(config_path)?;
	let browser_entry = file.browser.clone();
	let config = file.into_run_config(&args)?;
	let credentials = credentials(args.fake)?;

	if config.active_resources().is_empty() {
		info!(target = "slotclaim.cli", "every resource is skipped; nothing to do");
		return Ok(());
	}

	let browser: Arc<dyn Browser> = if args.fake {
		info!(target = "slotclaim.cli", "using the simulated site");
		Arc::new(rehearsal_site(&config, &credentials).browser())
	} else {
		Arc::new(open_browser(&args, &browser_entry).await?)
	};

	let orchestrator = Orchestrator::new(config, Arc::clone(&browser), credentials, Arc::new(StdoutSink::new(format)))?;
	let outcome = orchestrator.run().await;
	if let Err(e) = browser.close().await {
		debug!(target = "slotclaim.cli", error = %e, "browser close failed");
	}

	match outcome? {
		Some(report) => {
			if let Some(mode) = report.recommended_mode {
				warn!(target = "slotclaim.cli", recommended = %mode, "a session was invalidated; rerun with --mode {mode}");
			}
			Ok(())
		}
		None => Ok(()),
	}
}

async fn open_browser(args: &RunArgs, entry: &BrowserEntry) -> Result<CdpBrowser> {
	if let Some(endpoint) = args.cdp_endpoint.as_ref().or(entry.cdp_endpoint.as_ref()) {
		info!(target = "slotclaim.cli", %endpoint, "connecting to running browser");
		return CdpBrowser::connect(endpoint).await.with_context(|| format!("failed to connect to {endpoint}"));
	}
	let options = LaunchOptions {
		executable: args.browser_path.clone().or_else(|| entry.executable.clone()),
		headless: entry.headless && !args.headful,
		..LaunchOptions::default()
	};
	CdpBrowser::launch(&options).await.context("failed to launch browser")
}

/// A simulated site where every configured slot exists and the dates this run can target are open.
fn rehearsal_site(config: &RunConfig, credentials: &Credentials) -> FakeSite {
	let now = Utc::now();
	let mut dates = BTreeSet::from([config.unlock.latest_open_date(now), config.unlock.target_date(config.unlock.next_unlock(now))]);
	dates.extend(config.target_date);

	let mut site = FakeSite::new(config.site.clone()).with_account(&credentials.username, credentials.password());
	for &date in &dates {
		site = site.with_open_date(date);
	}
	for target in config.active_resources() {
		let slots: BTreeSet<(String, String)> = dates
			.iter()
			.filter_map(|date| config.schedule.resolve(&target.id, *date, &target.window).ok())
			.map(|slot| (slot.to_string(), target.window.clone()))
			.collect();
		let slots: Vec<(&str, &str)> = slots.iter().map(|(id, text)| (id.as_str(), text.as_str())).collect();
		site = site.with_resource(&target.id, &slots);
	}
	site
}
