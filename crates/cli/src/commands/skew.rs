use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use slotclaim::{ClockService, Timing};

use crate::config::ConfigFile;
use crate::output::OutputFormat;

pub async fn execute(config: &Path, url: Option<&str>, format: OutputFormat) -> Result<()> {
	let file = ConfigFile::load_or_default(config)?;
	let clock = ClockService::new(file.unlock.to_schedule()?);
	let url = url.map(str::to_string).or(file.skew_url.clone()).unwrap_or_else(|| file.site.base_url.clone());
	let timeout = Timing::from(&file.timing).skew_timeout.max(Duration::from_millis(1));

	let skew = clock.remote_skew(&url, timeout).await;
	clock.set_skew(skew);
	let unlock = clock.next_unlock();
	let target = clock.schedule().target_date(unlock);

	match format {
		OutputFormat::Json => println!(
			"{}",
			json!({
				"url": url,
				"skewMs": skew.num_milliseconds(),
				"nextUnlock": unlock.to_rfc3339(),
				"msUntilUnlock": clock.ms_until_unlock(),
				"targetDate": target,
			})
		),
		OutputFormat::Text => {
			println!("skew        {:+}ms ({url})", skew.num_milliseconds());
			println!("next unlock {} (in {}s), opens {target}", unlock.to_rfc3339(), clock.ms_until_unlock() / 1000);
		}
	}
	Ok(())
}
