use std::path::Path;

use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use serde_json::json;

use crate::config::ConfigFile;
use crate::output::OutputFormat;

pub fn execute(config: &Path, resource: &str, date: NaiveDate, window: &str, format: OutputFormat) -> Result<()> {
	let table = ConfigFile::load(config)?.schedule_table()?;
	let slot = table.resolve(resource, date, window)?;

	match format {
		OutputFormat::Json => println!(
			"{}",
			json!({
				"resource": resource,
				"date": date,
				"weekday": date.weekday().to_string(),
				"window": window,
				"slotId": slot,
			})
		),
		OutputFormat::Text => println!("{slot}"),
	}
	Ok(())
}
