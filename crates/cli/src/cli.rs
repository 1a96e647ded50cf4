use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use slotclaim::SessionMode;

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "slotclaim")]
#[command(about = "Claim reservation slots the moment they unlock")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (JSON)
	#[arg(short, long, global = true, value_name = "FILE", default_value = "slotclaim.json")]
	pub config: PathBuf,

	/// Output format
	#[arg(short, long, global = true, value_enum, default_value_t)]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Wait for the unlock and race one claim per configured resource
	Run(RunArgs),

	/// Show the slot id a resource, date and window resolve to
	Resolve {
		resource: String,
		/// Date in YYYY-MM-DD
		date: NaiveDate,
		/// Time window, e.g. 06:00-07:00
		window: String,
	},

	/// Classify a response text (read from stdin when no text is given)
	Classify { text: Vec<String> },

	/// Measure the remote clock offset and show the next unlock
	Skew {
		/// URL whose Date header is used (defaults to the configured site)
		url: Option<String>,
	},
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
	/// Claim this date instead of the one the unlock opens
	#[arg(long, value_name = "YYYY-MM-DD")]
	pub date: Option<NaiveDate>,

	/// Override a resource's time window
	#[arg(long = "window", value_name = "RESOURCE=WINDOW", value_parser = parse_assignment)]
	pub windows: Vec<(String, String)>,

	/// Leave a resource out of this run
	#[arg(long = "skip", value_name = "RESOURCE")]
	pub skip: Vec<String>,

	/// Walk the whole flow but never send the claim
	#[arg(long)]
	pub dry_run: bool,

	/// Rehearse now against an already-open date (implies --dry-run)
	#[arg(long)]
	pub shadow: bool,

	/// Allow the final submit
	#[arg(long)]
	pub allow_submit: bool,

	/// Session mode: shared or isolated
	#[arg(long, value_name = "MODE")]
	pub mode: Option<SessionMode>,

	/// Delay between unlock polls (ms)
	#[arg(long, value_name = "MS")]
	pub poll_interval: Option<u64>,

	/// Give up on the unlock after this long (seconds)
	#[arg(long, value_name = "SECS")]
	pub max_wait: Option<u64>,

	/// Navigation timeout (ms)
	#[arg(long, value_name = "MS")]
	pub navigation_timeout: Option<u64>,

	/// Selector timeout (ms)
	#[arg(long, value_name = "MS")]
	pub selector_timeout: Option<u64>,

	/// Trust the local clock instead of measuring the site's
	#[arg(long)]
	pub no_skew: bool,

	/// Connect to a running browser (http://host:port or ws:// URL)
	#[arg(long, value_name = "URL", conflicts_with = "browser_path")]
	pub cdp_endpoint: Option<String>,

	/// Browser executable to launch
	#[arg(long, value_name = "PATH")]
	pub browser_path: Option<PathBuf>,

	/// Show the launched browser window
	#[arg(long)]
	pub headful: bool,

	/// Run against the built-in simulated site instead of a browser
	#[arg(long)]
	pub fake: bool,
}

fn parse_assignment(value: &str) -> Result<(String, String), String> {
	let (key, val) = value.split_once('=').ok_or_else(|| format!("expected RESOURCE=WINDOW, got `{value}`"))?;
	if key.trim().is_empty() || val.trim().is_empty() {
		return Err(format!("expected RESOURCE=WINDOW, got `{value}`"));
	}
	Ok((key.trim().to_string(), val.trim().to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn run_flags_parse() {
		let cli = Cli::try_parse_from([
			"slotclaim",
			"-vv",
			"run",
			"--window",
			"courtA=07:00-08:00",
			"--skip",
			"courtB",
			"--mode",
			"isolated",
			"--date",
			"2026-10-25",
			"--shadow",
		])
		.unwrap();
		assert_eq!(cli.verbose, 2);
		let Commands::Run(args) = cli.command else {
			panic!("expected run");
		};
		assert_eq!(args.windows, vec![("courtA".to_string(), "07:00-08:00".to_string())]);
		assert_eq!(args.skip, vec!["courtB".to_string()]);
		assert_eq!(args.mode, Some(SessionMode::Isolated));
		assert_eq!(args.date, NaiveDate::from_ymd_opt(2026, 10, 25));
		assert!(args.shadow);
	}

	#[test]
	fn malformed_window_is_rejected() {
		assert!(Cli::try_parse_from(["slotclaim", "run", "--window", "courtA"]).is_err());
		assert!(Cli::try_parse_from(["slotclaim", "run", "--mode", "solo"]).is_err());
	}

	#[test]
	fn endpoint_and_browser_path_conflict() {
		assert!(Cli::try_parse_from(["slotclaim", "run", "--cdp-endpoint", "http://127.0.0.1:9222", "--browser-path", "/usr/bin/chromium"]).is_err());
	}
}
