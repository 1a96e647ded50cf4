use async_trait::async_trait;
use clap::ValueEnum;
use colored::Colorize;
use slotclaim::{ClaimOutcome, ClaimStatus, EntryStatus, ReportSink, RunReport};

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text
	#[default]
	Text,
	/// JSON output
	Json,
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Text => write!(f, "text"),
			OutputFormat::Json => write!(f, "json"),
		}
	}
}

/// Prints the run report on stdout.
#[derive(Debug, Clone, Copy)]
pub struct StdoutSink {
	format: OutputFormat,
}

impl StdoutSink {
	pub fn new(format: OutputFormat) -> Self {
		Self { format }
	}
}

#[async_trait]
impl ReportSink for StdoutSink {
	async fn deliver(&self, report: &RunReport) -> slotclaim::Result<()> {
		match self.format {
			OutputFormat::Json => println!("{}", report.to_json()?),
			OutputFormat::Text => {
				let headline = format!("{}/{} claimed", report.successes(), report.entries.len());
				let headline = if report.successes() == report.entries.len() { headline.green() } else { headline.yellow() };
				println!("{}", headline.bold());
				for line in report.render_text().lines() {
					println!("{}", paint_line(report, line));
				}
			}
		}
		Ok(())
	}
}

/// Colors report lines that start with a resource entry.
fn paint_line(report: &RunReport, line: &str) -> String {
	let entry = report.entries.iter().find(|e| line.trim_start().starts_with(&e.resource));
	match entry.map(|e| e.status) {
		Some(EntryStatus::Success) => line.green().to_string(),
		Some(EntryStatus::DryRun | EntryStatus::Withheld) => line.cyan().to_string(),
		Some(_) => line.red().to_string(),
		None => line.to_string(),
	}
}

pub fn print_outcome(outcome: &ClaimOutcome, format: OutputFormat) -> anyhow::Result<()> {
	match format {
		OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
		OutputFormat::Text => {
			let status = match outcome.status() {
				ClaimStatus::Success => outcome.status().to_string().green(),
				ClaimStatus::Unknown => outcome.status().to_string().yellow(),
				_ => outcome.status().to_string().red(),
			};
			println!("{status}: {}", outcome.message());
		}
	}
	Ok(())
}
