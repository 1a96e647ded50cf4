use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::config::ConfigFile;
use crate::output::{OutputFormat, print_outcome};

/// Classifies `words` joined by spaces, or stdin when empty. Extra rules come from the config file when present.
pub fn execute(config: &Path, words: &[String], format: OutputFormat) -> Result<()> {
	let file = ConfigFile::load_or_default(config)?;
	let classifier = slotclaim::Classifier::from_specs(&file.classifier_rules)?;

	let text = if words.is_empty() {
		let mut buf = String::new();
		std::io::stdin().read_to_string(&mut buf).context("failed to read response text from stdin")?;
		buf
	} else {
		words.join(" ")
	};
	if text.trim().is_empty() {
		bail!("no response text given");
	}

	print_outcome(&classifier.classify(&text), format)
}
