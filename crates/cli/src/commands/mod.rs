mod classify;
mod resolve;
mod run;
mod skew;

use anyhow::Result;

use crate::cli::{Cli, Commands};

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Run(args) => run::execute(&cli.config, args, cli.format).await,
		Commands::Resolve { resource, date, window } => resolve::execute(&cli.config, &resource, date, &window, cli.format),
		Commands::Classify { text } => classify::execute(&cli.config, &text, cli.format),
		Commands::Skew { url } => skew::execute(&cli.config, url.as_deref(), cli.format).await,
	}
}
