use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the stderr subscriber. `RUST_LOG` wins over the `-v` count.
pub fn init_logging(verbose: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

	// A subscriber may already be installed.
	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
		.try_init();
}

/// Dependencies stay one level quieter than the slotclaim crates, whose run timeline is at `info`.
pub fn default_directives(verbose: u8) -> String {
	let (deps, ours) = match verbose {
		0 => ("warn", "info"),
		1 => ("info", "debug"),
		2 => ("debug", "trace"),
		_ => ("trace", "trace"),
	};
	format!("{deps},slotclaim={ours}")
}
