use std::path::Path;

use anyhow::{anyhow, Result};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: `RUST_LOG` (or `level` for our crates) to stderr,
/// plus a daily rolling, non-ANSI copy in `logs_dir`.
///
/// Keep the returned guard alive for as long as file logs should be flushed.
pub fn init(logs_dir: &Path, level: &str) -> Result<WorkerGuard> {
	std::fs::create_dir_all(logs_dir)
		.map_err(|e| anyhow!("Failed to create logs directory {}: {e}", logs_dir.display()))?;

	let (file_writer, guard) = tracing_appender::non_blocking(rolling::daily(logs_dir, "skytebane.log"));

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::new(format!(
			"warn,sb_core={level},sb_sync={level},sb_cloud_api={level},skytebane={level}"
		))
	});

	tracing_subscriber::registry()
		.with(env_filter)
		.with(fmt::layer().with_target(true).with_writer(std::io::stderr))
		.with(
			fmt::layer()
				.with_target(true)
				.with_ansi(false)
				.with_writer(file_writer),
		)
		.try_init()
		.map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;

	Ok(guard)
}
