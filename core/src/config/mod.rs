//! Application configuration management

use std::{fs, path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub mod app_config;

pub use app_config::AppConfig;

/// Platform-specific data directory resolution
pub fn default_data_dir() -> Result<PathBuf> {
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("skytebane");

	// Create directory if it doesn't exist
	fs::create_dir_all(&dir)?;

	Ok(dir)
}

/// Tuning for the sync engine. Missing fields fall back to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
	/// Upper bound for a single request to the backend
	pub request_timeout_secs: u64,

	/// Whether local changes trigger a silent background sync
	pub auto_sync: bool,

	/// How long to wait after a change before auto syncing, so bursts coalesce
	pub auto_sync_debounce_ms: u64,

	/// Window used to pair legacy shot pair points that lack a pair id
	pub legacy_time_window_secs: i64,

	/// Use the legacy matcher chain (name, time window, creation order)
	pub legacy_pairing: bool,
}

impl SyncConfig {
	pub const fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub const fn auto_sync_debounce(&self) -> Duration {
		Duration::from_millis(self.auto_sync_debounce_ms)
	}

	pub fn legacy_time_window(&self) -> chrono::Duration {
		chrono::Duration::seconds(self.legacy_time_window_secs)
	}
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			request_timeout_secs: 15,
			auto_sync: true,
			auto_sync_debounce_ms: 1000,
			legacy_time_window_secs: 5 * 60,
			legacy_pairing: false,
		}
	}
}
