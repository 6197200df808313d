//! Application configuration

use std::{
	fs,
	path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{default_data_dir, SyncConfig};

const CONFIG_FILE: &str = "skytebane.json";

pub const API_URL_ENV: &str = "SKYTEBANE_API_URL";
pub const TEAM_ENV: &str = "SKYTEBANE_TEAM";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
	/// Config schema version
	pub version: u32,

	/// Data directory path
	pub data_dir: PathBuf,

	/// Logging level
	pub log_level: String,

	/// Base URL of the team backend
	pub api_url: String,

	/// Bearer token sent to the backend, if it requires one
	#[serde(default)]
	pub auth_token: Option<String>,

	/// Team whose data we sync. Nothing is synced without one
	#[serde(default)]
	pub active_team: Option<String>,

	#[serde(default)]
	pub sync: SyncConfig,
}

impl AppConfig {
	/// Load configuration from the default location
	pub fn load() -> Result<Self> {
		let data_dir = default_data_dir()?;
		Self::load_from(&data_dir)
	}

	/// Load configuration from a specific data directory
	pub fn load_from(data_dir: &Path) -> Result<Self> {
		let config_path = data_dir.join(CONFIG_FILE);

		if config_path.exists() {
			info!("Loading config from {:?}", config_path);
			let json = fs::read_to_string(&config_path)?;
			let mut config: Self = serde_json::from_str(&json)?;
			config.data_dir = data_dir.to_path_buf();

			if config.version < Self::target_version() {
				info!(
					"Migrating config from v{} to v{}",
					config.version,
					Self::target_version()
				);
				config.migrate()?;
				config.save()?;
			}

			Ok(config)
		} else {
			warn!("No config found, creating default at {:?}", config_path);
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		}
	}

	/// Load or create configuration
	pub fn load_or_create(data_dir: &Path) -> Result<Self> {
		Self::load_from(data_dir).or_else(|e| {
			warn!("Unreadable config, starting over with defaults: {e:#}");
			let config = Self::default_with_dir(data_dir.to_path_buf());
			config.save()?;
			Ok(config)
		})
	}

	/// Create default configuration with specific data directory
	pub fn default_with_dir(data_dir: PathBuf) -> Self {
		Self {
			version: Self::target_version(),
			data_dir,
			log_level: "info".to_string(),
			api_url: "http://localhost:5000/api".to_string(),
			auth_token: None,
			active_team: None,
			sync: SyncConfig::default(),
		}
	}

	/// Environment variables win over the file
	#[must_use]
	pub fn with_env_overrides(mut self) -> Self {
		if let Ok(url) = std::env::var(API_URL_ENV) {
			self.api_url = url;
		}
		if let Ok(team) = std::env::var(TEAM_ENV) {
			self.active_team = Some(team).filter(|t| !t.trim().is_empty());
		}
		self
	}

	/// Save configuration to disk
	pub fn save(&self) -> Result<()> {
		fs::create_dir_all(&self.data_dir)?;

		let config_path = self.data_dir.join(CONFIG_FILE);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)?;
		info!("Saved config to {:?}", config_path);
		Ok(())
	}

	/// Get the path for logs directory
	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	/// Get the path for the local entity store
	pub fn store_dir(&self) -> PathBuf {
		self.data_dir.join("store")
	}

	const fn target_version() -> u32 {
		2
	}

	fn migrate(&mut self) -> Result<()> {
		match self.version {
			0 => {
				self.version = 1;
				self.migrate()
			}
			1 => {
				// v2 introduced sync tuning
				self.sync = SyncConfig::default();
				self.version = 2;
				Ok(())
			}
			2 => Ok(()),
			v => Err(anyhow!("Unknown config version: {}", v)),
		}
	}
}
