//! Offline-first core of the field navigation tool.
//!
//! Field data is written to the [`LocalStore`] first and stays usable offline. The
//! [`SyncEngine`] pushes local changes to the team backend and pulls the team's
//! authoritative state back, while tombstones keep deleted data from reappearing.

use std::path::Path;

use sb_utils::FileIOError;

pub mod config;
pub mod logging;
pub mod store;
pub mod sync;
pub mod tracking;

pub use config::AppConfig;
pub use store::LocalStore;
pub use sync::{SyncEngine, SyncMode, SyncReport, SyncResult, SyncState};
pub use tracking::TrackRecorder;

pub use sb_cloud_api as cloud_api;
pub use sb_geo as geo;
pub use sb_sync as model;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to (de)serialize stored record '{key}': {source}")]
	Serde {
		key: String,
		#[source]
		source: serde_json::Error,
	},
	#[error("invalid store key '{0}'")]
	InvalidKey(String),
	#[error(transparent)]
	Tombstone(#[from] sb_sync::Error),
}

impl Error {
	pub(crate) fn serde(key: impl Into<String>, source: serde_json::Error) -> Self {
		Self::Serde {
			key: key.into(),
			source,
		}
	}

	pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error, context: &'static str) -> Self {
		Self::FileIO(FileIOError::from((path, source, context)))
	}
}
