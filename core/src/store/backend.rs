use std::{
	collections::HashMap,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs, io, sync::RwLock};
use tracing::trace;

use crate::Error;

/// Raw byte persistence under short string keys.
#[async_trait]
pub trait StoreBackend: Send + Sync {
	async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

	/// Replaces the value under `key`. A concurrent or later `read` sees either
	/// the old bytes or the new ones, never a mix.
	async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), Error>;

	async fn remove(&self, key: &str) -> Result<(), Error>;
}

/// One `{key}.json` file per key inside a directory.
#[derive(Debug)]
pub struct FileBackend {
	dir: PathBuf,
}

impl FileBackend {
	pub async fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
		let dir = dir.as_ref().to_path_buf();
		fs::create_dir_all(&dir)
			.await
			.map_err(|e| Error::io(&dir, e, "creating store directory"))?;

		Ok(Self { dir })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path(&self, key: &str) -> PathBuf {
		self.dir.join(format!("{key}.json"))
	}
}

#[async_trait]
impl StoreBackend for FileBackend {
	async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
		let path = self.path(key);
		match fs::read(&path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(Error::io(path, e, "reading stored record")),
		}
	}

	async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), Error> {
		let path = self.path(key);
		let tmp_path = path.with_extension("json.tmp");

		// Write to a temporary file first, then swap it in
		fs::write(&tmp_path, &bytes)
			.await
			.map_err(|e| Error::io(&tmp_path, e, "writing temporary record"))?;
		fs::rename(&tmp_path, &path)
			.await
			.map_err(|e| Error::io(&path, e, "replacing stored record"))?;

		trace!(%key, size = bytes.len(), "Persisted record;");

		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), Error> {
		let path = self.path(key);
		match fs::remove_file(&path).await {
			Err(e) if e.kind() != io::ErrorKind::NotFound => {
				Err(Error::io(path, e, "removing stored record"))
			}
			_ => Ok(()),
		}
	}
}

/// Volatile backend for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
	records: RwLock<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl StoreBackend for MemoryBackend {
	async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
		Ok(self.records.read().await.get(key).cloned())
	}

	async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), Error> {
		self.records.write().await.insert(key.to_string(), bytes);
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), Error> {
		self.records.write().await.remove(key);
		Ok(())
	}
}
