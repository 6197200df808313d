//! Durable local state: one JSON array per entity kind, the tombstone registry,
//! the per-kind sets of ids still waiting to be pushed, and a few scalar values.

mod backend;

use std::{collections::BTreeSet, path::Path, sync::Arc};

use sb_sync::{Entity, EntityKind, TombstoneRegistry};
use serde::{de::DeserializeOwned, Serialize};
use strum::IntoEnumIterator;

use crate::Error;

pub use backend::{FileBackend, MemoryBackend, StoreBackend};

const TOMBSTONES_KEY: &str = "tombstones";

pub struct LocalStore {
	backend: Arc<dyn StoreBackend>,
}

impl LocalStore {
	pub fn new(backend: impl StoreBackend + 'static) -> Self {
		Self {
			backend: Arc::new(backend),
		}
	}

	/// Opens (creating if needed) a file-backed store in `dir`.
	pub async fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
		Ok(Self::new(FileBackend::open(dir).await?))
	}

	pub fn in_memory() -> Self {
		Self::new(MemoryBackend::default())
	}

	/// The stored collection for `E`, empty if nothing was ever saved.
	pub async fn load<E: Entity>(&self) -> Result<Vec<E>, Error> {
		Ok(self.read(E::KIND.as_ref()).await?.unwrap_or_default())
	}

	pub async fn save<E: Entity>(&self, entities: &[E]) -> Result<(), Error> {
		self.write(E::KIND.as_ref(), entities).await
	}

	pub async fn load_tombstones(&self) -> Result<TombstoneRegistry, Error> {
		Ok(self.read(TOMBSTONES_KEY).await?.unwrap_or_default())
	}

	pub async fn save_tombstones(&self, tombstones: &TombstoneRegistry) -> Result<(), Error> {
		self.write(TOMBSTONES_KEY, tombstones).await
	}

	/// Local ids of `kind` created or changed locally and not yet acknowledged remotely.
	pub async fn load_pending(&self, kind: EntityKind) -> Result<BTreeSet<String>, Error> {
		Ok(self.read(&pending_key(kind)).await?.unwrap_or_default())
	}

	pub async fn save_pending(&self, kind: EntityKind, ids: &BTreeSet<String>) -> Result<(), Error> {
		self.write(&pending_key(kind), ids).await
	}

	pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
		self.read(&value_key(key)?).await
	}

	pub async fn set_value<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), Error> {
		self.write(&value_key(key)?, value).await
	}

	pub async fn remove_value(&self, key: &str) -> Result<(), Error> {
		self.backend.remove(&value_key(key)?).await
	}

	/// Drops every collection, pending set and the tombstone registry.
	/// Scalar values are kept.
	pub async fn clear(&self) -> Result<(), Error> {
		for kind in EntityKind::iter() {
			self.backend.remove(kind.as_ref()).await?;
			self.backend.remove(&pending_key(kind)).await?;
		}
		self.backend.remove(TOMBSTONES_KEY).await
	}

	async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
		self.backend
			.read(key)
			.await?
			.map(|bytes| serde_json::from_slice(&bytes).map_err(|e| Error::serde(key, e)))
			.transpose()
	}

	async fn write<T: Serialize + Sync + ?Sized>(&self, key: &str, value: &T) -> Result<(), Error> {
		let bytes = serde_json::to_vec(value).map_err(|e| Error::serde(key, e))?;
		self.backend.write(key, bytes).await
	}
}

fn pending_key(kind: EntityKind) -> String {
	format!("pending.{kind}")
}

fn value_key(key: &str) -> Result<String, Error> {
	if key.is_empty()
		|| !key
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
	{
		return Err(Error::InvalidKey(key.to_string()));
	}

	Ok(format!("value.{key}"))
}
