use std::sync::Arc;

use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info};

use super::{SyncEngine, SyncMode};

/// Runs an automatic sync shortly after local changes, coalescing bursts of
/// mutations into a single cycle. Returns `None` when auto sync is disabled.
pub fn spawn_auto_sync(engine: Arc<SyncEngine>) -> Option<JoinHandle<()>> {
	if !engine.config().auto_sync {
		debug!("Auto sync disabled;");
		return None;
	}

	let debounce = engine.config().auto_sync_debounce();

	Some(tokio::spawn(async move {
		info!(?debounce, "Auto sync actor started;");

		loop {
			engine.mutations().notified().await;
			sleep(debounce).await;

			let report = engine.sync(SyncMode::Auto).await;
			if let Some(reason) = report.skipped {
				debug!(?reason, "Auto sync skipped;");
			}
		}
	}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{config::SyncConfig, LocalStore};
	use async_trait::async_trait;
	use sb_cloud_api::{Error, RemoteGateway, UpsertAck};
	use sb_sync::{EntityKind, EntityMeta, Find, Position};
	use serde_json::Value;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[derive(Default)]
	struct CountingGateway {
		upserts: AtomicUsize,
	}

	#[async_trait]
	impl RemoteGateway for CountingGateway {
		async fn list(&self, _: EntityKind, _: &str) -> Result<Vec<Value>, Error> {
			Ok(Vec::new())
		}

		async fn upsert(&self, _: EntityKind, _: &str, _: &Value) -> Result<UpsertAck, Error> {
			self.upserts.fetch_add(1, Ordering::SeqCst);
			Ok(UpsertAck::default())
		}

		async fn delete(&self, _: EntityKind, _: &str) -> Result<(), Error> {
			Ok(())
		}
	}

	fn find(name: &str) -> Find {
		Find {
			meta: EntityMeta::new(name, "red", "hunt"),
			position: Position::new(60.0, 10.0),
			shot_pair_id: sb_sync::UNKNOWN_SHOT_PAIR.to_string(),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn burst_of_changes_is_pushed_once_debounced() {
		let gateway = Arc::new(CountingGateway::default());
		let engine = SyncEngine::new(
			gateway.clone(),
			Arc::new(LocalStore::in_memory()),
			SyncConfig::default(),
		)
		.await
		.expect("engine");
		engine
			.set_scope(Some("team".to_string()))
			.await
			.expect("scope");

		let handle = spawn_auto_sync(engine.clone()).expect("enabled by default");

		engine.record(find("a")).await.expect("records");
		engine.record(find("b")).await.expect("records");

		sleep(engine.config().auto_sync_debounce() * 3).await;

		assert_eq!(gateway.upserts.load(Ordering::SeqCst), 2);
		assert!(engine
			.store()
			.load_pending(EntityKind::Finds)
			.await
			.expect("loads")
			.is_empty());

		handle.abort();
	}

	#[tokio::test]
	async fn disabled_by_config() {
		let engine = SyncEngine::new(
			Arc::new(CountingGateway::default()),
			Arc::new(LocalStore::in_memory()),
			SyncConfig {
				auto_sync: false,
				..Default::default()
			},
		)
		.await
		.expect("engine");

		assert!(spawn_auto_sync(engine).is_none());
	}
}
