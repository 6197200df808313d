use std::{
	collections::{BTreeMap, HashMap, HashSet},
	future::Future,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use sb_cloud_api::RemoteGateway;
use sb_sync::{
	Entity, EntityKind, Find, Observation, PairingResolver, Position, ShotPair, ShotPairDraft,
	ShotPairPoint, TombstoneKeys, TombstoneRegistry, Track,
};
use sb_utils::report_error;
use serde_json::Value;
use tokio::{
	sync::{watch, Mutex, Notify, RwLock},
	time::timeout,
};
use tracing::{debug, info, instrument, warn};

use crate::{config::SyncConfig, Error, LocalStore};

use super::{SkipReason, SyncMode, SyncReport, SyncResult, SyncState};

/// Team the data in the local store belongs to.
const DATA_SCOPE_KEY: &str = "data_scope";
const LAST_POSITION_KEY: &str = "last_position";

/// Outcome of pushing or pulling a single entity kind.
struct KindOutcome {
	kind: EntityKind,
	count: usize,
	error: Option<String>,
}

impl KindOutcome {
	const fn ok(kind: EntityKind, count: usize) -> Self {
		Self {
			kind,
			count,
			error: None,
		}
	}

	const fn failed(kind: EntityKind, count: usize, error: String) -> Self {
		Self {
			kind,
			count,
			error: Some(error),
		}
	}
}

/// An upsert the backend accepted, with the exact record it was sent.
struct Acked {
	local_id: String,
	remote_id: Option<i64>,
	record: Value,
}

/// Clears the in-flight flag however the sync future ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

/// Pushes local field data to the team backend, pulls the team's state back into
/// the local store and keeps deleted entities from coming back.
pub struct SyncEngine {
	gateway: Arc<dyn RemoteGateway>,
	store: Arc<LocalStore>,
	resolver: PairingResolver,
	config: SyncConfig,
	scope: RwLock<Option<String>>,
	tombstones: RwLock<TombstoneRegistry>,
	/// Held across every read-modify-write of the local store.
	write_lock: Mutex<()>,
	in_flight: AtomicBool,
	state: watch::Sender<SyncState>,
	mutations: Notify,
}

impl SyncEngine {
	pub async fn new(
		gateway: Arc<dyn RemoteGateway>,
		store: Arc<LocalStore>,
		config: SyncConfig,
	) -> Result<Arc<Self>, Error> {
		let tombstones = store.load_tombstones().await?;

		let resolver = if config.legacy_pairing {
			PairingResolver::legacy(config.legacy_time_window())
		} else {
			PairingResolver::default()
		};

		let (state, _) = watch::channel(SyncState::Idle);

		Ok(Arc::new(Self {
			gateway,
			store,
			resolver,
			config,
			scope: RwLock::new(None),
			tombstones: RwLock::new(tombstones),
			write_lock: Mutex::new(()),
			in_flight: AtomicBool::new(false),
			state,
			mutations: Notify::new(),
		}))
	}

	pub const fn config(&self) -> &SyncConfig {
		&self.config
	}

	pub fn store(&self) -> &LocalStore {
		&self.store
	}

	pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
		self.state.subscribe()
	}

	pub(super) const fn mutations(&self) -> &Notify {
		&self.mutations
	}

	pub async fn scope(&self) -> Option<String> {
		self.scope.read().await.clone()
	}

	/// Sets the active team. Selecting a team other than the one the local data
	/// belongs to wipes local data first; clearing the team keeps it.
	pub async fn set_scope(&self, scope: Option<String>) -> Result<(), Error> {
		let scope = scope.filter(|s| !s.trim().is_empty());

		if let Some(team) = &scope {
			let data_scope = self.store.get_value::<String>(DATA_SCOPE_KEY).await?;

			if data_scope.as_deref() != Some(team.as_str()) {
				if let Some(previous) = data_scope {
					info!(%previous, %team, "Switching team, wiping local data;");
					self.reset_local_data().await?;
				}
				self.store.set_value(DATA_SCOPE_KEY, team).await?;
			}
		}

		*self.scope.write().await = scope;

		Ok(())
	}

	pub async fn collection<E: Entity>(&self) -> Result<Vec<E>, Error> {
		self.store.load().await
	}

	/// Creates or replaces an entity locally and queues it for the next push.
	pub async fn record<E: Entity>(&self, entity: E) -> Result<(), Error> {
		self.record_many(vec![entity]).await
	}

	pub async fn record_many<E: Entity>(&self, batch: Vec<E>) -> Result<(), Error> {
		if batch.is_empty() {
			return Ok(());
		}

		{
			let _guard = self.write_lock.lock().await;

			// pending first: a pending id without an entity is harmless, the reverse loses a push
			let mut pending = self.store.load_pending(E::KIND).await?;
			pending.extend(batch.iter().map(|e| e.local_id().to_string()));
			self.store.save_pending(E::KIND, &pending).await?;

			let mut entities = self.store.load::<E>().await?;
			for entity in batch {
				match entities.iter_mut().find(|e| e.local_id() == entity.local_id()) {
					Some(existing) => *existing = entity,
					None => entities.push(entity),
				}
			}
			self.store.save(&entities).await?;
		}

		debug!(kind = %E::KIND, "Recorded local change;");
		self.mutations.notify_one();

		Ok(())
	}

	/// Places a new shot pair: the origin plus the target projected from it.
	pub async fn record_shot_pair(&self, draft: ShotPairDraft) -> Result<[ShotPairPoint; 2], Error> {
		let points = draft.project();
		self.record_many(points.to_vec()).await?;
		Ok(points)
	}

	/// Deletes an entity locally right away and remotely on a best-effort basis.
	/// The tombstone keeps it from being pulled back in either way.
	pub async fn delete<E: Entity>(&self, local_id: &str) -> Result<(), Error> {
		let remote_id = self
			.store
			.load::<E>()
			.await?
			.iter()
			.find(|e| e.local_id() == local_id)
			.and_then(|e| e.remote_id());

		self.delete_local::<E>(TombstoneKeys {
			remote_ids: remote_id.into_iter().collect(),
			local_ids: vec![local_id.to_string()],
			..Default::default()
		})
		.await?;

		self.delete_remote(E::KIND, [local_id.to_string()]).await;

		Ok(())
	}

	/// Deletes both ends of a shot pair, tombstoning its pair id, remote ids and
	/// coordinate signature.
	pub async fn delete_shot_pair(&self, pair: &ShotPair) -> Result<(), Error> {
		self.delete_local::<ShotPairPoint>(sb_sync::Tombstoned::tombstone_keys(pair))
			.await?;

		self.delete_remote(
			EntityKind::ShotPairPoints,
			pair.points().map(|p| p.local_id.clone()),
		)
		.await;

		Ok(())
	}

	async fn delete_local<E: Entity>(&self, keys: TombstoneKeys) -> Result<(), Error> {
		let _guard = self.write_lock.lock().await;

		// The tombstone goes in before anything else so a pull reconciling after
		// this point can never see the entity as alive.
		let tombstones = {
			let mut tombstones = self.tombstones.write().await;
			tombstones.record_keys(keys)?;
			self.store.save_tombstones(&tombstones).await?;
			tombstones.downgrade()
		};

		let mut entities = self.store.load::<E>().await?;
		let before = entities.len();
		let mut removed = Vec::new();
		entities.retain(|e| {
			let keep = !tombstones.is_tombstoned(e);
			if !keep {
				removed.push(e.local_id().to_string());
			}
			keep
		});

		if entities.len() != before {
			self.store.save(&entities).await?;
		}

		let mut pending = self.store.load_pending(E::KIND).await?;
		if removed.iter().fold(false, |changed, id| pending.remove(id) || changed) {
			self.store.save_pending(E::KIND, &pending).await?;
		}

		debug!(kind = %E::KIND, removed = removed.len(), "Deleted locally;");

		Ok(())
	}

	async fn delete_remote(&self, kind: EntityKind, local_ids: impl IntoIterator<Item = String>) {
		if self.scope().await.is_none() {
			return;
		}

		for local_id in local_ids {
			// the tombstone already hides it, a failed delete only leaves garbage behind remotely
			let res = self
				.call(
					format!("deleting {kind} {local_id}"),
					self.gateway.delete(kind, &local_id),
				)
				.await;
			report_error("best-effort remote delete", &res);
		}
	}

	/// Wipes every collection, the pending sets and the tombstones.
	pub async fn reset_local_data(&self) -> Result<(), Error> {
		let _guard = self.write_lock.lock().await;
		let mut tombstones = self.tombstones.write().await;

		self.store.clear().await?;
		tombstones.reset();

		info!("Local data wiped;");

		Ok(())
	}

	pub async fn set_last_position(&self, position: Position) -> Result<(), Error> {
		self.store.set_value(LAST_POSITION_KEY, &position).await
	}

	pub async fn last_position(&self) -> Result<Option<Position>, Error> {
		self.store.get_value(LAST_POSITION_KEY).await
	}

	/// Current shot pairs, derived from the stored points with tombstones applied.
	pub async fn reconcile(&self) -> Result<Vec<ShotPair>, Error> {
		let points = self.store.load::<ShotPairPoint>().await?;
		let tombstones = self.tombstones.read().await;

		Ok(self.resolver.resolve(&points, &tombstones))
	}

	/// Push, then pull, then reconcile. Never fails: problems end up in
	/// [`SyncResult::errors`]. Without an active team, or while another sync is
	/// running, this returns immediately with an empty result.
	#[instrument(skip(self))]
	pub async fn sync(&self, mode: SyncMode) -> SyncReport {
		let Some(scope) = self.scope().await else {
			debug!("No active team, nothing to sync;");
			return SyncReport::skipped(SkipReason::NoScope);
		};

		if self
			.in_flight
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			debug!("Sync already in flight, dropping request;");
			return SyncReport::skipped(SkipReason::AlreadyRunning);
		}
		let _in_flight = InFlight(&self.in_flight);

		let mut result = SyncResult::default();

		self.state.send_replace(SyncState::Pushing);
		let (pushed, errors) = self.push(&scope).await;
		result.pushed = pushed;
		result.errors.extend(errors);

		self.state.send_replace(SyncState::Pulling);
		let (pulled, errors) = self.pull(&scope).await;
		let nothing_pulled = pulled.is_empty();
		result.pulled = pulled;
		result.errors.extend(errors);

		self.state.send_replace(SyncState::Reconciling);
		match self.reconcile().await {
			Ok(pairs) => debug!(pairs = pairs.len(), "Reconciled shot pairs;"),
			Err(e) => result.errors.push(format!("reconciling shot pairs: {e}")),
		}

		// Failed stays published until the next sync starts
		self.state.send_replace(if nothing_pulled {
			SyncState::Failed
		} else {
			SyncState::Idle
		});

		let summary = match mode {
			SyncMode::Manual => {
				let summary = result.summary();
				info!(%scope, "Sync finished: {summary}");
				Some(summary)
			}
			SyncMode::Auto => {
				debug!(
					%scope,
					pushed = result.total_pushed(),
					pulled = result.total_pulled(),
					errors = result.errors.len(),
					"Auto sync finished;"
				);
				None
			}
		};

		for error in &result.errors {
			warn!(%scope, "Sync error: {error}");
		}

		SyncReport {
			result,
			summary,
			skipped: None,
		}
	}

	/// Upserts every pending entity, one independent batch per kind.
	pub async fn push(&self, scope: &str) -> (BTreeMap<EntityKind, usize>, Vec<String>) {
		let (tracks, finds, observations, points) = futures::join!(
			self.push_kind::<Track>(scope),
			self.push_kind::<Find>(scope),
			self.push_kind::<Observation>(scope),
			self.push_kind::<ShotPairPoint>(scope),
		);

		collect_outcomes([tracks, finds, observations, points], true)
	}

	/// Fetches every kind and replaces the local collections with what came back.
	pub async fn pull(&self, scope: &str) -> (BTreeMap<EntityKind, usize>, Vec<String>) {
		let (tracks, finds, observations, points) = futures::join!(
			self.pull_kind::<Track>(scope),
			self.pull_kind::<Find>(scope),
			self.pull_kind::<Observation>(scope),
			self.pull_kind::<ShotPairPoint>(scope),
		);

		collect_outcomes([tracks, finds, observations, points], false)
	}

	async fn push_kind<E: Entity>(&self, scope: &str) -> KindOutcome {
		let kind = E::KIND;

		let pending = match self.store.load_pending(kind).await {
			Ok(pending) => pending,
			Err(e) => return KindOutcome::failed(kind, 0, format!("{kind}: {e}")),
		};
		if pending.is_empty() {
			return KindOutcome::ok(kind, 0);
		}

		let entities = match self.store.load::<E>().await {
			Ok(entities) => entities,
			Err(e) => return KindOutcome::failed(kind, 0, format!("{kind}: {e}")),
		};

		let mut acked = Vec::new();
		let mut error = None;

		for entity in entities.iter().filter(|e| pending.contains(e.local_id())) {
			let record = match serde_json::to_value(entity) {
				Ok(record) => record,
				Err(e) => {
					error = Some(format!("{kind} {}: {e}", entity.local_id()));
					break;
				}
			};

			match self
				.call(
					format!("pushing {kind} {}", entity.local_id()),
					self.gateway.upsert(kind, scope, &record),
				)
				.await
			{
				Ok(ack) => acked.push(Acked {
					local_id: entity.local_id().to_string(),
					remote_id: ack.id,
					record,
				}),
				Err(e) => {
					// what's left stays pending and goes out with the next sync
					error = Some(e);
					break;
				}
			}
		}

		if !acked.is_empty() {
			if let Err(e) = self.apply_acks::<E>(&acked).await {
				error.get_or_insert_with(|| format!("{kind}: recording push acknowledgements: {e}"));
			}
		}

		debug!(%kind, pushed = acked.len(), failed = error.is_some(), "Pushed;");

		KindOutcome {
			kind,
			count: acked.len(),
			error,
		}
	}

	/// Applies remote ids and takes acknowledged entities out of the outbox. An
	/// entity edited while its push was in flight no longer matches what the
	/// backend stored, so it stays pending for the next sync.
	async fn apply_acks<E: Entity>(&self, acked: &[Acked]) -> Result<(), Error> {
		let _guard = self.write_lock.lock().await;

		let acked = acked
			.iter()
			.map(|ack| (ack.local_id.as_str(), ack))
			.collect::<HashMap<_, _>>();

		let mut entities = self.store.load::<E>().await?;
		let mut changed = false;
		let mut settled = acked.keys().copied().collect::<HashSet<_>>();

		for entity in &mut entities {
			let Some(ack) = acked.get(entity.local_id()) else {
				continue;
			};

			let unchanged = serde_json::to_value(&*entity)
				.map(|current| current == ack.record)
				.unwrap_or(false);
			if !unchanged {
				debug!(
					kind = %E::KIND,
					local_id = %ack.local_id,
					"Changed while being pushed, keeping it pending;"
				);
				settled.remove(ack.local_id.as_str());
			}

			if let Some(remote_id) = ack.remote_id {
				if entity.remote_id() != Some(remote_id) {
					entity.acknowledge(remote_id);
					changed = true;
				}
			}
		}
		if changed {
			self.store.save(&entities).await?;
		}

		let mut pending = self.store.load_pending(E::KIND).await?;
		pending.retain(|id| !settled.contains(id.as_str()));
		self.store.save_pending(E::KIND, &pending).await
	}

	async fn pull_kind<E: Entity>(&self, scope: &str) -> KindOutcome {
		let kind = E::KIND;

		let records = match self
			.call(format!("pulling {kind}"), self.gateway.list(kind, scope))
			.await
		{
			Ok(records) => records,
			Err(e) => return KindOutcome::failed(kind, 0, e),
		};

		let received = records.len();
		let incoming = records
			.into_iter()
			.filter_map(parse_remote::<E>)
			.collect::<Vec<_>>();

		match self.replace_collection(incoming).await {
			Ok(accepted) => {
				debug!(%kind, received, accepted, "Pulled;");
				KindOutcome::ok(kind, accepted)
			}
			Err(e) => KindOutcome::failed(kind, 0, format!("storing pulled {kind}: {e}")),
		}
	}

	/// Wholesale replace of the local collection by the pulled one, except that
	/// entities still waiting to be pushed keep their local version.
	async fn replace_collection<E: Entity>(&self, incoming: Vec<E>) -> Result<usize, Error> {
		let _guard = self.write_lock.lock().await;
		// read under the write lock: any delete that returned before now is honored
		let tombstones = self.tombstones.read().await;

		let pending = self.store.load_pending(E::KIND).await?;
		let local = self.store.load::<E>().await?;

		let mut merged: Vec<E> = Vec::with_capacity(incoming.len() + pending.len());
		let mut index = HashMap::<String, usize>::new();
		let mut buried = 0;

		for entity in incoming {
			if tombstones.is_tombstoned(&entity) {
				buried += 1;
				continue;
			}
			if pending.contains(entity.local_id()) {
				continue;
			}

			match index.get(entity.local_id()) {
				Some(&i) => merged[i] = entity,
				None => {
					index.insert(entity.local_id().to_string(), merged.len());
					merged.push(entity);
				}
			}
		}

		let accepted = merged.len();

		merged.extend(
			local
				.into_iter()
				.filter(|e| pending.contains(e.local_id()) && !tombstones.is_tombstoned(e)),
		);

		if buried > 0 {
			debug!(kind = %E::KIND, buried, "Dropped tombstoned records from pull;");
		}

		self.store.save(&merged).await?;

		Ok(accepted)
	}

	async fn call<T>(
		&self,
		what: String,
		fut: impl Future<Output = Result<T, sb_cloud_api::Error>>,
	) -> Result<T, String> {
		let limit = self.config.request_timeout();

		match timeout(limit, fut).await {
			Ok(Ok(value)) => Ok(value),
			Ok(Err(e)) => Err(format!("{what}: {e}")),
			Err(_) => Err(format!("{what}: timed out after {}s", limit.as_secs())),
		}
	}
}

/// Parses a pulled record, skipping (and logging) anything malformed rather than
/// letting it into the local keyspace.
fn parse_remote<E: Entity>(record: Value) -> Option<E> {
	let local_id = sb_utils::non_blank(record.get("localId").and_then(Value::as_str))
		.map(ToString::to_string);

	let Some(local_id) = local_id else {
		warn!(
			kind = %E::KIND,
			remote_id = ?record.get("id"),
			"Skipping pulled record without a local id;"
		);
		return None;
	};

	serde_json::from_value(record)
		.map_err(|e| warn!(kind = %E::KIND, %local_id, "Skipping malformed pulled record: {e}"))
		.ok()
}

fn collect_outcomes(
	outcomes: [KindOutcome; 4],
	keep_partial: bool,
) -> (BTreeMap<EntityKind, usize>, Vec<String>) {
	let mut counts = BTreeMap::new();
	let mut errors = Vec::new();

	for KindOutcome { kind, count, error } in outcomes {
		match error {
			None => {
				counts.insert(kind, count);
			}
			Some(error) => {
				if keep_partial && count > 0 {
					counts.insert(kind, count);
				}
				errors.push(error);
			}
		}
	}

	(counts, errors)
}
