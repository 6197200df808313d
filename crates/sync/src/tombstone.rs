use std::collections::BTreeSet;

use itertools::Itertools;
use sb_geo::Position;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Error;

/// Order-independent signature of a set of coordinates, each rounded to 6 decimals.
///
/// `(A, B)` and `(B, A)` produce the same string, so a pair keeps its signature
/// even when a heuristic re-derivation swaps which end it calls the origin.
pub fn coordinate_signature(points: impl IntoIterator<Item = Position>) -> Option<String> {
	let signature = points.into_iter().map(|p| p.fixed6()).sorted().join("|");
	(!signature.is_empty()).then_some(signature)
}

/// Every identifier an entity can be tombstoned under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TombstoneKeys {
	pub pair_local_id: Option<String>,
	pub remote_ids: Vec<i64>,
	pub signature: Option<String>,
	pub local_ids: Vec<String>,
}

impl TombstoneKeys {
	fn is_empty(&self) -> bool {
		self.pair_local_id.is_none()
			&& self.remote_ids.is_empty()
			&& self.signature.is_none()
			&& self.local_ids.is_empty()
	}
}

pub trait Tombstoned {
	fn tombstone_keys(&self) -> TombstoneKeys;
}

/// Markers for deleted entities, checked on every pull so that a remote delete
/// that never went through can't bring the entity back.
///
/// Persisted as `{ "pairLocalIds": [], "remoteIds": [], "signatures": [], "localIds": [] }`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TombstoneRegistry {
	#[serde(default)]
	pair_local_ids: BTreeSet<String>,
	#[serde(default)]
	remote_ids: BTreeSet<i64>,
	#[serde(default)]
	signatures: BTreeSet<String>,
	#[serde(default)]
	local_ids: BTreeSet<String>,
}

impl TombstoneRegistry {
	/// Records whichever identifiers are given. Returns whether anything new was added.
	pub fn record_deletion(
		&mut self,
		pair_local_id: Option<&str>,
		remote_id: Option<i64>,
		coordinate_signature: Option<&str>,
	) -> Result<bool, Error> {
		self.record_keys(TombstoneKeys {
			pair_local_id: pair_local_id.map(ToString::to_string),
			remote_ids: remote_id.into_iter().collect(),
			signature: coordinate_signature.map(ToString::to_string),
			local_ids: vec![],
		})
	}

	/// Tombstones every identifier the entity currently has.
	pub fn record_entity(&mut self, entity: &impl Tombstoned) -> Result<bool, Error> {
		self.record_keys(entity.tombstone_keys())
	}

	pub fn record_keys(&mut self, keys: TombstoneKeys) -> Result<bool, Error> {
		if keys.is_empty() {
			return Err(Error::EmptyTombstone);
		}

		debug!(?keys, "Recording tombstone;");

		let mut added = false;
		if let Some(id) = keys.pair_local_id {
			added |= self.pair_local_ids.insert(id);
		}
		if let Some(signature) = keys.signature {
			added |= self.signatures.insert(signature);
		}
		for id in keys.remote_ids {
			added |= self.remote_ids.insert(id);
		}
		for id in keys.local_ids {
			added |= self.local_ids.insert(id);
		}

		Ok(added)
	}

	pub fn is_tombstoned(&self, entity: &impl Tombstoned) -> bool {
		let keys = entity.tombstone_keys();

		keys.pair_local_id
			.is_some_and(|id| self.pair_local_ids.contains(&id))
			|| keys.signature.is_some_and(|s| self.signatures.contains(&s))
			|| keys.remote_ids.iter().any(|id| self.remote_ids.contains(id))
			|| keys.local_ids.iter().any(|id| self.local_ids.contains(id))
	}

	pub fn is_empty(&self) -> bool {
		self.pair_local_ids.is_empty()
			&& self.remote_ids.is_empty()
			&& self.signatures.is_empty()
			&& self.local_ids.is_empty()
	}

	/// Forgets every tombstone. Only for a full wipe of local data.
	pub fn reset(&mut self) {
		self.pair_local_ids.clear();
		self.remote_ids.clear();
		self.signatures.clear();
		self.local_ids.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{PointRole, ShotPairPoint};
	use serde_json::json;

	#[test]
	fn signature_ignores_order_and_rounds() {
		let a = Position::new(60.000_000_1, 10.0);
		let b = Position::new(60.5, 11.25);

		assert_eq!(
			coordinate_signature([a, b]),
			Some("60.000000,10.000000|60.500000,11.250000".to_string())
		);
		assert_eq!(coordinate_signature([a, b]), coordinate_signature([b, a]));
		assert_eq!(coordinate_signature(std::iter::empty()), None);
	}

	#[test]
	fn recording_is_idempotent() {
		let mut registry = TombstoneRegistry::default();

		assert_eq!(registry.record_deletion(Some("p1"), Some(4), None), Ok(true));
		assert_eq!(registry.record_deletion(Some("p1"), Some(4), None), Ok(false));
		assert_eq!(registry.record_deletion(None, None, None), Err(Error::EmptyTombstone));
	}

	#[test]
	fn any_identifier_matches() {
		let mut registry = TombstoneRegistry::default();
		registry
			.record_deletion(None, Some(12), None)
			.expect("has an identifier");

		let mut point = ShotPairPoint::new(PointRole::Origin, Position::new(1.0, 1.0));
		assert!(!registry.is_tombstoned(&point));

		point.remote_id = Some(12);
		assert!(registry.is_tombstoned(&point));
	}

	#[test]
	fn reset_clears_everything() {
		let mut registry = TombstoneRegistry::default();
		registry
			.record_deletion(Some("p1"), Some(1), Some("sig"))
			.expect("has identifiers");

		registry.reset();
		assert!(registry.is_empty());
	}

	#[test]
	fn persisted_layout() {
		let mut registry = TombstoneRegistry::default();
		registry
			.record_deletion(Some("p1"), Some(3), Some("1.000000,2.000000"))
			.expect("has identifiers");

		assert_eq!(
			serde_json::to_value(&registry).expect("serializes"),
			json!({
				"pairLocalIds": ["p1"],
				"remoteIds": [3],
				"signatures": ["1.000000,2.000000"],
				"localIds": [],
			})
		);

		// files written before local ids were tracked
		let old: TombstoneRegistry = serde_json::from_value(json!({
			"pairLocalIds": ["p1"],
			"remoteIds": [],
			"signatures": [],
		}))
		.expect("deserializes");
		assert!(!old.is_empty());
	}
}
