use chrono::{DateTime, Utc};
use sb_geo::{haversine_distance, initial_bearing, Position};
use serde::Serialize;

use crate::{
	tombstone::{coordinate_signature, TombstoneKeys, Tombstoned},
	ShotPairPoint,
};

/// An origin and its target, reassembled from persisted points. Never stored as such.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShotPair {
	pub pair_local_id: Option<String>,
	pub origin: Option<ShotPairPoint>,
	pub target: Option<ShotPairPoint>,
	/// Both ends share an explicit pair id.
	pub linked: bool,
	/// A heuristic picked one of several equally plausible targets.
	pub ambiguous: bool,
}

impl ShotPair {
	pub(crate) fn linked(
		pair_local_id: String,
		origin: Option<ShotPairPoint>,
		target: Option<ShotPairPoint>,
	) -> Self {
		Self {
			pair_local_id: Some(pair_local_id),
			origin,
			target,
			linked: true,
			ambiguous: false,
		}
	}

	pub(crate) fn derived(
		origin: Option<ShotPairPoint>,
		target: Option<ShotPairPoint>,
		ambiguous: bool,
	) -> Self {
		Self {
			pair_local_id: None,
			origin,
			target,
			linked: false,
			ambiguous,
		}
	}

	/// Where the shooter stood.
	pub fn current(&self) -> Option<Position> {
		self.origin.as_ref().map(|p| p.position)
	}

	pub fn target_position(&self) -> Option<Position> {
		self.target.as_ref().map(|p| p.position)
	}

	pub fn is_complete(&self) -> bool {
		self.origin.is_some() && self.target.is_some()
	}

	/// The pair's remote id: the origin's when it has one, otherwise the target's.
	pub fn remote_id(&self) -> Option<i64> {
		self.origin
			.as_ref()
			.and_then(|p| p.remote_id)
			.or_else(|| self.target.as_ref().and_then(|p| p.remote_id))
	}

	pub fn created_at(&self) -> Option<DateTime<Utc>> {
		self.points().map(|p| p.created_at).min()
	}

	pub fn name(&self) -> Option<&str> {
		self.points().find_map(|p| p.name.as_deref())
	}

	pub fn points(&self) -> impl Iterator<Item = &ShotPairPoint> {
		self.origin.iter().chain(self.target.iter())
	}

	pub fn signature(&self) -> Option<String> {
		coordinate_signature(self.points().map(|p| p.position))
	}

	/// Range in meters between origin and target, when both are known.
	pub fn distance(&self) -> Option<f64> {
		Some(haversine_distance(self.current()?, self.target_position()?))
	}

	pub fn bearing(&self) -> Option<f64> {
		Some(initial_bearing(self.current()?, self.target_position()?))
	}

	pub(crate) fn dedup_key(&self) -> (Option<i64>, Option<String>, Option<String>) {
		(
			self.remote_id(),
			self.current().map(|p| p.fixed6()),
			self.target_position().map(|p| p.fixed6()),
		)
	}
}

impl Tombstoned for ShotPair {
	fn tombstone_keys(&self) -> TombstoneKeys {
		TombstoneKeys {
			pair_local_id: self.pair_local_id.clone(),
			remote_ids: self.points().filter_map(|p| p.remote_id).collect(),
			signature: self.signature(),
			local_ids: self.points().map(|p| p.local_id.clone()).collect(),
		}
	}
}
