use std::fmt::Debug;

use chrono::{DateTime, Utc};
use sb_geo::{destination_point, Position};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::tombstone::{TombstoneKeys, Tombstoned};

/// Placeholder used by tracks and finds that were not attached to a shot pair.
pub const UNKNOWN_SHOT_PAIR: &str = "unknown";

/// The persisted collections, one per kind. The string form is used both as the
/// local store key and as the `{kind}` segment of the remote endpoints.
#[derive(
	Serialize,
	Deserialize,
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	PartialOrd,
	Ord,
	Display,
	AsRefStr,
	EnumIter,
	EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
	Tracks,
	Finds,
	Observations,
	ShotPairPoints,
}

/// Something the local store can keep in a per-kind collection and the sync
/// engine can push and pull.
pub trait Entity:
	Serialize + DeserializeOwned + Tombstoned + Clone + Debug + Send + Sync + 'static
{
	const KIND: EntityKind;

	fn local_id(&self) -> &str;

	fn created_at(&self) -> DateTime<Utc>;

	fn remote_id(&self) -> Option<i64> {
		None
	}

	/// Applies the numeric id the remote store answered an upsert with.
	fn acknowledge(&mut self, _remote_id: i64) {}
}

pub fn new_local_id() -> String {
	Uuid::new_v4().to_string()
}

fn unknown_shot_pair() -> String {
	UNKNOWN_SHOT_PAIR.to_string()
}

/// Fields shared by tracks, finds and observations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
	pub local_id: String,
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub color: String,
	#[serde(default)]
	pub mode: String,
}

impl EntityMeta {
	pub fn new(name: impl Into<String>, color: impl Into<String>, mode: impl Into<String>) -> Self {
		Self {
			local_id: new_local_id(),
			created_at: Utc::now(),
			name: name.into(),
			color: color.into(),
			mode: mode.into(),
		}
	}
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
	#[serde(flatten)]
	pub meta: EntityMeta,
	#[serde(default)]
	pub points: Vec<Position>,
	#[serde(default = "unknown_shot_pair")]
	pub shot_pair_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Find {
	#[serde(flatten)]
	pub meta: EntityMeta,
	#[serde(flatten)]
	pub position: Position,
	#[serde(default = "unknown_shot_pair")]
	pub shot_pair_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
	#[serde(flatten)]
	pub meta: EntityMeta,
	#[serde(flatten)]
	pub position: Position,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub shot_pair_id: Option<String>,
}

macro_rules! meta_entity {
	($ty:ty, $kind:expr) => {
		impl Entity for $ty {
			const KIND: EntityKind = $kind;

			fn local_id(&self) -> &str {
				&self.meta.local_id
			}

			fn created_at(&self) -> DateTime<Utc> {
				self.meta.created_at
			}
		}

		impl Tombstoned for $ty {
			fn tombstone_keys(&self) -> TombstoneKeys {
				TombstoneKeys {
					local_ids: vec![self.meta.local_id.clone()],
					..Default::default()
				}
			}
		}
	};
}

meta_entity!(Track, EntityKind::Tracks);
meta_entity!(Find, EntityKind::Finds);
meta_entity!(Observation, EntityKind::Observations);

/// Which end of a shot pair a point is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointRole {
	/// Where the shooter stood (Skyteplass).
	#[serde(rename = "Skyteplass", alias = "origin")]
	Origin,
	/// Where the shot landed (Treffpunkt).
	#[serde(rename = "Treffpunkt", alias = "target")]
	Target,
}

/// A single persisted end of a shot pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShotPairPoint {
	pub local_id: String,
	pub created_at: DateTime<Utc>,
	pub category: PointRole,
	#[serde(flatten)]
	pub position: Position,
	/// Assigned by the remote store on first push.
	#[serde(default, rename = "id", skip_serializing_if = "Option::is_none")]
	pub remote_id: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pair_local_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default)]
	pub color: String,
	#[serde(default)]
	pub mode: String,
}

impl ShotPairPoint {
	pub fn new(category: PointRole, position: Position) -> Self {
		Self {
			local_id: new_local_id(),
			created_at: Utc::now(),
			category,
			position,
			remote_id: None,
			pair_local_id: None,
			name: None,
			color: String::new(),
			mode: String::new(),
		}
	}

	pub fn is_origin(&self) -> bool {
		self.category == PointRole::Origin
	}

	pub fn is_target(&self) -> bool {
		self.category == PointRole::Target
	}

	/// The pairing key, ignoring blank values some older clients sent.
	pub fn pair_key(&self) -> Option<&str> {
		sb_utils::non_blank(self.pair_local_id.as_deref())
	}
}

impl Entity for ShotPairPoint {
	const KIND: EntityKind = EntityKind::ShotPairPoints;

	fn local_id(&self) -> &str {
		&self.local_id
	}

	fn created_at(&self) -> DateTime<Utc> {
		self.created_at
	}

	fn remote_id(&self) -> Option<i64> {
		self.remote_id
	}

	fn acknowledge(&mut self, remote_id: i64) {
		self.remote_id = Some(remote_id);
	}
}

impl Tombstoned for ShotPairPoint {
	fn tombstone_keys(&self) -> TombstoneKeys {
		TombstoneKeys {
			pair_local_id: self.pair_key().map(ToString::to_string),
			remote_ids: self.remote_id.into_iter().collect(),
			signature: None,
			local_ids: vec![self.local_id.clone()],
		}
	}
}

/// Input for placing a new shot pair: the shooter's position plus the measured
/// bearing and range to the impact.
#[derive(Debug, Clone)]
pub struct ShotPairDraft {
	pub origin: Position,
	pub distance_meters: f64,
	pub bearing_degrees: f64,
	pub name: Option<String>,
	pub color: String,
	pub mode: String,
}

impl ShotPairDraft {
	pub fn new(origin: Position, distance_meters: f64, bearing_degrees: f64) -> Self {
		Self {
			origin,
			distance_meters,
			bearing_degrees,
			name: None,
			color: String::new(),
			mode: String::new(),
		}
	}

	#[must_use]
	pub fn named(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Builds the origin and the projected target, linked by a fresh pair id.
	pub fn project(self) -> [ShotPairPoint; 2] {
		let pair_local_id = new_local_id();
		let created_at = Utc::now();
		let target = destination_point(self.origin, self.distance_meters, self.bearing_degrees);

		[(PointRole::Origin, self.origin), (PointRole::Target, target)].map(
			|(category, position)| ShotPairPoint {
				local_id: new_local_id(),
				created_at,
				category,
				position,
				remote_id: None,
				pair_local_id: Some(pair_local_id.clone()),
				name: self.name.clone(),
				color: self.color.clone(),
				mode: self.mode.clone(),
			},
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::str::FromStr;

	#[test]
	fn kind_names_are_snake_case() {
		assert_eq!(EntityKind::ShotPairPoints.to_string(), "shot_pair_points");
		assert_eq!(EntityKind::from_str("finds"), Ok(EntityKind::Finds));
		assert_eq!(
			serde_json::to_value(EntityKind::Observations).expect("serializes"),
			json!("observations")
		);
	}

	#[test]
	fn find_wire_shape_is_flat() {
		let find = Find {
			meta: EntityMeta {
				local_id: "f1".into(),
				created_at: DateTime::from_timestamp(1_700_000_000, 0).expect("valid"),
				name: "Bukk".into(),
				color: "red".into(),
				mode: "hunt".into(),
			},
			position: Position::new(60.0, 10.0),
			shot_pair_id: UNKNOWN_SHOT_PAIR.into(),
		};

		let value = serde_json::to_value(&find).expect("serializes");
		assert_eq!(value["localId"], "f1");
		assert_eq!(value["lat"], 60.0);
		assert_eq!(value["shotPairId"], "unknown");

		let back: Find = serde_json::from_value(value).expect("deserializes");
		assert_eq!(back, find);
	}

	#[test]
	fn track_defaults_shot_pair_to_unknown() {
		let track: Track = serde_json::from_value(json!({
			"localId": "t1",
			"createdAt": "2024-09-01T10:00:00Z",
		}))
		.expect("deserializes");

		assert!(track.points.is_empty());
		assert_eq!(track.shot_pair_id, UNKNOWN_SHOT_PAIR);
	}

	#[test]
	fn point_roles_accept_both_spellings() {
		let point: ShotPairPoint = serde_json::from_value(json!({
			"localId": "a",
			"createdAt": "2024-09-01T10:00:00Z",
			"category": "origin",
			"lat": 60.0,
			"lng": 10.0,
			"id": 7,
		}))
		.expect("deserializes");

		assert!(point.is_origin());
		assert_eq!(point.remote_id, Some(7));
		assert_eq!(
			serde_json::to_value(&point).expect("serializes")["category"],
			"Skyteplass"
		);
	}

	#[test]
	fn projected_pair_shares_pair_id() {
		let [origin, target] = ShotPairDraft::new(Position::new(60.0, 10.0), 250.0, 45.0)
			.named("Post 1")
			.project();

		assert!(origin.is_origin());
		assert!(target.is_target());
		assert!(origin.pair_key().is_some());
		assert_eq!(origin.pair_local_id, target.pair_local_id);
		assert_ne!(origin.local_id, target.local_id);
		assert!((sb_geo::haversine_distance(origin.position, target.position) - 250.0).abs() < 1e-6);
	}

	#[test]
	fn blank_pair_id_is_no_pair_id() {
		let mut point = ShotPairPoint::new(PointRole::Target, Position::new(1.0, 2.0));
		point.pair_local_id = Some(String::new());
		assert_eq!(point.pair_key(), None);
	}
}
