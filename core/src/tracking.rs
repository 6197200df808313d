//! Turns a stream of position fixes into a [`Track`], dropping fixes that come
//! too soon or move too little to be worth keeping.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use sb_geo::{haversine_distance, Position};
use sb_sync::{EntityMeta, Track, UNKNOWN_SHOT_PAIR};
use tracing::trace;

pub const DEFAULT_MIN_INTERVAL_SECS: i64 = 2;
pub const DEFAULT_MIN_DISTANCE_METERS: f64 = 3.0;

#[derive(Debug)]
pub struct TrackRecorder {
	track: Track,
	last_sample: Option<(DateTime<Utc>, Position)>,
	min_interval: chrono::Duration,
	min_distance_meters: f64,
}

impl TrackRecorder {
	pub fn new(meta: EntityMeta) -> Self {
		Self {
			track: Track {
				meta,
				points: Vec::new(),
				shot_pair_id: UNKNOWN_SHOT_PAIR.to_string(),
			},
			last_sample: None,
			min_interval: chrono::Duration::seconds(DEFAULT_MIN_INTERVAL_SECS),
			min_distance_meters: DEFAULT_MIN_DISTANCE_METERS,
		}
	}

	#[must_use]
	pub fn with_thresholds(mut self, min_interval: chrono::Duration, min_distance_meters: f64) -> Self {
		self.min_interval = min_interval;
		self.min_distance_meters = min_distance_meters;
		self
	}

	#[must_use]
	pub fn for_shot_pair(mut self, pair_local_id: impl Into<String>) -> Self {
		self.track.shot_pair_id = pair_local_id.into();
		self
	}

	/// Offers a fix. Returns whether it was kept.
	pub fn sample(&mut self, position: Position, at: DateTime<Utc>) -> bool {
		if let Some((last_at, last_position)) = self.last_sample {
			if at - last_at < self.min_interval {
				return false;
			}

			let moved = haversine_distance(last_position, position);
			if moved < self.min_distance_meters {
				trace!(moved, "Fix too close to previous one;");
				return false;
			}
		}

		self.last_sample = Some((at, position));
		self.track.points.push(position);

		true
	}

	pub const fn track(&self) -> &Track {
		&self.track
	}

	/// Walked distance so far, in meters.
	pub fn length(&self) -> f64 {
		self.track
			.points
			.iter()
			.tuple_windows()
			.map(|(a, b)| haversine_distance(*a, *b))
			.sum()
	}

	pub fn finish(self) -> Track {
		self.track
	}
}
