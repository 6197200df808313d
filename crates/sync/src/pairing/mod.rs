//! Reassembles shot pairs from the flat list of persisted shot pair points.
//!
//! Points sharing a pair id are grouped first. Whatever is left is matched by a
//! ranked list of [`PairMatcher`]s, then duplicates and tombstoned pairs are dropped.
//! Output order is explicit groups (in order of first appearance), then derived
//! pairs (by origin creation time), then leftovers: unmatched origins followed by
//! unmatched targets, each oldest first.

mod matcher;

use std::collections::HashMap;

use itertools::Itertools;
use tracing::{debug, trace};

use crate::{ShotPair, ShotPairPoint, TombstoneRegistry};

pub use matcher::{
	FollowingTargetMatcher, Match, NameMatcher, PairMatcher, ProximityMatcher, TimeWindowMatcher,
};

#[derive(Debug)]
pub struct PairingResolver {
	matchers: Vec<Box<dyn PairMatcher>>,
}

impl Default for PairingResolver {
	fn default() -> Self {
		Self::with_matchers(vec![Box::new(FollowingTargetMatcher)])
	}
}

impl PairingResolver {
	pub fn with_matchers(matchers: Vec<Box<dyn PairMatcher>>) -> Self {
		Self { matchers }
	}

	/// Resolver for data created before pair ids existed: name, then distance,
	/// then the legacy time window, then plain creation order.
	pub fn legacy(window: chrono::Duration) -> Self {
		Self::with_matchers(vec![
			Box::new(NameMatcher),
			Box::new(ProximityMatcher::default()),
			Box::new(TimeWindowMatcher::new(window)),
			Box::new(FollowingTargetMatcher),
		])
	}

	pub fn resolve(&self, points: &[ShotPairPoint], tombstones: &TombstoneRegistry) -> Vec<ShotPair> {
		let (mut pairs, origins, targets) = group_explicit(points);
		let explicit = pairs.len();

		pairs.extend(self.match_remaining(origins, targets));

		let derived = pairs.len() - explicit;
		let pairs = pairs
			.into_iter()
			.unique_by(ShotPair::dedup_key)
			.filter(|pair| !tombstones.is_tombstoned(pair))
			.collect::<Vec<_>>();

		debug!(
			points = points.len(),
			explicit,
			derived,
			resolved = pairs.len(),
			"Resolved shot pairs;"
		);

		pairs
	}

	fn match_remaining(
		&self,
		mut origins: Vec<&ShotPairPoint>,
		mut targets: Vec<&ShotPairPoint>,
	) -> Vec<ShotPair> {
		origins.sort_by_key(|p| p.created_at);
		targets.sort_by_key(|p| p.created_at);

		let mut pairs = Vec::with_capacity(origins.len() + targets.len());
		let mut lone_origins = Vec::new();

		for origin in origins {
			let found = self.matchers.iter().find_map(|matcher| {
				matcher
					.try_match(origin, &targets)
					.filter(|m| m.index < targets.len())
					.map(|m| (matcher.name(), m))
			});

			match found {
				Some((matcher, Match { index, ambiguous })) => {
					let target = targets.remove(index);
					trace!(
						origin = %origin.local_id,
						target = %target.local_id,
						matcher,
						ambiguous,
						"Derived shot pair;"
					);
					pairs.push(ShotPair::derived(
						Some(origin.clone()),
						Some(target.clone()),
						ambiguous,
					));
				}
				None => lone_origins.push(ShotPair::derived(Some(origin.clone()), None, false)),
			}
		}

		pairs.extend(lone_origins);

		pairs.extend(
			targets
				.into_iter()
				.map(|target| ShotPair::derived(None, Some(target.clone()), false)),
		);

		pairs
	}
}

/// Splits points into pairs linked by pair id, and loose origins and targets.
fn group_explicit(
	points: &[ShotPairPoint],
) -> (Vec<ShotPair>, Vec<&ShotPairPoint>, Vec<&ShotPairPoint>) {
	let mut groups: Vec<ShotPair> = Vec::new();
	let mut group_index = HashMap::<&str, usize>::new();
	let mut origins = Vec::new();
	let mut targets = Vec::new();

	for point in points {
		let Some(pair_id) = point.pair_key() else {
			if point.is_origin() {
				origins.push(point);
			} else {
				targets.push(point);
			}
			continue;
		};

		let index = *group_index.entry(pair_id).or_insert_with(|| {
			groups.push(ShotPair::linked(pair_id.to_string(), None, None));
			groups.len() - 1
		});

		let group = &mut groups[index];
		let slot = if point.is_origin() {
			&mut group.origin
		} else {
			&mut group.target
		};

		if slot.is_some() {
			debug!(
				%pair_id,
				local_id = %point.local_id,
				"Ignoring extra point for an already filled pair slot;"
			);
		} else {
			*slot = Some(point.clone());
		}
	}

	(groups, origins, targets)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{PointRole, Position};
	use chrono::{DateTime, Duration, Utc};
	use pretty_assertions::assert_eq;

	fn at(minute: i64) -> DateTime<Utc> {
		DateTime::from_timestamp(1_725_000_000, 0).expect("valid") + Duration::minutes(minute)
	}

	fn point(id: &str, role: PointRole, lat: f64, lng: f64, minute: i64) -> ShotPairPoint {
		ShotPairPoint {
			local_id: id.to_string(),
			created_at: at(minute),
			category: role,
			position: Position::new(lat, lng),
			remote_id: None,
			pair_local_id: None,
			name: None,
			color: String::new(),
			mode: String::new(),
		}
	}

	fn linked(id: &str, pair: &str, role: PointRole, lat: f64, lng: f64) -> ShotPairPoint {
		ShotPairPoint {
			pair_local_id: Some(pair.to_string()),
			..point(id, role, lat, lng, 0)
		}
	}

	fn ids(pairs: &[ShotPair]) -> Vec<(Option<&str>, Option<&str>)> {
		pairs
			.iter()
			.map(|p| {
				(
					p.origin.as_ref().map(|o| o.local_id.as_str()),
					p.target.as_ref().map(|t| t.local_id.as_str()),
				)
			})
			.collect()
	}

	#[test]
	fn shared_pair_id_links_origin_and_target() {
		let points = vec![
			linked("a", "p1", PointRole::Origin, 60.0, 10.0),
			linked("b", "p1", PointRole::Target, 60.0, 11.0),
		];

		let pairs = PairingResolver::default().resolve(&points, &TombstoneRegistry::default());

		assert_eq!(pairs.len(), 1);
		assert!(pairs[0].linked);
		assert_eq!(pairs[0].current(), Some(Position::new(60.0, 10.0)));
		assert_eq!(pairs[0].target_position(), Some(Position::new(60.0, 11.0)));
	}

	#[test]
	fn half_filled_group_is_partial() {
		let points = vec![linked("b", "p9", PointRole::Target, 60.0, 11.0)];

		let pairs = PairingResolver::default().resolve(&points, &TombstoneRegistry::default());

		assert_eq!(ids(&pairs), vec![(None, Some("b"))]);
		assert!(pairs[0].linked);
	}

	#[test]
	fn loose_points_pair_with_following_target() {
		let points = vec![
			point("t2", PointRole::Target, 60.2, 10.2, 6),
			point("o1", PointRole::Origin, 60.0, 10.0, 0),
			point("t1", PointRole::Target, 60.1, 10.1, 1),
			point("o2", PointRole::Origin, 60.0, 10.5, 5),
		];

		let pairs = PairingResolver::default().resolve(&points, &TombstoneRegistry::default());

		assert_eq!(ids(&pairs), vec![(Some("o1"), Some("t1")), (Some("o2"), Some("t2"))]);
		assert!(pairs.iter().all(|p| !p.linked));
	}

	#[test]
	fn earlier_origin_wins_contested_target() {
		let points = vec![
			point("o1", PointRole::Origin, 60.0, 10.0, 0),
			point("o2", PointRole::Origin, 60.0, 10.1, 1),
			point("t1", PointRole::Target, 60.1, 10.0, 2),
		];

		let pairs = PairingResolver::default().resolve(&points, &TombstoneRegistry::default());

		assert_eq!(ids(&pairs), vec![(Some("o1"), Some("t1")), (Some("o2"), None)]);
	}

	#[test]
	fn unmatched_origins_follow_derived_pairs() {
		let named = |id: &str, role, lat, minute, name: &str| ShotPairPoint {
			name: Some(name.to_string()),
			..point(id, role, lat, 10.0, minute)
		};
		let points = vec![
			named("o1", PointRole::Origin, 60.0, 0, "Post 1"),
			named("t1", PointRole::Target, 60.1, 1, "Post 1"),
			named("o2", PointRole::Origin, 61.0, 10, "Post 2"),
			named("o3", PointRole::Origin, 62.0, 20, "Post 3"),
			named("t3", PointRole::Target, 62.1, 21, "Post 3"),
			named("t9", PointRole::Target, 63.0, 30, "Post 9"),
		];

		let pairs = PairingResolver::with_matchers(vec![Box::new(NameMatcher)])
			.resolve(&points, &TombstoneRegistry::default());

		assert_eq!(
			ids(&pairs),
			vec![
				(Some("o1"), Some("t1")),
				(Some("o3"), Some("t3")),
				(Some("o2"), None),
				(None, Some("t9")),
			]
		);
	}

	#[test]
	fn target_before_every_origin_is_left_over() {
		let points = vec![
			point("t0", PointRole::Target, 60.1, 10.0, 0),
			point("o1", PointRole::Origin, 60.0, 10.0, 3),
		];

		let pairs = PairingResolver::default().resolve(&points, &TombstoneRegistry::default());

		assert_eq!(ids(&pairs), vec![(Some("o1"), None), (None, Some("t0"))]);
	}

	#[test]
	fn explicit_groups_come_first() {
		let points = vec![
			point("o1", PointRole::Origin, 59.0, 10.0, 0),
			linked("a", "p1", PointRole::Origin, 60.0, 10.0),
			point("t1", PointRole::Target, 59.1, 10.0, 1),
			linked("b", "p1", PointRole::Target, 60.0, 11.0),
		];

		let pairs = PairingResolver::default().resolve(&points, &TombstoneRegistry::default());

		assert_eq!(ids(&pairs), vec![(Some("a"), Some("b")), (Some("o1"), Some("t1"))]);
	}

	#[test]
	fn repeated_points_are_deduplicated() {
		let mut first = point("o1", PointRole::Origin, 60.0, 10.0, 0);
		first.remote_id = Some(3);
		let mut again = first.clone();
		again.local_id = "o1-copy".to_string();

		let pairs =
			PairingResolver::default().resolve(&[first, again], &TombstoneRegistry::default());

		assert_eq!(pairs.len(), 1);
	}

	#[test]
	fn resolving_twice_gives_the_same_pairs() {
		let points = vec![
			linked("a", "p1", PointRole::Origin, 60.0, 10.0),
			point("o1", PointRole::Origin, 59.0, 10.0, 0),
			point("o2", PointRole::Origin, 59.0, 10.3, 2),
			point("t1", PointRole::Target, 59.1, 10.0, 3),
			linked("b", "p1", PointRole::Target, 60.0, 11.0),
		];
		let resolver = PairingResolver::default();
		let tombstones = TombstoneRegistry::default();

		assert_eq!(
			resolver.resolve(&points, &tombstones),
			resolver.resolve(&points, &tombstones)
		);
	}

	#[test]
	fn tombstoned_pair_id_is_dropped() {
		let points = vec![
			linked("a", "p1", PointRole::Origin, 60.0, 10.0),
			linked("b", "p1", PointRole::Target, 60.0, 11.0),
		];
		let mut tombstones = TombstoneRegistry::default();
		tombstones
			.record_deletion(Some("p1"), None, None)
			.expect("has identifier");

		assert!(PairingResolver::default().resolve(&points, &tombstones).is_empty());
	}

	#[test]
	fn signature_catches_same_coordinates_under_new_ids() {
		let mut origin = point("o1", PointRole::Origin, 60.0, 10.0, 0);
		origin.remote_id = Some(1);
		let target = point("t1", PointRole::Target, 60.0, 11.0, 1);

		let resolver = PairingResolver::default();
		let mut tombstones = TombstoneRegistry::default();
		let deleted = resolver.resolve(&[origin, target], &tombstones).remove(0);
		tombstones.record_entity(&deleted).expect("has identifiers");

		// the server hands the same spots back under new ids, with the roles swapped
		let mut reborn_origin = point("x", PointRole::Origin, 60.0, 11.0, 10);
		reborn_origin.remote_id = Some(99);
		let reborn_target = point("y", PointRole::Target, 60.0, 10.0, 11);

		assert!(resolver
			.resolve(&[reborn_origin, reborn_target], &tombstones)
			.is_empty());
	}

	#[test]
	fn time_window_flags_ambiguous_matches() {
		let points = vec![
			point("o1", PointRole::Origin, 60.0, 10.0, 0),
			point("t1", PointRole::Target, 60.1, 10.0, 1),
			point("t2", PointRole::Target, 60.2, 10.0, 2),
			point("o2", PointRole::Origin, 61.0, 10.0, 30),
			point("t3", PointRole::Target, 61.1, 10.0, 32),
		];

		let pairs = PairingResolver::with_matchers(vec![Box::new(TimeWindowMatcher::default())])
			.resolve(&points, &TombstoneRegistry::default());

		assert_eq!(
			ids(&pairs),
			vec![
				(Some("o1"), Some("t1")),
				(Some("o2"), Some("t3")),
				(None, Some("t2"))
			]
		);
		assert!(pairs[0].ambiguous);
		assert!(!pairs[1].ambiguous);
	}

	#[test]
	fn legacy_chain_prefers_names() {
		let mut o1 = point("o1", PointRole::Origin, 60.0, 10.0, 0);
		o1.name = Some("Post 2".to_string());
		let t_other = point("t1", PointRole::Target, 60.1, 10.0, 1);
		let mut t_named = point("t2", PointRole::Target, 60.2, 10.0, 2);
		t_named.name = Some("Post 2".to_string());

		let pairs = PairingResolver::legacy(Duration::minutes(5))
			.resolve(&[o1, t_other, t_named], &TombstoneRegistry::default());

		assert_eq!(ids(&pairs), vec![(Some("o1"), Some("t2")), (None, Some("t1"))]);
	}

	#[test]
	fn proximity_picks_nearest_target_in_range() {
		let points = vec![
			point("o1", PointRole::Origin, 60.0, 10.0, 0),
			point("t_far", PointRole::Target, 60.1, 10.0, 1),
			point("t_near", PointRole::Target, 60.005, 10.0, 3),
		];

		let pairs = PairingResolver::legacy(Duration::minutes(5))
			.resolve(&points, &TombstoneRegistry::default());

		assert_eq!(
			ids(&pairs),
			vec![(Some("o1"), Some("t_near")), (None, Some("t_far"))]
		);
		assert!(!pairs[0].ambiguous);
	}
}
