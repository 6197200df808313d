use std::fmt::Debug;

use chrono::Duration;
use sb_geo::haversine_distance;

use crate::ShotPairPoint;

/// A target chosen for an origin by a [`PairMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
	/// Index into the candidate slice the matcher was given.
	pub index: usize,
	/// More than one candidate qualified equally well.
	pub ambiguous: bool,
}

impl Match {
	pub const fn exact(index: usize) -> Self {
		Self {
			index,
			ambiguous: false,
		}
	}
}

/// One strategy for associating an origin with a target when no explicit pair
/// id links them. The resolver asks its matchers in order and takes the first answer.
pub trait PairMatcher: Debug + Send + Sync {
	fn name(&self) -> &'static str;

	/// `candidates` holds the targets not consumed yet, oldest first.
	fn try_match(&self, origin: &ShotPairPoint, candidates: &[&ShotPairPoint]) -> Option<Match>;
}

/// Pairs an origin with the earliest target created strictly after it.
#[derive(Debug, Default, Clone, Copy)]
pub struct FollowingTargetMatcher;

impl PairMatcher for FollowingTargetMatcher {
	fn name(&self) -> &'static str {
		"following_target"
	}

	fn try_match(&self, origin: &ShotPairPoint, candidates: &[&ShotPairPoint]) -> Option<Match> {
		candidates
			.iter()
			.position(|t| t.created_at > origin.created_at)
			.map(Match::exact)
	}
}

/// Pairs points carrying the same display name, e.g. both ends of "Post 3".
#[derive(Debug, Default, Clone, Copy)]
pub struct NameMatcher;

impl PairMatcher for NameMatcher {
	fn name(&self) -> &'static str {
		"name"
	}

	fn try_match(&self, origin: &ShotPairPoint, candidates: &[&ShotPairPoint]) -> Option<Match> {
		let name = sb_utils::non_blank(origin.name.as_deref())?;
		let mut same_name = candidates
			.iter()
			.enumerate()
			.filter(|(_, t)| sb_utils::non_blank(t.name.as_deref()) == Some(name))
			.map(|(i, _)| i);

		let index = same_name.next()?;
		Some(Match {
			index,
			ambiguous: same_name.next().is_some(),
		})
	}
}

/// Pairs an origin with the nearest later target within shooting range. Flagged
/// when more than one target is in range.
#[derive(Debug, Clone, Copy)]
pub struct ProximityMatcher {
	pub max_range_meters: f64,
}

impl ProximityMatcher {
	pub const DEFAULT_MAX_RANGE_METERS: f64 = 1500.0;

	pub const fn new(max_range_meters: f64) -> Self {
		Self { max_range_meters }
	}
}

impl Default for ProximityMatcher {
	fn default() -> Self {
		Self::new(Self::DEFAULT_MAX_RANGE_METERS)
	}
}

impl PairMatcher for ProximityMatcher {
	fn name(&self) -> &'static str {
		"proximity"
	}

	fn try_match(&self, origin: &ShotPairPoint, candidates: &[&ShotPairPoint]) -> Option<Match> {
		let in_range = candidates
			.iter()
			.enumerate()
			.filter(|(_, t)| t.created_at > origin.created_at)
			.map(|(i, t)| (i, haversine_distance(origin.position, t.position)))
			.filter(|(_, d)| *d <= self.max_range_meters)
			.collect::<Vec<_>>();

		let (index, _) = in_range
			.iter()
			.copied()
			.min_by(|(_, a), (_, b)| a.total_cmp(b))?;

		Some(Match {
			index,
			ambiguous: in_range.len() > 1,
		})
	}
}

/// Legacy association for records older than explicit pair ids: the first target
/// created within `window` after the origin. Flags the match when more than one
/// target falls inside the window, since quick successive pairs can't be told apart.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowMatcher {
	pub window: Duration,
}

impl TimeWindowMatcher {
	pub const LEGACY_WINDOW_SECS: i64 = 5 * 60;

	pub const fn new(window: Duration) -> Self {
		Self { window }
	}
}

impl Default for TimeWindowMatcher {
	fn default() -> Self {
		Self::new(Duration::seconds(Self::LEGACY_WINDOW_SECS))
	}
}

impl PairMatcher for TimeWindowMatcher {
	fn name(&self) -> &'static str {
		"time_window"
	}

	fn try_match(&self, origin: &ShotPairPoint, candidates: &[&ShotPairPoint]) -> Option<Match> {
		let deadline = origin.created_at + self.window;
		let mut in_window = candidates
			.iter()
			.enumerate()
			.filter(|(_, t)| t.created_at > origin.created_at && t.created_at <= deadline)
			.map(|(i, _)| i);

		let index = in_window.next()?;
		Some(Match {
			index,
			ambiguous: in_window.next().is_some(),
		})
	}
}
