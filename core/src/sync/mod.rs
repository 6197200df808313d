mod auto;
mod engine;

use std::{collections::BTreeMap, fmt::Write};

use sb_sync::EntityKind;
use serde::Serialize;

pub use auto::spawn_auto_sync;
pub use engine::SyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
	/// User asked for it, a summary is produced.
	Manual,
	/// Triggered after a local change, silent.
	Auto,
}

/// Where a sync cycle is. Observable through [`SyncEngine::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
	#[default]
	Idle,
	Pushing,
	Pulling,
	Reconciling,
	/// The last cycle could not pull any collection. Local data was left as it
	/// was. Like `Idle`, the engine is at rest and the next sync may start; the
	/// state is kept until then so observers get to see it.
	Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
	/// No team is active, so there is no remote state to sync against.
	NoScope,
	/// Another sync was already running; this request was dropped.
	AlreadyRunning,
}

/// Per-kind counts plus every error met along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
	pub pushed: BTreeMap<EntityKind, usize>,
	pub pulled: BTreeMap<EntityKind, usize>,
	pub errors: Vec<String>,
}

impl SyncResult {
	pub fn total_pushed(&self) -> usize {
		self.pushed.values().sum()
	}

	pub fn total_pulled(&self) -> usize {
		self.pulled.values().sum()
	}

	/// Human readable one-liner, e.g.
	/// `pushed 2 (finds 2), pulled 5 (tracks 1, finds 4), 1 error`.
	pub fn summary(&self) -> String {
		fn counts(out: &mut String, verb: &str, total: usize, per_kind: &BTreeMap<EntityKind, usize>) {
			let _ = write!(out, "{verb} {total}");
			let parts = per_kind
				.iter()
				.filter(|(_, n)| **n > 0)
				.map(|(kind, n)| format!("{} {n}", kind.as_ref().replace('_', " ")))
				.collect::<Vec<_>>();
			if !parts.is_empty() {
				let _ = write!(out, " ({})", parts.join(", "));
			}
		}

		let mut out = String::new();
		counts(&mut out, "pushed", self.total_pushed(), &self.pushed);
		out.push_str(", ");
		counts(&mut out, "pulled", self.total_pulled(), &self.pulled);

		let errors = self.errors.len();
		let _ = write!(out, ", {errors} error{}", if errors == 1 { "" } else { "s" });

		out
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
	pub result: SyncResult,
	/// Only filled for manual syncs.
	pub summary: Option<String>,
	pub skipped: Option<SkipReason>,
}

impl SyncReport {
	pub(crate) fn skipped(reason: SkipReason) -> Self {
		Self {
			result: SyncResult::default(),
			summary: None,
			skipped: Some(reason),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn summary_lists_non_zero_kinds() {
		let result = SyncResult {
			pushed: BTreeMap::from([(EntityKind::Tracks, 0), (EntityKind::Finds, 2)]),
			pulled: BTreeMap::from([
				(EntityKind::Tracks, 1),
				(EntityKind::ShotPairPoints, 4),
			]),
			errors: vec!["observations: timed out".to_string()],
		};

		assert_eq!(
			result.summary(),
			"pushed 2 (finds 2), pulled 5 (tracks 1, shot pair points 4), 1 error"
		);
	}

	#[test]
	fn empty_result_shape() {
		assert_eq!(
			serde_json::to_value(SyncResult::default()).expect("serializes"),
			json!({ "pushed": {}, "pulled": {}, "errors": [] })
		);
	}
}
