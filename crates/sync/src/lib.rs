#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::dbg_macro,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Local-first data model for field data: tracks, finds, observations and the
//! points that make up shot pairs, plus the logic that turns a flat list of
//! shot pair points back into pairs and keeps deleted ones from coming back.

mod entity;
mod pair;
pub mod pairing;
mod tombstone;

pub use entity::*;
pub use pair::ShotPair;
pub use pairing::{PairingResolver, PairMatcher};
pub use tombstone::{coordinate_signature, TombstoneKeys, TombstoneRegistry, Tombstoned};

pub use sb_geo::Position;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
	#[error("a deletion must be recorded with at least one identifier")]
	EmptyTombstone,
}
