//! Spherical geodesy used to place shot targets and measure distances in the field.
//!
//! Everything here works on a sphere of radius [`EARTH_RADIUS_METERS`]. At the
//! sub-kilometer ranges this is used for the error against an ellipsoidal model
//! stays well below GPS noise, so the simpler model is an accepted approximation.

use serde::{Deserialize, Serialize};

/// Mean earth radius shared by every function in this crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A point on the map, with an optional compass heading in degrees.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Position {
	pub lat: f64,
	pub lng: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub heading: Option<f64>,
}

impl Position {
	pub const fn new(lat: f64, lng: f64) -> Self {
		Self {
			lat,
			lng,
			heading: None,
		}
	}

	#[must_use]
	pub const fn with_heading(mut self, heading: f64) -> Self {
		self.heading = Some(heading);
		self
	}

	/// `lat,lng` with 6 decimals, roughly 0.1 m of precision.
	pub fn fixed6(&self) -> String {
		format!("{:.6},{:.6}", self.lat, self.lng)
	}
}

/// Solves the direct geodesic problem: where do we end up walking `distance_meters`
/// from `origin` along compass bearing `bearing_degrees` (0 = north, 90 = east)?
///
/// The returned position keeps the origin's heading.
pub fn destination_point(origin: Position, distance_meters: f64, bearing_degrees: f64) -> Position {
	if distance_meters == 0.0 {
		return origin;
	}

	let angular = distance_meters / EARTH_RADIUS_METERS;
	let theta = bearing_degrees.to_radians();
	let phi1 = origin.lat.to_radians();
	let lambda1 = origin.lng.to_radians();

	let phi2 = (phi1.sin() * angular.cos() + phi1.cos() * angular.sin() * theta.cos()).asin();
	let lambda2 = lambda1
		+ (theta.sin() * angular.sin() * phi1.cos()).atan2(angular.cos() - phi1.sin() * phi2.sin());

	Position {
		lat: phi2.to_degrees(),
		lng: lambda2.to_degrees(),
		heading: origin.heading,
	}
}

/// Great-circle distance in meters between two positions (haversine formula).
pub fn haversine_distance(a: Position, b: Position) -> f64 {
	let phi1 = a.lat.to_radians();
	let phi2 = b.lat.to_radians();
	let d_phi = (b.lat - a.lat).to_radians();
	let d_lambda = (b.lng - a.lng).to_radians();

	let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);

	2.0 * EARTH_RADIUS_METERS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Initial compass bearing in degrees `[0, 360)` from `a` towards `b`.
pub fn initial_bearing(a: Position, b: Position) -> f64 {
	let phi1 = a.lat.to_radians();
	let phi2 = b.lat.to_radians();
	let d_lambda = (b.lng - a.lng).to_radians();

	let y = d_lambda.sin() * phi2.cos();
	let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

	normalize_heading(y.atan2(x).to_degrees())
}

/// Maps any heading onto `[0, 360)`.
pub fn normalize_heading(degrees: f64) -> f64 {
	let normalized = degrees.rem_euclid(360.0);
	// rem_euclid can round up to exactly 360 for tiny negative inputs
	if normalized >= 360.0 {
		0.0
	} else {
		normalized
	}
}

/// Maps any heading onto `(-180, 180]`, the signed form some sensors report.
pub fn signed_heading(degrees: f64) -> f64 {
	let normalized = normalize_heading(degrees);
	if normalized > 180.0 {
		normalized - 360.0
	} else {
		normalized
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn assert_close(actual: f64, expected: f64, tolerance: f64) {
		assert!(
			(actual - expected).abs() <= tolerance,
			"expected {expected} ± {tolerance}, got {actual}"
		);
	}

	#[test]
	fn eastward_kilometer_at_sixty_north() {
		let origin = Position::new(60.0, 10.0);
		let dest = destination_point(origin, 1000.0, 90.0);

		let expected_dlng = 1000.0 / (111_320.0 * 60f64.to_radians().cos());
		assert_close(dest.lng - origin.lng, expected_dlng, 1e-4);
		assert_close(dest.lat, origin.lat, 1e-3);
	}

	#[test]
	fn zero_distance_returns_origin() {
		let origin = Position::new(59.91, 10.75).with_heading(42.0);
		assert_eq!(destination_point(origin, 0.0, 123.0), origin);
	}

	#[test]
	fn round_trip_distance_matches() {
		let origins = [
			Position::new(60.0, 10.0),
			Position::new(-33.9, 151.2),
			Position::new(0.0, 0.0),
			Position::new(69.65, 18.96),
			Position::new(40.7, -74.0),
		];
		let distances = [1.0, 57.3, 350.0, 1000.0, 12_500.0];

		for origin in origins {
			for bearing in (0..360).step_by(15) {
				for distance in distances {
					let dest = destination_point(origin, distance, f64::from(bearing));
					let measured = haversine_distance(origin, dest);
					assert_close(measured, distance, distance * 1e-6);
				}
			}
		}
	}

	#[test]
	fn distance_is_symmetric() {
		let a = Position::new(60.1, 10.2);
		let b = Position::new(60.3, 11.4);

		assert_eq!(haversine_distance(a, b), haversine_distance(b, a));
		assert_eq!(haversine_distance(a, a), 0.0);
	}

	#[test]
	fn bearing_points_back_at_destination() {
		let origin = Position::new(61.0, 9.0);
		let dest = destination_point(origin, 800.0, 215.0);

		assert_close(initial_bearing(origin, dest), 215.0, 1e-6);
	}

	#[test]
	fn heading_normalization() {
		assert_close(normalize_heading(-90.0), 270.0, 1e-12);
		assert_close(normalize_heading(720.5), 0.5, 1e-12);
		assert_close(signed_heading(270.0), -90.0, 1e-12);
		assert_close(signed_heading(180.0), 180.0, 1e-12);
		assert_close(signed_heading(-180.0), 180.0, 1e-12);
	}

	#[test]
	fn heading_is_omitted_when_absent() {
		let json = serde_json::to_string(&Position::new(1.5, 2.5)).expect("serializes");
		assert_eq!(json, r#"{"lat":1.5,"lng":2.5}"#);
	}
}
