use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Mean Earth radius used for great-circle distances.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Validated WGS84 latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPoint")]
pub struct GeoPoint {
	lat: f64,
	lng: f64,
}

#[derive(Deserialize)]
struct RawPoint {
	lat: f64,
	lng: f64,
}

impl TryFrom<RawPoint> for GeoPoint {
	type Error = ValidationError;

	fn try_from(raw: RawPoint) -> Result<Self, Self::Error> {
		Self::new(raw.lat, raw.lng)
	}
}

impl GeoPoint {
	/// Creates a point, rejecting non-finite or out-of-range coordinates.
	pub fn new(lat: f64, lng: f64) -> Result<Self, ValidationError> {
		if !lat.is_finite() || !lng.is_finite() {
			return Err(ValidationError::NonFiniteCoordinate);
		}
		if !(-90.0..=90.0).contains(&lat) {
			return Err(ValidationError::LatitudeOutOfRange(lat));
		}
		if !(-180.0..=180.0).contains(&lng) {
			return Err(ValidationError::LongitudeOutOfRange(lng));
		}
		Ok(Self { lat, lng })
	}

	pub const fn lat(&self) -> f64 {
		self.lat
	}

	pub const fn lng(&self) -> f64 {
		self.lng
	}

	/// Great-circle (haversine) distance in meters.
	pub fn distance_m(&self, other: &GeoPoint) -> f64 {
		let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
		let dlat = lat2 - lat1;
		let dlng = (other.lng - self.lng).to_radians();
		let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
		2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
	}

	/// Linear blend toward `target`; `alpha = 1` returns `target` unchanged.
	///
	/// Longitude moves along the shorter way round, so blending across the
	/// antimeridian stays near it. Only meaningful for the short hops between
	/// consecutive device samples.
	pub fn blend(&self, target: &GeoPoint, alpha: f64) -> GeoPoint {
		let alpha = alpha.clamp(0.0, 1.0);
		if alpha == 1.0 {
			return *target;
		}
		GeoPoint {
			lat: self.lat + (target.lat - self.lat) * alpha,
			lng: wrap_lng(self.lng + wrap_lng(target.lng - self.lng) * alpha),
		}
	}
}

/// Folds a longitude or longitude delta into `[-180, 180]`.
fn wrap_lng(lng: f64) -> f64 {
	if lng > 180.0 {
		lng - 360.0
	} else if lng < -180.0 {
		lng + 360.0
	} else {
		lng
	}
}

/// Axis-aligned latitude/longitude region used by region projections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
	pub south_west: GeoPoint,
	pub north_east: GeoPoint,
}

impl BoundingBox {
	pub fn new(south_west: GeoPoint, north_east: GeoPoint) -> Self {
		Self { south_west, north_east }
	}

	/// Returns true when `point` lies inside the box (edges inclusive).
	///
	/// Boxes whose west edge is east of their east edge wrap the antimeridian.
	pub fn contains(&self, point: &GeoPoint) -> bool {
		let lat_ok = (self.south_west.lat..=self.north_east.lat).contains(&point.lat);
		let (west, east) = (self.south_west.lng, self.north_east.lng);
		let lng_ok = if west <= east {
			(west..=east).contains(&point.lng)
		} else {
			point.lng >= west || point.lng <= east
		};
		lat_ok && lng_ok
	}
}
