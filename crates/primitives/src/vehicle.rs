use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{GeoPoint, Timestamp, ValidationError};

/// Stable opaque vehicle identifier.
///
/// Ordered so projections can sort by id independently of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for VehicleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for VehicleId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for VehicleId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Reported passenger load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrowdLevel {
	#[default]
	#[serde(alias = "Low", alias = "LOW")]
	Low,
	#[serde(alias = "Medium", alias = "MEDIUM")]
	Medium,
	#[serde(alias = "High", alias = "HIGH")]
	High,
}

impl CrowdLevel {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Low => "low",
			Self::Medium => "medium",
			Self::High => "high",
		}
	}
}

/// One tracked vehicle at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
	pub id: VehicleId,
	pub route_label: String,
	pub position: GeoPoint,
	pub crowd_level: CrowdLevel,
	pub last_stop_label: String,
	pub active: bool,
	pub updated_at: Timestamp,
}

impl VehicleSnapshot {
	/// Materializes a new snapshot from a patch, applying insert defaults.
	///
	/// Fails on the first missing required field.
	pub fn from_patch(id: VehicleId, patch: &VehiclePatch, updated_at: Timestamp) -> Result<Self, ValidationError> {
		let route_label = patch.route_label.clone().ok_or(ValidationError::MissingField { field: "route_label" })?;
		let position = patch.position.ok_or(ValidationError::MissingField { field: "position" })?;
		Ok(Self {
			id,
			route_label,
			position,
			crowd_level: patch.crowd_level.unwrap_or_default(),
			last_stop_label: patch.last_stop_label.clone().unwrap_or_default(),
			active: patch.active.unwrap_or(true),
			updated_at,
		})
	}

	/// Returns a copy with every field present in `patch` overriding this snapshot.
	///
	/// The id is never touched.
	pub fn merged(&self, patch: &VehiclePatch, updated_at: Timestamp) -> Self {
		Self {
			id: self.id.clone(),
			route_label: patch.route_label.clone().unwrap_or_else(|| self.route_label.clone()),
			position: patch.position.unwrap_or(self.position),
			crowd_level: patch.crowd_level.unwrap_or(self.crowd_level),
			last_stop_label: patch.last_stop_label.clone().unwrap_or_else(|| self.last_stop_label.clone()),
			active: patch.active.unwrap_or(self.active),
			updated_at,
		}
	}
}

/// Partial vehicle fields carried by insert and update events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehiclePatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub route_label: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub position: Option<GeoPoint>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub crowd_level: Option<CrowdLevel>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_stop_label: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub active: Option<bool>,
}

impl VehiclePatch {
	/// Patch that only moves the vehicle.
	pub fn position(position: GeoPoint) -> Self {
		Self {
			position: Some(position),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_route(mut self, route: impl Into<String>) -> Self {
		self.route_label = Some(route.into());
		self
	}

	#[must_use]
	pub fn with_crowd(mut self, crowd: CrowdLevel) -> Self {
		self.crowd_level = Some(crowd);
		self
	}

	#[must_use]
	pub fn with_last_stop(mut self, stop: impl Into<String>) -> Self {
		self.last_stop_label = Some(stop.into());
		self
	}

	#[must_use]
	pub fn with_active(mut self, active: bool) -> Self {
		self.active = Some(active);
		self
	}
}

impl From<&VehicleSnapshot> for VehiclePatch {
	fn from(snapshot: &VehicleSnapshot) -> Self {
		Self {
			route_label: Some(snapshot.route_label.clone()),
			position: Some(snapshot.position),
			crowd_level: Some(snapshot.crowd_level),
			last_stop_label: Some(snapshot.last_stop_label.clone()),
			active: Some(snapshot.active),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn point(lat: f64, lng: f64) -> GeoPoint {
		GeoPoint::new(lat, lng).unwrap()
	}

	#[test]
	fn from_patch_applies_defaults() {
		let patch = VehiclePatch::position(point(12.87, 74.84)).with_route("15");
		let snap = VehicleSnapshot::from_patch("b1".into(), &patch, Timestamp::from_millis(1)).unwrap();
		assert_eq!(snap.crowd_level, CrowdLevel::Low);
		assert!(snap.active);
		assert_eq!(snap.last_stop_label, "");
	}

	#[test]
	fn from_patch_reports_missing_field() {
		let patch = VehiclePatch::default().with_route("15");
		assert_eq!(
			VehicleSnapshot::from_patch("b1".into(), &patch, Timestamp::EPOCH),
			Err(ValidationError::MissingField { field: "position" })
		);
	}

	#[test]
	fn merged_keeps_unpatched_fields() {
		let base = VehicleSnapshot::from_patch(
			"b1".into(),
			&VehiclePatch::position(point(1.0, 1.0)).with_route("15").with_crowd(CrowdLevel::High),
			Timestamp::from_millis(1),
		)
		.unwrap();
		let next = base.merged(&VehiclePatch::position(point(2.0, 2.0)), Timestamp::from_millis(2));
		assert_eq!(next.id, base.id);
		assert_eq!(next.route_label, "15");
		assert_eq!(next.crowd_level, CrowdLevel::High);
		assert_eq!(next.position, point(2.0, 2.0));
		assert_eq!(next.updated_at, Timestamp::from_millis(2));
	}

	#[test]
	fn crowd_level_accepts_mixed_case() {
		let level: CrowdLevel = serde_json::from_str(r#""High""#).unwrap();
		assert_eq!(level, CrowdLevel::High);
		let level: CrowdLevel = serde_json::from_str(r#""medium""#).unwrap();
		assert_eq!(level, CrowdLevel::Medium);
	}
}
