//! Realtime message format and its mapping onto [`ChangeEvent`]s.
//!
//! Inbound messages look like
//!
//! ```json
//! {"eventType": "UPDATE", "new": {"id": "b1", "lat": 12.9, "lng": 74.8, "updated_at": "..."}, "old": {"id": "b1"}}
//! ```
//!
//! Row fields are all optional because partial rows are legal: updates may
//! carry only the changed columns, and delete messages usually carry only the
//! primary key in `old`. An empty object counts as absent.

use convoy_primitives::{ChangeEvent, CrowdLevel, EventKind, GeoPoint, Timestamp, ValidationError, VehicleId, VehiclePatch, VehicleSnapshot};
use serde::{Deserialize, Serialize};

/// One row of the fleet table, as sent over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleRow {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<VehicleId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub route: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lat: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lng: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub crowd_level: Option<CrowdLevel>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_stop: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub active: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<Timestamp>,
}

impl VehicleRow {
	/// Row holding only the primary key.
	pub fn key(id: VehicleId) -> Self {
		Self {
			id: Some(id),
			..Self::default()
		}
	}

	/// Full row for a snapshot.
	pub fn from_snapshot(snapshot: &VehicleSnapshot) -> Self {
		Self {
			id: Some(snapshot.id.clone()),
			route: Some(snapshot.route_label.clone()),
			lat: Some(snapshot.position.lat()),
			lng: Some(snapshot.position.lng()),
			crowd_level: Some(snapshot.crowd_level),
			last_stop: Some(snapshot.last_stop_label.clone()),
			active: Some(snapshot.active),
			updated_at: Some(snapshot.updated_at),
		}
	}

	fn is_empty(&self) -> bool {
		*self == Self::default()
	}

	/// Column values present in this row as a patch.
	///
	/// Latitude and longitude must travel together.
	pub fn patch(&self) -> Result<VehiclePatch, ValidationError> {
		let position = match (self.lat, self.lng) {
			(Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)?),
			(None, None) => None,
			(Some(_), None) => return Err(ValidationError::MissingField { field: "lng" }),
			(None, Some(_)) => return Err(ValidationError::MissingField { field: "lat" }),
		};
		Ok(VehiclePatch {
			route_label: self.route.clone(),
			position,
			crowd_level: self.crowd_level,
			last_stop_label: self.last_stop.clone(),
			active: self.active,
		})
	}

	/// Maps a bulk-read row 1:1 onto a snapshot.
	pub fn into_snapshot(self) -> Result<VehicleSnapshot, ValidationError> {
		let patch = self.patch()?;
		let id = self.id.ok_or(ValidationError::MissingId)?;
		let updated_at = self.updated_at.ok_or(ValidationError::MissingTimestamp)?;
		VehicleSnapshot::from_patch(id, &patch, updated_at)
	}
}

/// One realtime change message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
	#[serde(rename = "eventType")]
	pub event_type: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub new: Option<VehicleRow>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub old: Option<VehicleRow>,
	/// Server commit time, used when neither row carries `updated_at`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub commit_timestamp: Option<Timestamp>,
}

impl RawChange {
	/// Decodes one JSON message.
	pub fn from_json(json: &str) -> Result<Self, ValidationError> {
		serde_json::from_str(json).map_err(|err| ValidationError::Malformed(err.to_string()))
	}

	pub fn to_json(&self) -> String {
		// A struct of strings, numbers and options always serializes.
		serde_json::to_string(self).unwrap_or_default()
	}

	/// Encodes a change event carrying only the columns it touched.
	pub fn from_event(event: &ChangeEvent, commit: Timestamp) -> Self {
		let kind_name = event_type(event.kind);
		let new = event.payload.as_ref().map(|patch| VehicleRow {
			id: Some(event.id.clone()),
			route: patch.route_label.clone(),
			lat: patch.position.map(|p| p.lat()),
			lng: patch.position.map(|p| p.lng()),
			crowd_level: patch.crowd_level,
			last_stop: patch.last_stop_label.clone(),
			active: patch.active,
			updated_at: Some(commit),
		});
		let old = (event.kind != EventKind::Insert).then(|| VehicleRow::key(event.id.clone()));
		Self {
			event_type: kind_name.to_owned(),
			new: new.filter(|_| event.kind != EventKind::Delete),
			old,
			commit_timestamp: Some(commit),
		}
	}

	/// Encodes a write the way the server echoes it: the whole stored row in `new`.
	pub fn from_row(kind: EventKind, row: &VehicleSnapshot, commit: Timestamp) -> Self {
		Self {
			event_type: event_type(kind).to_owned(),
			new: (kind != EventKind::Delete).then(|| VehicleRow::from_snapshot(row)),
			old: (kind != EventKind::Insert).then(|| VehicleRow::key(row.id.clone())),
			commit_timestamp: Some(commit),
		}
	}

	/// Maps this message onto a change event.
	///
	/// `new.id` wins over `old.id`; the timestamp comes from `new.updated_at`,
	/// then `old.updated_at`, then the commit timestamp.
	pub fn into_event(self) -> Result<ChangeEvent, ValidationError> {
		let kind = match self.event_type.to_ascii_uppercase().as_str() {
			"INSERT" => EventKind::Insert,
			"UPDATE" => EventKind::Update,
			"DELETE" => EventKind::Delete,
			_ => return Err(ValidationError::UnknownEventType(self.event_type)),
		};
		let new = self.new.filter(|row| !row.is_empty());
		let old = self.old.filter(|row| !row.is_empty());

		let id = new
			.as_ref()
			.and_then(|row| row.id.clone())
			.or_else(|| old.as_ref().and_then(|row| row.id.clone()))
			.ok_or(ValidationError::MissingId)?;
		let timestamp = new
			.as_ref()
			.and_then(|row| row.updated_at)
			.or_else(|| old.as_ref().and_then(|row| row.updated_at))
			.or(self.commit_timestamp)
			.ok_or(ValidationError::MissingTimestamp)?;

		let payload = match kind {
			EventKind::Delete => None,
			_ => Some(new.as_ref().ok_or(ValidationError::MissingPayload { kind })?.patch()?),
		};
		Ok(ChangeEvent { kind, id, payload, timestamp })
	}
}

fn event_type(kind: EventKind) -> &'static str {
	match kind {
		EventKind::Insert => "INSERT",
		EventKind::Update => "UPDATE",
		EventKind::Delete => "DELETE",
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn decodes_update_with_partial_row() {
		let raw = RawChange::from_json(
			r#"{"eventType":"UPDATE","new":{"id":"b1","lat":12.9,"lng":74.83,"updated_at":"1970-01-01T00:00:00.002Z"},"old":{"id":"b1"}}"#,
		)
		.unwrap();
		let event = raw.into_event().unwrap();
		assert_eq!(event.kind, EventKind::Update);
		assert_eq!(event.id, VehicleId::from("b1"));
		assert_eq!(event.timestamp, Timestamp::from_millis(2));
		let payload = event.payload.unwrap();
		assert_eq!(payload.position, Some(GeoPoint::new(12.9, 74.83).unwrap()));
		assert_eq!(payload.route_label, None);
	}

	#[test]
	fn delete_uses_old_id_and_commit_timestamp() {
		let raw = RawChange::from_json(r#"{"eventType":"DELETE","new":{},"old":{"id":"b1"},"commit_timestamp":"1970-01-01T00:00:00.003Z"}"#).unwrap();
		let event = raw.into_event().unwrap();
		assert_eq!(event, ChangeEvent::delete("b1", Timestamp::from_millis(3)));
	}

	#[test]
	fn rejects_unknown_type_missing_id_and_bad_coordinates() {
		let raw = RawChange::from_json(r#"{"eventType":"TRUNCATE","commit_timestamp":"1970-01-01T00:00:00Z"}"#).unwrap();
		assert_eq!(raw.into_event(), Err(ValidationError::UnknownEventType("TRUNCATE".into())));

		let raw = RawChange::from_json(r#"{"eventType":"INSERT","new":{"route":"15"},"commit_timestamp":"1970-01-01T00:00:00Z"}"#).unwrap();
		assert_eq!(raw.into_event(), Err(ValidationError::MissingId));

		let raw = RawChange::from_json(r#"{"eventType":"INSERT","new":{"id":"x","lat":91.0,"lng":0.0,"updated_at":"1970-01-01T00:00:00Z"}}"#).unwrap();
		assert_eq!(raw.into_event(), Err(ValidationError::LatitudeOutOfRange(91.0)));

		let raw = RawChange::from_json(r#"{"eventType":"UPDATE","new":{"id":"x","lat":1.0},"commit_timestamp":"1970-01-01T00:00:00Z"}"#).unwrap();
		assert_eq!(raw.into_event(), Err(ValidationError::MissingField { field: "lng" }));

		assert!(matches!(RawChange::from_json("{not json"), Err(ValidationError::Malformed(_))));
	}

	#[test]
	fn missing_timestamp_is_rejected() {
		let raw = RawChange::from_json(r#"{"eventType":"DELETE","old":{"id":"b1"}}"#).unwrap();
		assert_eq!(raw.into_event(), Err(ValidationError::MissingTimestamp));
	}

	#[test]
	fn server_echo_maps_back_to_the_same_event() {
		let event = ChangeEvent::update("b1", VehiclePatch::position(GeoPoint::new(1.0, 2.0).unwrap()), Timestamp::from_millis(9));
		let echoed = RawChange::from_event(&event, Timestamp::from_millis(9)).into_event().unwrap();
		assert_eq!(echoed, event);

		let delete = ChangeEvent::delete("b1", Timestamp::from_millis(10));
		let raw = RawChange::from_event(&delete, Timestamp::from_millis(10));
		assert_eq!(raw.new, None);
		assert_eq!(raw.into_event().unwrap(), delete);
	}

	#[test]
	fn bulk_row_maps_to_snapshot_with_defaults() {
		let row: VehicleRow = serde_json::from_str(r#"{"id":"b7","route":"7","lat":12.0,"lng":74.0,"updated_at":"1970-01-01T00:00:01Z"}"#).unwrap();
		let snap = row.into_snapshot().unwrap();
		assert_eq!(snap.crowd_level, CrowdLevel::Low);
		assert!(snap.active);
		assert_eq!(snap.updated_at, Timestamp::from_millis(1000));

		let row: VehicleRow = serde_json::from_str(r#"{"id":"b8","lat":12.0,"lng":74.0,"updated_at":"1970-01-01T00:00:01Z"}"#).unwrap();
		assert_eq!(row.into_snapshot(), Err(ValidationError::MissingField { field: "route_label" }));
	}
}
