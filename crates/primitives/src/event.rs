use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Timestamp, VehicleId, VehiclePatch};

/// Change notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
	Insert,
	Update,
	Delete,
}

impl EventKind {
	/// Tie-break priority for events carrying equal timestamps.
	///
	/// Delete outranks Update outranks Insert so a same-instant re-insert can
	/// never resurrect a deliberately removed vehicle.
	pub const fn priority(self) -> u8 {
		match self {
			Self::Insert => 0,
			Self::Update => 1,
			Self::Delete => 2,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Insert => "insert",
			Self::Update => "update",
			Self::Delete => "delete",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One inbound or outbound change for a single vehicle.
///
/// `payload` is required for inserts and updates and ignored for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub kind: EventKind,
	pub id: VehicleId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<VehiclePatch>,
	pub timestamp: Timestamp,
}

impl ChangeEvent {
	pub fn insert(id: impl Into<VehicleId>, payload: VehiclePatch, timestamp: Timestamp) -> Self {
		Self {
			kind: EventKind::Insert,
			id: id.into(),
			payload: Some(payload),
			timestamp,
		}
	}

	pub fn update(id: impl Into<VehicleId>, payload: VehiclePatch, timestamp: Timestamp) -> Self {
		Self {
			kind: EventKind::Update,
			id: id.into(),
			payload: Some(payload),
			timestamp,
		}
	}

	pub fn delete(id: impl Into<VehicleId>, timestamp: Timestamp) -> Self {
		Self {
			kind: EventKind::Delete,
			id: id.into(),
			payload: None,
			timestamp,
		}
	}

	/// Version key compared by last-writer-wins resolution.
	pub fn version(&self) -> (Timestamp, u8) {
		(self.timestamp, self.kind.priority())
	}
}
