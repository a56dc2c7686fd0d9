use std::sync::Arc;

use convoy_primitives::{ChangeEvent, EventKind, ValidationError, VehicleSnapshot};

use crate::{FleetStore, Version};

/// Why an otherwise well-formed event left the fleet unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
	/// The stored version is newer.
	Stale,
	/// The stored version has the same timestamp and kind.
	Duplicate,
	/// Delete for a vehicle that is not live. The tombstone is still advanced.
	AlreadyAbsent,
}

/// Result classification for one reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
	Inserted,
	Updated,
	/// Re-inserted after a tombstone.
	Resurrected,
	Deleted,
	Ignored(IgnoreReason),
	Rejected(ValidationError),
}

impl Outcome {
	/// Returns true when the set of live vehicles or any of their fields changed.
	pub fn is_visible(&self) -> bool {
		matches!(self, Self::Inserted | Self::Updated | Self::Resurrected | Self::Deleted)
	}

	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Inserted => "inserted",
			Self::Updated => "updated",
			Self::Resurrected => "resurrected",
			Self::Deleted => "deleted",
			Self::Ignored(IgnoreReason::Stale) => "stale",
			Self::Ignored(IgnoreReason::Duplicate) => "duplicate",
			Self::Ignored(IgnoreReason::AlreadyAbsent) => "already_absent",
			Self::Rejected(_) => "rejected",
		}
	}
}

/// New snapshot plus what happened.
///
/// `store` is the input `Arc` itself whenever nothing changed.
#[derive(Debug, Clone)]
pub struct Reduction {
	pub store: Arc<FleetStore>,
	pub outcome: Outcome,
}

impl Reduction {
	fn unchanged(store: &Arc<FleetStore>, outcome: Outcome) -> Self {
		Self {
			store: Arc::clone(store),
			outcome,
		}
	}
}

/// Folds one change event into `store`.
///
/// Pure: the input snapshot is never modified, and every vehicle other than
/// `event.id` is shared with it. Malformed events come back as
/// [`Outcome::Rejected`] with the input snapshot.
pub fn reduce(store: &Arc<FleetStore>, event: &ChangeEvent) -> Reduction {
	// Coordinates are range-checked when the `GeoPoint` is built, so shape is
	// the only thing left to validate here.
	let payload = match (event.kind, event.payload.as_ref()) {
		(EventKind::Delete, _) => None,
		(kind, None) => return Reduction::unchanged(store, Outcome::Rejected(ValidationError::MissingPayload { kind })),
		(_, Some(payload)) => Some(payload),
	};

	let previous = store.versions.get(&event.id).copied();
	if let Some(previous) = previous {
		let incoming = event.version();
		if incoming < previous.key() {
			return Reduction::unchanged(store, Outcome::Ignored(IgnoreReason::Stale));
		}
		if incoming == previous.key() {
			return Reduction::unchanged(store, Outcome::Ignored(IgnoreReason::Duplicate));
		}
	}

	let version = Version {
		at: event.timestamp,
		kind: event.kind,
	};
	let existing = store.vehicles.get(&event.id);

	let Some(payload) = payload else {
		let mut next = (**store).clone();
		next.versions.insert(event.id.clone(), version);
		let outcome = if next.vehicles.remove(&event.id).is_some() {
			Outcome::Deleted
		} else {
			Outcome::Ignored(IgnoreReason::AlreadyAbsent)
		};
		return Reduction {
			store: Arc::new(next),
			outcome,
		};
	};

	let (snapshot, outcome) = match existing {
		Some(current) => (current.merged(payload, event.timestamp), Outcome::Updated),
		None => match VehicleSnapshot::from_patch(event.id.clone(), payload, event.timestamp) {
			Ok(snapshot) => {
				let outcome = if previous.is_some_and(|v| v.is_tombstone()) {
					Outcome::Resurrected
				} else {
					Outcome::Inserted
				};
				(snapshot, outcome)
			}
			Err(err) => return Reduction::unchanged(store, Outcome::Rejected(err)),
		},
	};

	let mut next = (**store).clone();
	next.versions.insert(event.id.clone(), version);
	next.vehicles.insert(event.id.clone(), Arc::new(snapshot));
	Reduction {
		store: Arc::new(next),
		outcome,
	}
}
