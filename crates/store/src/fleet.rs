use std::collections::BTreeMap;
use std::sync::Arc;

use convoy_primitives::{EventKind, Timestamp, VehicleId, VehicleSnapshot};

/// Last accepted write for one id, live or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
	pub at: Timestamp,
	pub kind: EventKind,
}

impl Version {
	/// Ordering key shared with [`convoy_primitives::ChangeEvent::version`].
	pub fn key(&self) -> (Timestamp, u8) {
		(self.at, self.kind.priority())
	}

	pub fn is_tombstone(&self) -> bool {
		self.kind == EventKind::Delete
	}
}

/// Immutable fleet snapshot keyed by vehicle id.
///
/// Iteration is ordered by id. Versions outlive deleted vehicles as
/// tombstones until pruned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetStore {
	pub(crate) vehicles: BTreeMap<VehicleId, Arc<VehicleSnapshot>>,
	pub(crate) versions: BTreeMap<VehicleId, Version>,
}

impl FleetStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of live vehicles.
	pub fn len(&self) -> usize {
		self.vehicles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.vehicles.is_empty()
	}

	pub fn get(&self, id: &VehicleId) -> Option<&Arc<VehicleSnapshot>> {
		self.vehicles.get(id)
	}

	pub fn contains(&self, id: &VehicleId) -> bool {
		self.vehicles.contains_key(id)
	}

	/// Live vehicles in id order.
	pub fn iter(&self) -> impl Iterator<Item = &Arc<VehicleSnapshot>> {
		self.vehicles.values()
	}

	/// Last accepted version for `id`, including deletions.
	pub fn version(&self, id: &VehicleId) -> Option<Version> {
		self.versions.get(id).copied()
	}

	/// Deletion time if `id` is currently tombstoned.
	pub fn tombstone(&self, id: &VehicleId) -> Option<Timestamp> {
		self.versions.get(id).filter(|v| v.is_tombstone()).map(|v| v.at)
	}

	pub fn tombstone_count(&self) -> usize {
		self.versions.values().filter(|v| v.is_tombstone()).count()
	}

	/// Newest accepted write time across live and deleted ids.
	///
	/// Measured on the server's clock, unlike the local wall clock.
	pub fn high_water(&self) -> Option<Timestamp> {
		self.versions.values().map(|v| v.at).max()
	}

	/// Returns a copy without tombstones recorded before `before`.
	///
	/// Returns `None` when nothing would be pruned so callers can keep the
	/// current snapshot.
	pub fn prune_tombstones(&self, before: Timestamp) -> Option<FleetStore> {
		let stale = self.versions.values().any(|v| v.is_tombstone() && v.at < before);
		if !stale {
			return None;
		}
		let mut next = self.clone();
		next.versions.retain(|_, v| !(v.is_tombstone() && v.at < before));
		Some(next)
	}
}
