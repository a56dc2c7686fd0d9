use std::sync::Arc;

use convoy_primitives::{BoundingBox, VehicleId, VehicleSnapshot};
use convoy_store::FleetStore;
use serde::{Deserialize, Serialize};

/// Which vehicles a view shows.
///
/// The default shows every active vehicle on every route, anywhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionFilter {
	pub route: Option<String>,
	pub region: Option<BoundingBox>,
	pub include_inactive: bool,
}

impl ProjectionFilter {
	/// Active vehicles on one route.
	pub fn route(label: impl Into<String>) -> Self {
		Self {
			route: Some(label.into()),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_region(mut self, region: BoundingBox) -> Self {
		self.region = Some(region);
		self
	}

	#[must_use]
	pub fn with_inactive(mut self, include_inactive: bool) -> Self {
		self.include_inactive = include_inactive;
		self
	}

	pub fn matches(&self, vehicle: &VehicleSnapshot) -> bool {
		(self.include_inactive || vehicle.active)
			&& self.route.as_deref().is_none_or(|route| vehicle.route_label == route)
			&& self.region.as_ref().is_none_or(|region| region.contains(&vehicle.position))
	}
}

/// Id-ordered vehicles selected from one snapshot.
///
/// Entries are the store's own `Arc`s, so identity survives projection.
#[derive(Debug, Clone, Default)]
pub struct Projection {
	entries: Vec<Arc<VehicleSnapshot>>,
}

impl Projection {
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Arc<VehicleSnapshot>> {
		self.entries.iter()
	}

	pub fn ids(&self) -> impl Iterator<Item = &VehicleId> {
		self.entries.iter().map(|vehicle| &vehicle.id)
	}

	pub fn get(&self, id: &VehicleId) -> Option<&Arc<VehicleSnapshot>> {
		self.entries
			.binary_search_by(|vehicle| vehicle.id.cmp(id))
			.ok()
			.map(|index| &self.entries[index])
	}

	pub(crate) fn as_slice(&self) -> &[Arc<VehicleSnapshot>] {
		&self.entries
	}
}

impl PartialEq for Projection {
	/// Same vehicles, same `Arc`s, same order.
	fn eq(&self, other: &Self) -> bool {
		self.entries.len() == other.entries.len() && self.entries.iter().zip(&other.entries).all(|(a, b)| Arc::ptr_eq(a, b))
	}
}

/// Selects the vehicles `filter` admits, ordered by id.
pub fn project(store: &FleetStore, filter: &ProjectionFilter) -> Projection {
	// The store iterates in id order already.
	let entries = store.iter().filter(|vehicle| filter.matches(vehicle)).cloned().collect();
	Projection { entries }
}
