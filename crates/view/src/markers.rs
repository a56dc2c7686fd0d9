use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use convoy_primitives::{VehicleId, VehicleSnapshot};

use crate::Projection;

/// Disjoint create/update/remove sets between two projections.
///
/// A vehicle present in both with the same `Arc` (or an equal value, as after
/// a resync rebuild) appears in no set.
#[derive(Debug, Clone, Default)]
pub struct MarkerDiff {
	pub create: Vec<Arc<VehicleSnapshot>>,
	pub update: Vec<Arc<VehicleSnapshot>>,
	pub remove: Vec<VehicleId>,
}

impl MarkerDiff {
	/// Merge-walks two id-ordered projections.
	pub fn between(prev: &Projection, next: &Projection) -> Self {
		let mut diff = Self::default();
		let (prev, next) = (prev.as_slice(), next.as_slice());
		let (mut i, mut j) = (0, 0);
		while i < prev.len() && j < next.len() {
			match prev[i].id.cmp(&next[j].id) {
				Ordering::Less => {
					diff.remove.push(prev[i].id.clone());
					i += 1;
				}
				Ordering::Greater => {
					diff.create.push(Arc::clone(&next[j]));
					j += 1;
				}
				Ordering::Equal => {
					if !Arc::ptr_eq(&prev[i], &next[j]) && prev[i] != next[j] {
						diff.update.push(Arc::clone(&next[j]));
					}
					i += 1;
					j += 1;
				}
			}
		}
		diff.remove.extend(prev[i..].iter().map(|vehicle| vehicle.id.clone()));
		diff.create.extend(next[j..].iter().cloned());
		diff
	}

	pub fn is_empty(&self) -> bool {
		self.create.is_empty() && self.update.is_empty() && self.remove.is_empty()
	}
}

/// Renderer-side marker operations.
pub trait MarkerLayer {
	type Marker;

	fn create(&mut self, vehicle: &VehicleSnapshot) -> Self::Marker;

	/// Moves or restyles an existing marker in place.
	fn update(&mut self, marker: &mut Self::Marker, vehicle: &VehicleSnapshot);

	fn remove(&mut self, marker: Self::Marker);
}

/// Counts from one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
	pub created: usize,
	pub updated: usize,
	pub removed: usize,
}

impl ReconcileStats {
	pub fn is_noop(&self) -> bool {
		*self == Self::default()
	}
}

/// Markers owned by one view, keyed by vehicle id.
pub struct MarkerSet<L: MarkerLayer> {
	layer: L,
	markers: BTreeMap<VehicleId, L::Marker>,
	shown: Projection,
}

impl<L: MarkerLayer> MarkerSet<L> {
	pub fn new(layer: L) -> Self {
		Self {
			layer,
			markers: BTreeMap::new(),
			shown: Projection::default(),
		}
	}

	/// Applies the diff from the shown projection to `next` through the layer.
	pub fn reconcile(&mut self, next: Projection) -> ReconcileStats {
		let diff = MarkerDiff::between(&self.shown, &next);
		let mut stats = ReconcileStats::default();
		for id in diff.remove {
			if let Some(marker) = self.markers.remove(&id) {
				self.layer.remove(marker);
				stats.removed += 1;
			}
		}
		for vehicle in diff.update {
			if let Some(marker) = self.markers.get_mut(&vehicle.id) {
				self.layer.update(marker, &vehicle);
				stats.updated += 1;
			}
		}
		for vehicle in diff.create {
			let marker = self.layer.create(&vehicle);
			self.markers.insert(vehicle.id.clone(), marker);
			stats.created += 1;
		}
		self.shown = next;
		if !stats.is_noop() {
			tracing::trace!(created = stats.created, updated = stats.updated, removed = stats.removed, "fleet.view.reconciled");
		}
		stats
	}

	/// Removes every marker.
	pub fn clear(&mut self) -> usize {
		self.reconcile(Projection::default()).removed
	}

	pub fn len(&self) -> usize {
		self.markers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.markers.is_empty()
	}

	pub fn marker(&self, id: &VehicleId) -> Option<&L::Marker> {
		self.markers.get(id)
	}

	pub fn shown(&self) -> &Projection {
		&self.shown
	}

	pub fn layer(&self) -> &L {
		&self.layer
	}
}

#[cfg(test)]
mod tests {
	use convoy_primitives::{ChangeEvent, GeoPoint, Timestamp, VehiclePatch};
	use convoy_store::{FleetStore, reduce};
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::{ProjectionFilter, project};

	/// Layer that hands out serial marker ids and records every call.
	#[derive(Default)]
	struct RecordingLayer {
		next: u32,
		log: Vec<String>,
	}

	impl MarkerLayer for RecordingLayer {
		type Marker = u32;

		fn create(&mut self, vehicle: &VehicleSnapshot) -> u32 {
			self.next += 1;
			self.log.push(format!("create {} #{}", vehicle.id, self.next));
			self.next
		}

		fn update(&mut self, marker: &mut u32, vehicle: &VehicleSnapshot) {
			self.log.push(format!("move {} #{marker}", vehicle.id));
		}

		fn remove(&mut self, marker: u32) {
			self.log.push(format!("remove #{marker}"));
		}
	}

	fn apply(store: &Arc<FleetStore>, event: ChangeEvent) -> Arc<FleetStore> {
		reduce(store, &event).store
	}

	fn at(lat: f64) -> VehiclePatch {
		VehiclePatch::position(GeoPoint::new(lat, 74.8).unwrap())
	}

	#[test]
	fn diff_partitions_create_update_remove() {
		let s0 = Arc::new(FleetStore::new());
		let s1 = apply(&s0, ChangeEvent::insert("a", at(1.0).with_route("15"), Timestamp::from_millis(1)));
		let s1 = apply(&s1, ChangeEvent::insert("b", at(1.0).with_route("15"), Timestamp::from_millis(1)));
		let s2 = apply(&s1, ChangeEvent::update("a", at(2.0), Timestamp::from_millis(2)));
		let s2 = apply(&s2, ChangeEvent::delete("b", Timestamp::from_millis(2)));
		let s2 = apply(&s2, ChangeEvent::insert("c", at(1.0).with_route("15"), Timestamp::from_millis(2)));

		let filter = ProjectionFilter::default();
		let diff = MarkerDiff::between(&project(&s1, &filter), &project(&s2, &filter));
		let ids = |v: &[Arc<VehicleSnapshot>]| v.iter().map(|x| x.id.to_string()).collect::<Vec<_>>();
		assert_eq!(ids(&diff.create), vec!["c"]);
		assert_eq!(ids(&diff.update), vec!["a"]);
		assert_eq!(diff.remove, vec![VehicleId::from("b")]);

		assert!(MarkerDiff::between(&project(&s2, &filter), &project(&s2, &filter)).is_empty());
	}

	#[test]
	fn equal_values_after_rebuild_are_not_updates() {
		let s1 = apply(&Arc::new(FleetStore::new()), ChangeEvent::insert("a", at(1.0).with_route("15"), Timestamp::from_millis(1)));
		let rebuilt = Arc::new((*s1).clone());
		let filter = ProjectionFilter::default();
		assert!(MarkerDiff::between(&project(&s1, &filter), &project(&rebuilt, &filter)).is_empty());
	}

	#[test]
	fn markers_move_in_place_while_projected() {
		let mut set = MarkerSet::new(RecordingLayer::default());
		let filter = ProjectionFilter::route("15");
		let mut store = apply(&Arc::new(FleetStore::new()), ChangeEvent::insert("a", at(1.0).with_route("15"), Timestamp::from_millis(1)));
		assert_eq!(set.reconcile(project(&store, &filter)).created, 1);

		for step in 2..6 {
			store = apply(&store, ChangeEvent::update("a", at(step as f64), Timestamp::from_millis(step)));
			let stats = set.reconcile(project(&store, &filter));
			assert_eq!(stats, ReconcileStats { updated: 1, ..ReconcileStats::default() });
		}
		assert_eq!(set.marker(&VehicleId::from("a")), Some(&1));

		// Leaving the route removes the marker; coming back creates a new one.
		store = apply(&store, ChangeEvent::update("a", VehiclePatch::default().with_route("7"), Timestamp::from_millis(10)));
		assert_eq!(set.reconcile(project(&store, &filter)).removed, 1);
		store = apply(&store, ChangeEvent::update("a", VehiclePatch::default().with_route("15"), Timestamp::from_millis(11)));
		assert_eq!(set.reconcile(project(&store, &filter)).created, 1);

		assert_eq!(set.clear(), 1);
		assert!(set.is_empty());
		assert_eq!(
			set.layer().log,
			vec![
				"create a #1",
				"move a #1",
				"move a #1",
				"move a #1",
				"move a #1",
				"remove #1",
				"create a #2",
				"remove #2",
			]
		);
	}
}
