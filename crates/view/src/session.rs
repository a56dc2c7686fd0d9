use std::sync::Arc;

use convoy_store::FleetStore;
use tokio::sync::watch;

use crate::{MarkerLayer, MarkerSet, Projection, ProjectionFilter, ReconcileStats, project};

/// One screen's view of the fleet.
///
/// Binds a snapshot subscription, a filter and the markers it created.
/// Closing or dropping the view removes all of its markers; the shared store
/// and subscription are untouched.
pub struct FleetView<L: MarkerLayer> {
	snapshots: watch::Receiver<Arc<FleetStore>>,
	filter: ProjectionFilter,
	markers: MarkerSet<L>,
}

impl<L: MarkerLayer> FleetView<L> {
	/// Creates the view and reconciles it against the current snapshot.
	pub fn new(snapshots: watch::Receiver<Arc<FleetStore>>, filter: ProjectionFilter, layer: L) -> Self {
		let mut view = Self {
			snapshots,
			filter,
			markers: MarkerSet::new(layer),
		};
		view.refresh();
		view
	}

	pub fn filter(&self) -> &ProjectionFilter {
		&self.filter
	}

	/// Switches the filter and reconciles against the new projection.
	pub fn set_filter(&mut self, filter: ProjectionFilter) -> ReconcileStats {
		self.filter = filter;
		let store = Arc::clone(&self.snapshots.borrow());
		self.markers.reconcile(project(&store, &self.filter))
	}

	/// Reconciles against the latest snapshot.
	pub fn refresh(&mut self) -> ReconcileStats {
		let store = Arc::clone(&self.snapshots.borrow_and_update());
		self.markers.reconcile(project(&store, &self.filter))
	}

	/// Waits for the next published snapshot and reconciles against it.
	///
	/// Returns `None` once the publisher is gone.
	pub async fn next_frame(&mut self) -> Option<ReconcileStats> {
		self.snapshots.changed().await.ok()?;
		Some(self.refresh())
	}

	pub fn projection(&self) -> &Projection {
		self.markers.shown()
	}

	pub fn markers(&self) -> &MarkerSet<L> {
		&self.markers
	}

	/// Removes every marker this view created.
	pub fn close(mut self) -> usize {
		self.markers.clear()
	}
}

impl<L: MarkerLayer> Drop for FleetView<L> {
	fn drop(&mut self) {
		self.markers.clear();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use convoy_primitives::{ChangeEvent, GeoPoint, Timestamp, VehicleId, VehiclePatch, VehicleSnapshot};
	use convoy_store::EntityStore;
	use pretty_assertions::assert_eq;

	use super::*;

	/// Live marker ids shared with the test body.
	#[derive(Clone, Default)]
	struct Canvas(Arc<Mutex<Vec<VehicleId>>>);

	impl MarkerLayer for Canvas {
		type Marker = VehicleId;

		fn create(&mut self, vehicle: &VehicleSnapshot) -> VehicleId {
			self.0.lock().unwrap().push(vehicle.id.clone());
			vehicle.id.clone()
		}

		fn update(&mut self, _marker: &mut VehicleId, _vehicle: &VehicleSnapshot) {}

		fn remove(&mut self, marker: VehicleId) {
			self.0.lock().unwrap().retain(|id| *id != marker);
		}
	}

	impl Canvas {
		fn live(&self) -> Vec<String> {
			self.0.lock().unwrap().iter().map(ToString::to_string).collect()
		}
	}

	fn seeded() -> (EntityStore, watch::Sender<Arc<FleetStore>>) {
		let store = EntityStore::new();
		for (id, route) in [("a", "15"), ("b", "7"), ("c", "15")] {
			let patch = VehiclePatch::position(GeoPoint::new(12.0, 74.0).unwrap()).with_route(route);
			store.apply(&ChangeEvent::insert(id, patch, Timestamp::from_millis(1)));
		}
		let (tx, _) = watch::channel(store.get());
		(store, tx)
	}

	#[test]
	fn filter_switch_reconciles_and_close_cleans_up() {
		let (_store, tx) = seeded();
		let canvas = Canvas::default();
		let mut view = FleetView::new(tx.subscribe(), ProjectionFilter::route("15"), canvas.clone());
		assert_eq!(canvas.live(), vec!["a", "c"]);

		let stats = view.set_filter(ProjectionFilter::route("7"));
		assert_eq!(stats, ReconcileStats { created: 1, updated: 0, removed: 2 });
		assert_eq!(canvas.live(), vec!["b"]);

		assert_eq!(view.close(), 1);
		assert!(canvas.live().is_empty());
	}

	#[test]
	fn dropping_a_view_leaks_no_markers() {
		let (_store, tx) = seeded();
		let canvas = Canvas::default();
		{
			let _view = FleetView::new(tx.subscribe(), ProjectionFilter::default(), canvas.clone());
			assert_eq!(canvas.live().len(), 3);
		}
		assert!(canvas.live().is_empty());
	}

	#[tokio::test]
	async fn next_frame_follows_published_snapshots() {
		let (store, tx) = seeded();
		let canvas = Canvas::default();
		let mut view = FleetView::new(tx.subscribe(), ProjectionFilter::default(), canvas.clone());

		tx.send_replace(store.apply(&ChangeEvent::delete("b", Timestamp::from_millis(2))));
		assert_eq!(view.next_frame().await, Some(ReconcileStats { removed: 1, ..ReconcileStats::default() }));
		assert_eq!(canvas.live(), vec!["a", "c"]);

		drop(tx);
		assert_eq!(view.next_frame().await, None);
	}
}
