use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use convoy_primitives::{ChangeEvent, CrowdLevel, GeoPoint, Timestamp, ValidationError, VehicleId, VehiclePatch};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;

fn ts(millis: i64) -> Timestamp {
	Timestamp::from_millis(millis)
}

fn point(lat: f64, lng: f64) -> GeoPoint {
	GeoPoint::new(lat, lng).unwrap()
}

fn full(route: &str, lat: f64, lng: f64) -> VehiclePatch {
	VehiclePatch::position(point(lat, lng)).with_route(route)
}

fn empty() -> Arc<FleetStore> {
	Arc::new(FleetStore::new())
}

fn fold(events: &[ChangeEvent]) -> Arc<FleetStore> {
	events.iter().fold(empty(), |store, event| reduce(&store, event).store)
}

#[test]
fn b1_lifecycle_scenario() {
	let b1 = VehicleId::from("b1");

	let r = reduce(&empty(), &ChangeEvent::insert("b1", full("15", 12.87, 74.84), ts(1)));
	assert_eq!(r.outcome, Outcome::Inserted);
	let snap = r.store.get(&b1).unwrap();
	assert!(snap.active);
	assert_eq!(snap.route_label, "15");
	assert_eq!(snap.crowd_level, CrowdLevel::Low);

	let r = reduce(&r.store, &ChangeEvent::update("b1", VehiclePatch::position(point(12.90, 74.83)), ts(2)));
	assert_eq!(r.outcome, Outcome::Updated);
	let snap = r.store.get(&b1).unwrap();
	assert_eq!(snap.id, b1);
	assert_eq!(snap.position, point(12.90, 74.83));
	assert_eq!(snap.route_label, "15");

	let r = reduce(&r.store, &ChangeEvent::delete("b1", ts(3)));
	assert_eq!(r.outcome, Outcome::Deleted);
	assert!(r.store.is_empty());

	let r = reduce(&r.store, &ChangeEvent::update("b1", full("15", 12.80, 74.80), ts(1)));
	assert_eq!(r.outcome, Outcome::Ignored(IgnoreReason::Stale));
	assert!(r.store.is_empty());
}

#[test]
fn applying_the_same_event_twice_is_idempotent() {
	let events = [
		ChangeEvent::insert("a", full("15", 1.0, 1.0), ts(1)),
		ChangeEvent::update("a", VehiclePatch::position(point(2.0, 2.0)), ts(2)),
		ChangeEvent::delete("a", ts(3)),
	];
	for event in &events {
		let base = fold(&events[..1]);
		let once = reduce(&base, event).store;
		let twice = reduce(&once, event);
		assert_eq!(*twice.store, *once);
		assert!(Arc::ptr_eq(&twice.store, &once), "duplicate must return the same snapshot");
	}
}

#[test]
fn delete_then_newer_update_resurrects() {
	let store = fold(&[ChangeEvent::delete("a", ts(5))]);
	assert_eq!(store.tombstone(&"a".into()), Some(ts(5)));

	let r = reduce(&store, &ChangeEvent::update("a", full("7", 3.0, 4.0).with_last_stop("Depot"), ts(10)));
	assert_eq!(r.outcome, Outcome::Resurrected);
	let snap = r.store.get(&"a".into()).unwrap();
	assert_eq!(snap.route_label, "7");
	assert_eq!(snap.last_stop_label, "Depot");
	assert_eq!(r.store.tombstone(&"a".into()), None);
}

#[test]
fn delete_then_older_update_stays_absent() {
	let store = fold(&[ChangeEvent::insert("a", full("7", 1.0, 1.0), ts(1)), ChangeEvent::delete("a", ts(10))]);
	let r = reduce(&store, &ChangeEvent::update("a", full("7", 3.0, 4.0), ts(5)));
	assert_eq!(r.outcome, Outcome::Ignored(IgnoreReason::Stale));
	assert!(!r.store.contains(&"a".into()));
}

#[test]
fn equal_timestamps_resolve_delete_over_update_over_insert() {
	let live = fold(&[ChangeEvent::insert("a", full("7", 1.0, 1.0), ts(5))]);

	let r = reduce(&live, &ChangeEvent::update("a", VehiclePatch::position(point(2.0, 2.0)), ts(5)));
	assert_eq!(r.outcome, Outcome::Updated);

	let r = reduce(&r.store, &ChangeEvent::delete("a", ts(5)));
	assert_eq!(r.outcome, Outcome::Deleted);

	let r = reduce(&r.store, &ChangeEvent::insert("a", full("7", 1.0, 1.0), ts(5)));
	assert_eq!(r.outcome, Outcome::Ignored(IgnoreReason::Stale));
	let r = reduce(&r.store, &ChangeEvent::update("a", full("7", 1.0, 1.0), ts(5)));
	assert_eq!(r.outcome, Outcome::Ignored(IgnoreReason::Stale));
	assert!(r.store.is_empty());
}

#[test]
fn delete_of_absent_vehicle_is_idempotent_but_recorded() {
	let r = reduce(&empty(), &ChangeEvent::delete("ghost", ts(4)));
	assert_eq!(r.outcome, Outcome::Ignored(IgnoreReason::AlreadyAbsent));
	assert!(r.store.is_empty());
	assert_eq!(r.store.tombstone_count(), 1);

	let again = reduce(&r.store, &ChangeEvent::delete("ghost", ts(4)));
	assert_eq!(again.outcome, Outcome::Ignored(IgnoreReason::Duplicate));
}

#[test]
fn insert_for_live_vehicle_merges() {
	let store = fold(&[ChangeEvent::insert("a", full("7", 1.0, 1.0).with_crowd(CrowdLevel::High), ts(1))]);
	let r = reduce(&store, &ChangeEvent::insert("a", VehiclePatch::position(point(2.0, 2.0)), ts(2)));
	assert_eq!(r.outcome, Outcome::Updated);
	assert_eq!(r.store.len(), 1);
	assert_eq!(r.store.get(&"a".into()).unwrap().crowd_level, CrowdLevel::High);
}

#[test]
fn malformed_events_are_rejected_without_mutation() {
	let store = fold(&[ChangeEvent::insert("a", full("7", 1.0, 1.0), ts(1))]);

	let no_payload = ChangeEvent {
		payload: None,
		..ChangeEvent::update("a", VehiclePatch::default(), ts(2))
	};
	let r = reduce(&store, &no_payload);
	assert!(matches!(r.outcome, Outcome::Rejected(ValidationError::MissingPayload { .. })));
	assert!(Arc::ptr_eq(&r.store, &store));

	let r = reduce(&store, &ChangeEvent::insert("b", VehiclePatch::default().with_route("9"), ts(2)));
	assert_eq!(r.outcome, Outcome::Rejected(ValidationError::MissingField { field: "position" }));
	assert!(Arc::ptr_eq(&r.store, &store));

	let r = reduce(&store, &ChangeEvent::update("c", VehiclePatch::position(point(1.0, 1.0)), ts(2)));
	assert_eq!(r.outcome, Outcome::Rejected(ValidationError::MissingField { field: "route_label" }));
}

#[test]
fn untouched_vehicles_are_shared_between_snapshots() {
	let before = fold(&[
		ChangeEvent::insert("a", full("7", 1.0, 1.0), ts(1)),
		ChangeEvent::insert("b", full("8", 2.0, 2.0), ts(1)),
	]);
	let after = reduce(&before, &ChangeEvent::update("a", VehiclePatch::position(point(1.5, 1.5)), ts(2))).store;

	let b = VehicleId::from("b");
	assert!(Arc::ptr_eq(before.get(&b).unwrap(), after.get(&b).unwrap()));
	let a = VehicleId::from("a");
	assert!(!Arc::ptr_eq(before.get(&a).unwrap(), after.get(&a).unwrap()));
	assert_eq!(before.get(&a).unwrap().position, point(1.0, 1.0), "old snapshot must not change");
}

#[test]
fn prune_drops_only_old_tombstones() {
	let store = fold(&[ChangeEvent::delete("old", ts(1)), ChangeEvent::delete("new", ts(100))]);
	let pruned = store.prune_tombstones(ts(50)).unwrap();
	assert_eq!(pruned.tombstone(&"old".into()), None);
	assert_eq!(pruned.tombstone(&"new".into()), Some(ts(100)));
	assert!(pruned.prune_tombstones(ts(50)).is_none());
}

#[test]
fn high_water_tracks_newest_write_including_deletes() {
	assert_eq!(empty().high_water(), None);
	let store = fold(&[
		ChangeEvent::insert("a", full("7", 1.0, 1.0), ts(5)),
		ChangeEvent::delete("b", ts(9)),
		ChangeEvent::update("a", full("7", 2.0, 1.0), ts(7)),
	]);
	assert_eq!(store.high_water(), Some(ts(9)));
}

#[test]
fn entity_store_reports_rejections_and_counts() {
	let seen = Arc::new(AtomicUsize::new(0));
	let hook_seen = Arc::clone(&seen);
	let store = EntityStore::new().with_reject_hook(Arc::new(move |_event, _err| {
		hook_seen.fetch_add(1, Ordering::SeqCst);
	}));

	let first = store.get();
	store.apply(&ChangeEvent::insert("a", full("7", 1.0, 1.0), ts(1)));
	store.apply(&ChangeEvent::insert("a", full("7", 1.0, 1.0), ts(1)));
	store.apply(&ChangeEvent::insert("b", VehiclePatch::default(), ts(1)));

	assert!(first.is_empty(), "readers keep their pinned snapshot");
	assert_eq!(store.get().len(), 1);
	assert_eq!(seen.load(Ordering::SeqCst), 1);
	assert_eq!(
		store.stats(),
		StoreStats {
			applied: 1,
			ignored: 1,
			rejected: 1,
			replaced: 0,
		}
	);
}

#[test]
fn seed_builds_store_and_replace_publishes_it() {
	let store = EntityStore::new();
	store.apply(&ChangeEvent::insert("stale", full("1", 1.0, 1.0), ts(1)));

	let records = ["a", "b"].map(|id| convoy_primitives::VehicleSnapshot {
		id: id.into(),
		route_label: "15".into(),
		position: point(12.0, 74.0),
		crowd_level: CrowdLevel::Medium,
		last_stop_label: "Pumpwell".into(),
		active: true,
		updated_at: ts(7),
	});
	let seeded = store.seed(records);
	assert_eq!(seeded.len(), 2);
	assert_eq!(store.get().len(), 1, "seeding does not publish");

	let published = store.replace(seeded);
	assert_eq!(published.len(), 2);
	assert!(!store.get().contains(&"stale".into()));
	assert_eq!(store.get().get(&"a".into()).unwrap().crowd_level, CrowdLevel::Medium);
	assert_eq!(store.stats().replaced, 1);
}

#[test]
fn concurrent_writers_never_lose_updates() {
	let store = Arc::new(EntityStore::new());
	let handles: Vec<_> = (0..4)
		.map(|worker| {
			let store = Arc::clone(&store);
			std::thread::spawn(move || {
				for i in 0..50 {
					let id = format!("w{worker}-{i}");
					store.apply(&ChangeEvent::insert(id.as_str(), full("1", 1.0, 1.0), ts(1)));
				}
			})
		})
		.collect();
	for handle in handles {
		handle.join().unwrap();
	}
	assert_eq!(store.get().len(), 200);
}

fn update_strategy() -> impl Strategy<Value = (i64, f64, f64, String)> {
	(0i64..1_000, -89.0f64..89.0, -179.0f64..179.0, "[0-9]{1,2}")
}

proptest! {
	#[test]
	fn later_timestamp_wins_in_either_order(
		(t1, lat1, lng1, route1) in update_strategy(),
		(t2, lat2, lng2, route2) in update_strategy(),
	) {
		prop_assume!(t1 != t2);
		let first = ChangeEvent::update("x", full(&route1, lat1, lng1), ts(t1));
		let second = ChangeEvent::update("x", full(&route2, lat2, lng2), ts(t2));

		let forward = fold(&[first.clone(), second.clone()]);
		let backward = fold(&[second.clone(), first.clone()]);
		prop_assert_eq!(&*forward, &*backward);

		let winner = if t1 > t2 { &first } else { &second };
		let snap = forward.get(&"x".into()).unwrap();
		prop_assert_eq!(snap.updated_at, winner.timestamp);
		prop_assert_eq!(Some(snap.position), winner.payload.as_ref().and_then(|p| p.position));
	}

	#[test]
	fn replaying_any_event_is_a_no_op(
		(t, lat, lng, route) in update_strategy(),
		kind in 0u8..3,
	) {
		let seed = fold(&[ChangeEvent::insert("x", full("1", 0.0, 0.0), ts(500))]);
		let event = match kind {
			0 => ChangeEvent::insert("x", full(&route, lat, lng), ts(t)),
			1 => ChangeEvent::update("x", full(&route, lat, lng), ts(t)),
			_ => ChangeEvent::delete("x", ts(t)),
		};
		let once = reduce(&seed, &event).store;
		let twice = reduce(&once, &event).store;
		prop_assert_eq!(&*once, &*twice);
	}
}
