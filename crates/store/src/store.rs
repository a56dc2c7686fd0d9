use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use convoy_primitives::{ChangeEvent, ValidationError, VehiclePatch, VehicleSnapshot};

use crate::{FleetStore, Outcome, Reduction, reduce};

/// Side channel notified for every rejected event.
pub type RejectHook = Arc<dyn Fn(&ChangeEvent, &ValidationError) + Send + Sync>;

/// Counter snapshot for store activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
	pub applied: u64,
	pub ignored: u64,
	pub rejected: u64,
	pub replaced: u64,
}

#[derive(Debug, Default)]
struct Counters {
	applied: AtomicU64,
	ignored: AtomicU64,
	rejected: AtomicU64,
	replaced: AtomicU64,
}

/// Atomically published fleet snapshot.
///
/// Reads are wait-free `Arc` loads. Writes reduce the current snapshot and
/// publish the result with CAS, retrying from the latest snapshot if another
/// writer won first.
pub struct EntityStore {
	current: ArcSwap<FleetStore>,
	counters: Counters,
	reject_hook: Option<RejectHook>,
}

impl Default for EntityStore {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for EntityStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EntityStore")
			.field("vehicles", &self.current.load().len())
			.field("stats", &self.stats())
			.finish()
	}
}

impl EntityStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self {
			current: ArcSwap::from_pointee(FleetStore::new()),
			counters: Counters::default(),
			reject_hook: None,
		}
	}

	/// Installs a hook called for every rejected event.
	#[must_use]
	pub fn with_reject_hook(mut self, hook: RejectHook) -> Self {
		self.reject_hook = Some(hook);
		self
	}

	/// Current snapshot.
	pub fn get(&self) -> Arc<FleetStore> {
		self.current.load_full()
	}

	/// Applies one event and returns the snapshot that is current afterwards.
	pub fn apply(&self, event: &ChangeEvent) -> Arc<FleetStore> {
		self.apply_with_outcome(event).store
	}

	/// Applies one event and reports how it was classified.
	pub fn apply_with_outcome(&self, event: &ChangeEvent) -> Reduction {
		let reduction = loop {
			let cur = self.current.load_full();
			let reduction = reduce(&cur, event);
			if Arc::ptr_eq(&reduction.store, &cur) {
				break reduction;
			}
			let prev = self.current.compare_and_swap(&cur, Arc::clone(&reduction.store));
			if Arc::ptr_eq(&prev, &cur) {
				break reduction;
			}
		};
		self.record(event, &reduction.outcome);
		reduction
	}

	/// Replaces the whole snapshot, e.g. after a full resync.
	pub fn replace(&self, store: FleetStore) -> Arc<FleetStore> {
		let next = Arc::new(store);
		self.current.store(Arc::clone(&next));
		self.counters.replaced.fetch_add(1, Ordering::Relaxed);
		tracing::debug!(vehicles = next.len(), "fleet.store.replaced");
		next
	}

	/// Builds a fresh snapshot from bulk-read records.
	///
	/// Each record is folded as an insert stamped with its own `updated_at`,
	/// so duplicate rows resolve exactly like duplicate events. Rejections go
	/// through the same side channel as live events.
	pub fn seed<I>(&self, records: I) -> FleetStore
	where
		I: IntoIterator<Item = VehicleSnapshot>,
	{
		let mut store = Arc::new(FleetStore::new());
		for record in records {
			let event = ChangeEvent::insert(record.id.clone(), VehiclePatch::from(&record), record.updated_at);
			let reduction = reduce(&store, &event);
			if let Outcome::Rejected(err) = &reduction.outcome {
				self.report_rejection(&event, err);
			}
			store = reduction.store;
		}
		Arc::try_unwrap(store).unwrap_or_else(|shared| (*shared).clone())
	}

	/// Counter snapshot.
	pub fn stats(&self) -> StoreStats {
		StoreStats {
			applied: self.counters.applied.load(Ordering::Relaxed),
			ignored: self.counters.ignored.load(Ordering::Relaxed),
			rejected: self.counters.rejected.load(Ordering::Relaxed),
			replaced: self.counters.replaced.load(Ordering::Relaxed),
		}
	}

	fn record(&self, event: &ChangeEvent, outcome: &Outcome) {
		match outcome {
			Outcome::Rejected(err) => self.report_rejection(event, err),
			Outcome::Ignored(_) => {
				self.counters.ignored.fetch_add(1, Ordering::Relaxed);
				tracing::trace!(id = %event.id, kind = %event.kind, outcome = outcome.as_str(), "fleet.store.ignored");
			}
			_ => {
				self.counters.applied.fetch_add(1, Ordering::Relaxed);
				tracing::trace!(id = %event.id, kind = %event.kind, outcome = outcome.as_str(), "fleet.store.applied");
			}
		}
	}

	fn report_rejection(&self, event: &ChangeEvent, err: &ValidationError) {
		self.counters.rejected.fetch_add(1, Ordering::Relaxed);
		tracing::warn!(id = %event.id, kind = %event.kind, error = %err, "fleet.store.rejected");
		if let Some(hook) = &self.reject_hook {
			hook(event, err);
		}
	}
}
