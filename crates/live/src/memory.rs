//! In-process [`FleetBackend`] with fault injection.
//!
//! Holds the fleet table, stamps every write with a monotonic server time,
//! and fans changes out to subscribers through a bounded broadcast channel.
//! Subscribers that fall behind receive [`ChannelError::Gap`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use convoy_primitives::{ChangeEvent, EventKind, Timestamp, VehicleId, VehiclePatch, VehicleSnapshot};
use convoy_worker::{CancellationToken, TaskClass};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::{ChangeStream, ChannelError, FleetBackend, RawChange, VehicleRow};

const DEFAULT_FANOUT_CAPACITY: usize = 1024;

#[derive(Default)]
struct Faults {
	fetch: VecDeque<ChannelError>,
	subscribe: VecDeque<ChannelError>,
	publish: VecDeque<ChannelError>,
}

struct State {
	rows: BTreeMap<VehicleId, VehicleSnapshot>,
	last_stamp: Timestamp,
	faults: Faults,
	epoch: CancellationToken,
	publishes: u64,
}

/// In-memory fleet table and change channel.
#[derive(Clone)]
pub struct MemoryBackend {
	state: Arc<Mutex<State>>,
	changes: broadcast::Sender<RawChange>,
	stream_capacity: usize,
}

impl Default for MemoryBackend {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_FANOUT_CAPACITY)
	}

	/// Creates a backend whose subscribers lag after `capacity` undelivered changes.
	pub fn with_capacity(capacity: usize) -> Self {
		let (changes, _) = broadcast::channel(capacity.max(1));
		Self {
			state: Arc::new(Mutex::new(State {
				rows: BTreeMap::new(),
				last_stamp: Timestamp::EPOCH,
				faults: Faults::default(),
				epoch: CancellationToken::new(),
				publishes: 0,
			})),
			changes,
			stream_capacity: capacity.max(1),
		}
	}

	/// Applies a change to the table and broadcasts it with a server timestamp.
	///
	/// Updates for unknown ids become inserts when the patch is complete;
	/// otherwise they are dropped like a write to a missing row. Inserts and
	/// updates echo the whole row as written, not just the changed columns.
	pub fn write(&self, event: ChangeEvent) -> Option<Timestamp> {
		let (raw, stamp) = {
			let mut state = self.state.lock();
			let stamp = next_stamp(&mut state);
			let raw = match (event.kind, event.payload.as_ref()) {
				(EventKind::Delete, _) => {
					state.rows.remove(&event.id);
					Some(RawChange::from_event(&event, stamp))
				}
				(kind, Some(patch)) => upsert(&mut state.rows, &event.id, patch, stamp).map(|row| RawChange::from_row(kind, &row, stamp)),
				(_, None) => None,
			};
			let Some(raw) = raw else {
				tracing::debug!(id = %event.id, kind = %event.kind, "fleet.memory.write_dropped");
				return None;
			};
			(raw, stamp)
		};
		let _ = self.changes.send(raw);
		Some(stamp)
	}

	/// Inserts a vehicle row.
	pub fn insert(&self, id: impl Into<VehicleId>, patch: VehiclePatch) -> Option<Timestamp> {
		self.write(ChangeEvent::insert(id, patch, Timestamp::now()))
	}

	/// Updates a vehicle row.
	pub fn update(&self, id: impl Into<VehicleId>, patch: VehiclePatch) -> Option<Timestamp> {
		self.write(ChangeEvent::update(id, patch, Timestamp::now()))
	}

	/// Deletes a vehicle row.
	pub fn delete(&self, id: impl Into<VehicleId>) -> Option<Timestamp> {
		self.write(ChangeEvent::delete(id, Timestamp::now()))
	}

	/// Broadcasts a raw message without touching the table.
	///
	/// Lets tests deliver duplicated, reordered or malformed traffic.
	pub fn inject(&self, raw: RawChange) {
		let _ = self.changes.send(raw);
	}

	/// Current table contents.
	pub fn rows(&self) -> Vec<VehicleSnapshot> {
		self.state.lock().rows.values().cloned().collect()
	}

	pub fn row(&self, id: &VehicleId) -> Option<VehicleSnapshot> {
		self.state.lock().rows.get(id).cloned()
	}

	/// Number of successful [`FleetBackend::publish`] calls.
	pub fn publish_count(&self) -> u64 {
		self.state.lock().publishes
	}

	/// Number of open subscriptions.
	pub fn subscriber_count(&self) -> usize {
		self.changes.receiver_count()
	}

	/// Ends every open subscription with a transient error.
	pub fn disconnect_all(&self) {
		let mut state = self.state.lock();
		state.epoch.cancel();
		state.epoch = CancellationToken::new();
	}

	pub fn fail_next_fetch(&self, err: ChannelError) {
		self.state.lock().faults.fetch.push_back(err);
	}

	pub fn fail_next_subscribe(&self, err: ChannelError) {
		self.state.lock().faults.subscribe.push_back(err);
	}

	pub fn fail_next_publish(&self, err: ChannelError) {
		self.state.lock().faults.publish.push_back(err);
	}
}

fn next_stamp(state: &mut State) -> Timestamp {
	let floor = state.last_stamp.offset_millis(1);
	let stamp = Timestamp::now().max(floor);
	state.last_stamp = stamp;
	stamp
}

/// Writes the row and returns it as stored.
fn upsert(rows: &mut BTreeMap<VehicleId, VehicleSnapshot>, id: &VehicleId, patch: &VehiclePatch, stamp: Timestamp) -> Option<VehicleSnapshot> {
	let row = match rows.get(id) {
		Some(existing) => existing.merged(patch, stamp),
		None => VehicleSnapshot::from_patch(id.clone(), patch, stamp).ok()?,
	};
	rows.insert(id.clone(), row.clone());
	Some(row)
}

#[async_trait]
impl FleetBackend for MemoryBackend {
	async fn fetch_all(&self) -> Result<Vec<VehicleRow>, ChannelError> {
		let mut state = self.state.lock();
		if let Some(err) = state.faults.fetch.pop_front() {
			return Err(err);
		}
		Ok(state.rows.values().filter(|row| row.active).map(VehicleRow::from_snapshot).collect())
	}

	async fn subscribe(&self) -> Result<ChangeStream, ChannelError> {
		let epoch = {
			let mut state = self.state.lock();
			if let Some(err) = state.faults.subscribe.pop_front() {
				return Err(err);
			}
			state.epoch.clone()
		};

		let mut changes = self.changes.subscribe();
		let (tx, rx) = mpsc::channel(self.stream_capacity);
		convoy_worker::spawn(TaskClass::Background, "fleet.memory.fanout", async move {
			loop {
				let item = tokio::select! {
					biased;
					_ = epoch.cancelled() => {
						let _ = tx.send(Err(ChannelError::Transient("connection reset".into()))).await;
						break;
					}
					_ = tx.closed() => break,
					msg = changes.recv() => msg,
				};
				match item {
					Ok(raw) => {
						if tx.send(Ok(raw)).await.is_err() {
							break;
						}
					}
					Err(broadcast::error::RecvError::Lagged(missed)) => {
						let _ = tx.send(Err(ChannelError::Gap { missed })).await;
						break;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		});
		Ok(rx)
	}

	async fn publish(&self, event: ChangeEvent) -> Result<(), ChannelError> {
		if let Some(err) = self.state.lock().faults.publish.pop_front() {
			return Err(err);
		}
		match self.write(event) {
			Some(_) => {
				self.state.lock().publishes += 1;
				Ok(())
			}
			None => Err(ChannelError::Transient("write matched no row".into())),
		}
	}
}
