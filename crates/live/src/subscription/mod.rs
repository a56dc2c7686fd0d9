//! Change-channel lifecycle and single-writer event folding.
//!
//! One task owns the subscription. Each connection attempt runs under its own
//! [`GenerationToken`]: subscribe, bulk-fetch, rebuild the store, then fold
//! live events in arrival order until the stream fails. Subscribing before the
//! fetch means nothing committed between the two is lost; events already
//! reflected in the fetch replay as stale or duplicate no-ops.

use std::sync::Arc;
use std::time::Duration;

use convoy_primitives::{Timestamp, ValidationError};
use convoy_store::{EntityStore, FleetStore, Outcome};
use convoy_worker::{Backoff, CancellationToken, GenerationClock, GenerationToken, ScopedTask, ShutdownReport, TaskClass};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::{ChannelError, ConvoyConfig, FleetBackend, LinkError, RawChange, VehicleRow};

const MIN_PRUNE_PERIOD: Duration = Duration::from_secs(1);
const MAX_PRUNE_PERIOD: Duration = Duration::from_secs(60);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
	Disconnected,
	Connecting,
	Synced,
	/// The last connection failed; the store is retained but may be stale.
	Degraded,
}

impl LinkState {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Disconnected => "disconnected",
			Self::Connecting => "connecting",
			Self::Synced => "synced",
			Self::Degraded => "degraded",
		}
	}
}

/// Latest link status, published on a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
	pub state: LinkState,
	/// Generation of the current or most recent connection attempt.
	pub generation: u64,
	/// Consecutive failed attempts since the last successful sync.
	pub attempt: u32,
	/// True when the store may lag the backend.
	pub stale: bool,
	pub last_synced: Option<Timestamp>,
	/// Set when the manager halted for good.
	pub fatal: Option<LinkError>,
}

impl Default for LinkStatus {
	fn default() -> Self {
		Self {
			state: LinkState::Disconnected,
			generation: 0,
			attempt: 0,
			stale: false,
			last_synced: None,
			fatal: None,
		}
	}
}

/// Lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
	State(LinkState),
	/// The store was rebuilt from a full fetch.
	Resynced { generation: u64, vehicles: usize },
	/// An inbound row or message was dropped.
	Rejected { error: ValidationError },
	Fatal(LinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
	Resync,
}

enum SessionEnd {
	Cancelled,
	Resync,
	Failed(ChannelError),
}

/// Builder for the subscription task.
pub struct SubscriptionManager {
	backend: Arc<dyn FleetBackend>,
	store: Arc<EntityStore>,
	backoff: Backoff,
	retention: Duration,
	event_buffer: usize,
}

impl SubscriptionManager {
	pub fn new(backend: Arc<dyn FleetBackend>, store: Arc<EntityStore>, config: &ConvoyConfig) -> Self {
		Self {
			backend,
			store,
			backoff: config.link.backoff(),
			retention: config.store.tombstone_retention(),
			event_buffer: config.link.event_buffer.max(1),
		}
	}

	/// Overrides the retry schedule, e.g. with a seeded one.
	#[must_use]
	pub fn backoff(mut self, backoff: Backoff) -> Self {
		self.backoff = backoff;
		self
	}

	/// Spawns the subscription task.
	pub fn start(self) -> SubscriptionHandle {
		let (status_tx, status) = watch::channel(LinkStatus::default());
		let (snapshots_tx, snapshots) = watch::channel(self.store.get());
		let (events, _) = broadcast::channel(self.event_buffer);
		let (commands_tx, commands) = mpsc::channel(1);

		let link = Link {
			backend: self.backend,
			store: Arc::clone(&self.store),
			backoff: self.backoff,
			retention: self.retention,
			clock: GenerationClock::new(),
			status: status_tx,
			snapshots: snapshots_tx,
			events: events.clone(),
			commands,
		};
		let task = ScopedTask::spawn(TaskClass::Realtime, "fleet.link", move |cancel| link.run(cancel));

		SubscriptionHandle {
			store: self.store,
			status,
			snapshots,
			events,
			commands: commands_tx,
			task,
		}
	}
}

/// Owner of a running subscription. Dropping it cancels the task.
pub struct SubscriptionHandle {
	store: Arc<EntityStore>,
	status: watch::Receiver<LinkStatus>,
	snapshots: watch::Receiver<Arc<FleetStore>>,
	events: broadcast::Sender<LinkEvent>,
	commands: mpsc::Sender<Command>,
	task: ScopedTask,
}

impl std::fmt::Debug for SubscriptionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SubscriptionHandle")
			.field("status", &*self.status.borrow())
			.field("task", &self.task)
			.finish()
	}
}

impl SubscriptionHandle {
	/// Status watch; every state change is published.
	pub fn status(&self) -> watch::Receiver<LinkStatus> {
		self.status.clone()
	}

	pub fn current_status(&self) -> LinkStatus {
		self.status.borrow().clone()
	}

	/// Snapshot watch, updated after every visible change and every rebuild.
	pub fn snapshots(&self) -> watch::Receiver<Arc<FleetStore>> {
		self.snapshots.clone()
	}

	pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
		self.events.subscribe()
	}

	/// Requests a full refetch and rebuild.
	///
	/// Returns false once the task has stopped. Requests made while one is
	/// pending coalesce.
	pub fn resync(&self) -> bool {
		match self.commands.try_send(Command::Resync) {
			Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		}
	}

	pub fn store(&self) -> &Arc<EntityStore> {
		&self.store
	}

	/// Cancels the task and waits up to `timeout` for it to release the subscription.
	pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
		self.task.shutdown(timeout).await
	}
}

struct Link {
	backend: Arc<dyn FleetBackend>,
	store: Arc<EntityStore>,
	backoff: Backoff,
	retention: Duration,
	clock: GenerationClock,
	status: watch::Sender<LinkStatus>,
	snapshots: watch::Sender<Arc<FleetStore>>,
	events: broadcast::Sender<LinkEvent>,
	commands: mpsc::Receiver<Command>,
}

impl Link {
	async fn run(mut self, cancel: CancellationToken) {
		let mut failures = 0u32;
		loop {
			if cancel.is_cancelled() {
				break;
			}

			let token = GenerationToken::issue(&self.clock, &cancel);
			let generation = token.generation();
			self.transition(LinkState::Connecting, |status| status.generation = generation);

			let end = tokio::select! {
				biased;
				_ = token.cancelled() => SessionEnd::Cancelled,
				end = self.session(generation, &mut failures) => end,
			};
			// Tears down anything the attempt left behind.
			token.cancel();

			let err = match end {
				SessionEnd::Cancelled => break,
				SessionEnd::Resync => continue,
				SessionEnd::Failed(err) => err,
			};

			if err.is_fatal() {
				self.halt(LinkError::Rejected(err.to_string()));
				return;
			}

			failures = failures.saturating_add(1);
			if matches!(err, ChannelError::Gap { .. }) {
				tracing::warn!(generation, error = %err, "fleet.link.gap");
			} else {
				tracing::warn!(generation, attempt = failures, error = %err, "fleet.link.failed");
			}
			self.transition(LinkState::Degraded, |status| {
				status.stale = true;
				status.attempt = failures;
			});

			let Some(delay) = self.backoff.delay(failures - 1) else {
				self.halt(LinkError::RetriesExhausted {
					attempts: failures,
					last: err.to_string(),
				});
				return;
			};
			tracing::debug!(generation, delay_ms = delay.as_millis() as u64, "fleet.link.backoff");
			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				cmd = self.commands.recv() => {
					if cmd.is_none() {
						break;
					}
				}
				_ = tokio::time::sleep(delay) => {}
			}
		}
		self.transition(LinkState::Disconnected, |_| {});
	}

	async fn session(&mut self, generation: u64, failures: &mut u32) -> SessionEnd {
		let mut stream = match self.backend.subscribe().await {
			Ok(stream) => stream,
			Err(err) => return SessionEnd::Failed(err),
		};
		let rows = match self.backend.fetch_all().await {
			Ok(rows) => rows,
			Err(err) => return SessionEnd::Failed(err),
		};
		let vehicles = self.rebuild(rows);

		*failures = 0;
		self.transition(LinkState::Synced, |status| {
			status.attempt = 0;
			status.stale = false;
			status.last_synced = Some(Timestamp::now());
		});
		self.emit(LinkEvent::Resynced { generation, vehicles });
		tracing::info!(generation, vehicles, "fleet.link.synced");

		let mut prune = tokio::time::interval(prune_period(self.retention));
		prune.set_missed_tick_behavior(MissedTickBehavior::Skip);
		prune.reset();

		loop {
			tokio::select! {
				biased;
				cmd = self.commands.recv() => match cmd {
					Some(Command::Resync) => {
						tracing::debug!(generation, "fleet.link.resync_requested");
						return SessionEnd::Resync;
					}
					None => return SessionEnd::Cancelled,
				},
				item = stream.recv() => match item {
					Some(Ok(raw)) => self.fold(raw),
					Some(Err(err)) => return SessionEnd::Failed(err),
					None => return SessionEnd::Failed(ChannelError::Closed),
				},
				_ = prune.tick() => self.prune(),
			}
		}
	}

	/// Replaces the store with one built from a full fetch.
	fn rebuild(&self, rows: Vec<VehicleRow>) -> usize {
		let records = rows.into_iter().filter_map(|row| match row.into_snapshot() {
			Ok(snapshot) => Some(snapshot),
			Err(error) => {
				tracing::warn!(%error, "fleet.link.row_rejected");
				self.emit(LinkEvent::Rejected { error });
				None
			}
		});
		let fresh = self.store.seed(records);
		let snapshot = self.store.replace(fresh);
		let vehicles = snapshot.len();
		self.snapshots.send_replace(snapshot);
		vehicles
	}

	fn fold(&self, raw: RawChange) {
		let event = match raw.into_event() {
			Ok(event) => event,
			Err(error) => {
				tracing::warn!(%error, "fleet.link.message_rejected");
				self.emit(LinkEvent::Rejected { error });
				return;
			}
		};
		let reduction = self.store.apply_with_outcome(&event);
		tracing::trace!(id = %event.id, kind = %event.kind, outcome = reduction.outcome.as_str(), "fleet.link.event");
		match reduction.outcome {
			Outcome::Rejected(error) => self.emit(LinkEvent::Rejected { error }),
			outcome if outcome.is_visible() => {
				self.snapshots.send_replace(reduction.store);
			}
			_ => {}
		}
	}

	/// Drops tombstones older than the retention window.
	///
	/// The window is measured back from the newest server timestamp in the
	/// store; local clock skew must not expire a tombstone early.
	fn prune(&self) {
		let current = self.store.get();
		let Some(newest) = current.high_water() else {
			return;
		};
		let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
		let before = newest.offset_millis(-retention_ms);
		if let Some(pruned) = current.prune_tombstones(before) {
			let removed = current.tombstone_count() - pruned.tombstone_count();
			self.store.replace(pruned);
			tracing::debug!(removed, "fleet.link.pruned");
		}
	}

	fn halt(&self, err: LinkError) {
		tracing::error!(error = %err, "fleet.link.fatal");
		let fatal = err.clone();
		self.transition(LinkState::Disconnected, move |status| {
			status.stale = true;
			status.fatal = Some(fatal);
		});
		self.emit(LinkEvent::Fatal(err));
	}

	fn transition(&self, state: LinkState, update: impl FnOnce(&mut LinkStatus)) {
		let mut changed = false;
		self.status.send_modify(|status| {
			changed = status.state != state;
			status.state = state;
			update(status);
		});
		if changed {
			tracing::info!(state = state.as_str(), "fleet.link.state");
			self.emit(LinkEvent::State(state));
		}
	}

	fn emit(&self, event: LinkEvent) {
		let _ = self.events.send(event);
	}
}

fn prune_period(retention: Duration) -> Duration {
	(retention / 4).clamp(MIN_PRUNE_PERIOD, MAX_PRUNE_PERIOD)
}
