//! Operator-device position broadcasting.
//!
//! On every sampling tick the broadcaster reads the latest device sample,
//! filters it, and publishes a position update for the configured self
//! vehicle through [`FleetBackend::publish`]. The write reaches the local
//! store only via the change channel echo, like anyone else's.
//!
//! Nothing is queued: a sample that cannot be published right now (link not
//! synced, publish error) is dropped, and the next tick carries a fresher one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use convoy_primitives::{ChangeEvent, GeoPoint, Timestamp, ValidationError, VehicleId, VehiclePatch};
use convoy_worker::{CancellationToken, ScopedTask, ShutdownReport, TaskClass};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::{BroadcastConfig, FleetBackend, LinkState, LinkStatus};

/// One raw device reading.
///
/// Coordinates are unvalidated; out-of-range readings are dropped by the
/// broadcaster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
	pub lat: f64,
	pub lng: f64,
	/// Reported accuracy radius in meters, when the device provides one.
	pub accuracy_m: Option<f64>,
	pub taken_at: Timestamp,
}

impl PositionSample {
	pub fn new(lat: f64, lng: f64, taken_at: Timestamp) -> Self {
		Self {
			lat,
			lng,
			accuracy_m: None,
			taken_at,
		}
	}

	#[must_use]
	pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
		self.accuracy_m = Some(accuracy_m);
		self
	}

	pub fn position(&self) -> Result<GeoPoint, ValidationError> {
		GeoPoint::new(self.lat, self.lng)
	}
}

/// Device location provider.
#[async_trait]
pub trait PositionSource: Send + 'static {
	/// Latest available sample, or `None` before the first fix.
	async fn sample(&mut self) -> Option<PositionSample>;
}

/// Producer half of [`sample_channel`].
#[derive(Debug, Clone)]
pub struct SampleSender(Arc<watch::Sender<Option<PositionSample>>>);

impl SampleSender {
	/// Replaces the latest sample.
	pub fn send(&self, sample: PositionSample) {
		self.0.send_replace(Some(sample));
	}
}

/// [`PositionSource`] that reports whatever was last sent.
#[derive(Debug, Clone)]
pub struct LatestSample(watch::Receiver<Option<PositionSample>>);

#[async_trait]
impl PositionSource for LatestSample {
	async fn sample(&mut self) -> Option<PositionSample> {
		*self.0.borrow_and_update()
	}
}

/// Latest-value sample channel for push-style location APIs.
pub fn sample_channel() -> (SampleSender, LatestSample) {
	let (tx, rx) = watch::channel(None);
	(SampleSender(Arc::new(tx)), LatestSample(rx))
}

/// Broadcaster counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
	pub emitted: u64,
	/// Movement below the minimum distance.
	pub suppressed: u64,
	/// Not newer than the last accepted sample.
	pub stale: u64,
	pub invalid: u64,
	pub inaccurate: u64,
	/// Link not synced or publish failed.
	pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
	emitted: AtomicU64,
	suppressed: AtomicU64,
	stale: AtomicU64,
	invalid: AtomicU64,
	inaccurate: AtomicU64,
	dropped: AtomicU64,
}

impl Counters {
	fn snapshot(&self) -> BroadcastStats {
		BroadcastStats {
			emitted: self.emitted.load(Ordering::Relaxed),
			suppressed: self.suppressed.load(Ordering::Relaxed),
			stale: self.stale.load(Ordering::Relaxed),
			invalid: self.invalid.load(Ordering::Relaxed),
			inaccurate: self.inaccurate.load(Ordering::Relaxed),
			dropped: self.dropped.load(Ordering::Relaxed),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
enum Admission {
	Emit(GeoPoint),
	Suppressed,
	Stale,
	Invalid(ValidationError),
	Inaccurate,
}

/// Per-sample gate: validity, accuracy, freshness, smoothing and distance.
#[derive(Debug, Clone)]
struct SampleFilter {
	min_distance_m: f64,
	smoothing: f64,
	max_accuracy_m: f64,
	last_accepted: Option<Timestamp>,
	smoothed: Option<GeoPoint>,
	last_emitted: Option<GeoPoint>,
}

impl SampleFilter {
	fn new(config: &BroadcastConfig) -> Self {
		Self {
			min_distance_m: config.min_distance_m,
			smoothing: config.smoothing,
			max_accuracy_m: config.max_accuracy_m,
			last_accepted: None,
			smoothed: None,
			last_emitted: None,
		}
	}

	fn admit(&mut self, sample: &PositionSample) -> Admission {
		let position = match sample.position() {
			Ok(position) => position,
			Err(err) => return Admission::Invalid(err),
		};
		if sample.accuracy_m.is_some_and(|accuracy| accuracy.is_nan() || accuracy > self.max_accuracy_m) {
			return Admission::Inaccurate;
		}
		if self.last_accepted.is_some_and(|last| sample.taken_at <= last) {
			return Admission::Stale;
		}
		self.last_accepted = Some(sample.taken_at);

		let smoothed = match self.smoothed {
			Some(prev) if self.smoothing < 1.0 => prev.blend(&position, self.smoothing),
			_ => position,
		};
		self.smoothed = Some(smoothed);

		if self.last_emitted.is_some_and(|last| last.distance_m(&smoothed) < self.min_distance_m) {
			return Admission::Suppressed;
		}
		Admission::Emit(smoothed)
	}

	/// Records a position the backend accepted.
	fn commit(&mut self, position: GeoPoint) {
		self.last_emitted = Some(position);
	}

	fn reset(&mut self) {
		self.last_accepted = None;
		self.smoothed = None;
		self.last_emitted = None;
	}
}

#[derive(Debug, Clone, PartialEq)]
struct Controls {
	enabled: bool,
	self_id: Option<VehicleId>,
}

/// Builder for the sampling task.
pub struct PositionBroadcaster {
	backend: Arc<dyn FleetBackend>,
	link: watch::Receiver<LinkStatus>,
	config: BroadcastConfig,
}

impl PositionBroadcaster {
	/// `link` gates publishing: samples are only sent while it reports `Synced`.
	pub fn new(backend: Arc<dyn FleetBackend>, link: watch::Receiver<LinkStatus>, config: &BroadcastConfig) -> Self {
		Self {
			backend,
			link,
			config: config.clone(),
		}
	}

	/// Spawns the sampling timer.
	pub fn start<S: PositionSource>(self, source: S) -> BroadcasterHandle {
		let (controls_tx, controls) = watch::channel(Controls {
			enabled: self.config.enabled,
			self_id: self.config.self_id.clone(),
		});
		let counters = Arc::new(Counters::default());
		let sampler = Sampler {
			backend: self.backend,
			link: self.link,
			controls,
			counters: Arc::clone(&counters),
			filter: SampleFilter::new(&self.config),
			period: self.config.interval(),
		};
		let task = ScopedTask::spawn(TaskClass::Sampling, "fleet.broadcast", move |cancel| sampler.run(cancel, source));
		BroadcasterHandle {
			controls: controls_tx,
			counters,
			task,
		}
	}
}

/// Owner of a running broadcaster. Dropping it stops the timer.
pub struct BroadcasterHandle {
	controls: watch::Sender<Controls>,
	counters: Arc<Counters>,
	task: ScopedTask,
}

impl std::fmt::Debug for BroadcasterHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BroadcasterHandle")
			.field("controls", &*self.controls.borrow())
			.field("stats", &self.counters.snapshot())
			.finish()
	}
}

impl BroadcasterHandle {
	/// Turns broadcasting on or off. Returns false when nothing changed.
	pub fn set_enabled(&self, enabled: bool) -> bool {
		let changed = self.controls.send_if_modified(|controls| {
			let changed = controls.enabled != enabled;
			controls.enabled = enabled;
			changed
		});
		if changed {
			tracing::info!(enabled, "fleet.broadcast.toggled");
		}
		changed
	}

	/// Sets the vehicle this device reports for. Returns false when nothing changed.
	pub fn set_self_id(&self, self_id: Option<VehicleId>) -> bool {
		self.controls.send_if_modified(|controls| {
			if controls.self_id == self_id {
				return false;
			}
			tracing::info!(self_id = ?self_id, "fleet.broadcast.self_id");
			controls.self_id = self_id;
			true
		})
	}

	pub fn is_enabled(&self) -> bool {
		self.controls.borrow().enabled
	}

	pub fn self_id(&self) -> Option<VehicleId> {
		self.controls.borrow().self_id.clone()
	}

	pub fn stats(&self) -> BroadcastStats {
		self.counters.snapshot()
	}

	/// Stops the sampling timer. The subscription is unaffected.
	pub async fn stop(&self, timeout: Duration) -> ShutdownReport {
		self.task.shutdown(timeout).await
	}
}

struct Sampler {
	backend: Arc<dyn FleetBackend>,
	link: watch::Receiver<LinkStatus>,
	controls: watch::Receiver<Controls>,
	counters: Arc<Counters>,
	filter: SampleFilter,
	period: Duration,
}

impl Sampler {
	async fn run<S: PositionSource>(mut self, cancel: CancellationToken, mut source: S) {
		let mut ticker = tokio::time::interval(self.period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
		let mut current_id = self.controls.borrow().self_id.clone();

		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				changed = self.controls.changed() => {
					if changed.is_err() {
						break;
					}
					let self_id = self.controls.borrow_and_update().self_id.clone();
					if self_id != current_id {
						self.filter.reset();
						current_id = self_id;
					}
					continue;
				}
				_ = ticker.tick() => {}
			}

			let Controls { enabled, self_id } = self.controls.borrow().clone();
			let Some(id) = self_id.filter(|_| enabled) else {
				continue;
			};
			let sample = tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				sample = source.sample() => sample,
			};
			let Some(sample) = sample else {
				continue;
			};
			self.step(id, &sample).await;
		}
		tracing::debug!("fleet.broadcast.stopped");
	}

	async fn step(&mut self, id: VehicleId, sample: &PositionSample) {
		let position = match self.filter.admit(sample) {
			Admission::Emit(position) => position,
			Admission::Suppressed => {
				self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
				return;
			}
			Admission::Stale => {
				self.counters.stale.fetch_add(1, Ordering::Relaxed);
				return;
			}
			Admission::Invalid(error) => {
				self.counters.invalid.fetch_add(1, Ordering::Relaxed);
				tracing::debug!(%error, "fleet.broadcast.invalid_sample");
				return;
			}
			Admission::Inaccurate => {
				self.counters.inaccurate.fetch_add(1, Ordering::Relaxed);
				tracing::debug!(accuracy_m = ?sample.accuracy_m, "fleet.broadcast.inaccurate_sample");
				return;
			}
		};

		let state = self.link.borrow().state;
		if state != LinkState::Synced {
			self.counters.dropped.fetch_add(1, Ordering::Relaxed);
			tracing::debug!(state = state.as_str(), "fleet.broadcast.dropped");
			return;
		}

		let event = ChangeEvent::update(id, VehiclePatch::position(position), Timestamp::now());
		match self.backend.publish(event).await {
			Ok(()) => {
				self.filter.commit(position);
				self.counters.emitted.fetch_add(1, Ordering::Relaxed);
				tracing::trace!(lat = position.lat(), lng = position.lng(), "fleet.broadcast.emitted");
			}
			Err(error) => {
				self.counters.dropped.fetch_add(1, Ordering::Relaxed);
				tracing::debug!(%error, "fleet.broadcast.publish_failed");
			}
		}
	}
}
