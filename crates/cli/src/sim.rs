//! Scripted fleet run against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use convoy_live::{
	BroadcastStats, ConvoyConfig, LinkState, MemoryBackend, PositionBroadcaster, PositionSample, SubscriptionManager, sample_channel,
};
use convoy_primitives::{CrowdLevel, GeoPoint, Timestamp, VehicleId, VehiclePatch, VehicleSnapshot};
use convoy_store::{EntityStore, StoreStats};
use convoy_view::{FleetSummary, FleetView, MarkerLayer, ProjectionFilter, ReconcileStats};

use crate::SimulateArgs;

const SYNC_TIMEOUT: Duration = Duration::from_secs(5);
const BASE_LAT: f64 = 12.86;
const BASE_LNG: f64 = 74.84;
/// Per-tick drift of scripted vehicles, in degrees (~55 m).
const DRIFT: f64 = 0.0005;
/// Per-tick drift of the operator's own vehicle, in degrees (~111 m).
const OPERATOR_DRIFT: f64 = 0.001;

/// Outcome of one simulation.
#[derive(Debug)]
pub(crate) struct Report {
	pub summary: FleetSummary,
	pub markers: ReconcileStats,
	pub store: StoreStats,
	pub broadcast: BroadcastStats,
}

/// Marker layer that logs instead of drawing.
#[derive(Default)]
struct LogLayer {
	next: u64,
}

impl MarkerLayer for LogLayer {
	type Marker = u64;

	fn create(&mut self, vehicle: &VehicleSnapshot) -> u64 {
		self.next += 1;
		tracing::info!(marker = self.next, id = %vehicle.id, lat = vehicle.position.lat(), lng = vehicle.position.lng(), "sim.marker.created");
		self.next
	}

	fn update(&mut self, marker: &mut u64, vehicle: &VehicleSnapshot) {
		tracing::debug!(marker = *marker, id = %vehicle.id, lat = vehicle.position.lat(), lng = vehicle.position.lng(), "sim.marker.moved");
	}

	fn remove(&mut self, marker: u64) {
		tracing::info!(marker, "sim.marker.removed");
	}
}

fn accumulate(total: &mut ReconcileStats, step: ReconcileStats) {
	total.created += step.created;
	total.updated += step.updated;
	total.removed += step.removed;
}

fn position(lat: f64, lng: f64) -> anyhow::Result<VehiclePatch> {
	Ok(VehiclePatch::position(GeoPoint::new(lat, lng)?))
}

pub(crate) async fn run(mut config: ConvoyConfig, args: SimulateArgs) -> anyhow::Result<FleetSummary> {
	let report = simulate(&mut config, &args).await?;
	tracing::info!(
		created = report.markers.created,
		moved = report.markers.updated,
		removed = report.markers.removed,
		applied = report.store.applied,
		ignored = report.store.ignored,
		emitted = report.broadcast.emitted,
		suppressed = report.broadcast.suppressed,
		"sim.finished"
	);
	Ok(report.summary)
}

async fn simulate(config: &mut ConvoyConfig, args: &SimulateArgs) -> anyhow::Result<Report> {
	if args.tick_ms == 0 {
		bail!("--tick-ms must be positive");
	}
	let tick = Duration::from_millis(args.tick_ms);
	config.broadcast.interval_ms = args.tick_ms;
	config.validate()?;

	let fleet: Vec<VehicleId> = (1..=args.vehicles.max(1)).map(|i| VehicleId::new(format!("{}-{i:02}", args.route))).collect();
	let self_id = args
		.self_id
		.clone()
		.map(VehicleId::new)
		.or_else(|| config.broadcast.self_id.clone())
		.unwrap_or_else(|| fleet[0].clone());
	config.broadcast.self_id = Some(self_id.clone());

	let backend = MemoryBackend::new();
	for (i, id) in fleet.iter().enumerate() {
		backend.insert(id.clone(), position(BASE_LAT + i as f64 * 0.01, BASE_LNG)?.with_route(args.route.as_str()));
	}
	if !fleet.contains(&self_id) {
		backend.insert(self_id.clone(), position(BASE_LAT, BASE_LNG)?.with_route(args.route.as_str()));
	}
	let other_route = if args.route == "7" { "15" } else { "7" };
	backend.insert(format!("{other_route}-01"), position(BASE_LAT, BASE_LNG + 0.05)?.with_route(other_route));

	let link = SubscriptionManager::new(Arc::new(backend.clone()), Arc::new(EntityStore::new()), config).start();
	let mut status = link.status();
	let synced = tokio::time::timeout(SYNC_TIMEOUT, status.wait_for(|s| s.state == LinkState::Synced || s.fatal.is_some()))
		.await
		.context("timed out waiting for the fleet link")?
		.context("fleet link stopped")?
		.clone();
	if let Some(fatal) = synced.fatal {
		bail!("fleet link failed: {fatal}");
	}

	let (samples, source) = sample_channel();
	let broadcaster = PositionBroadcaster::new(Arc::new(backend.clone()), link.status(), &config.broadcast).start(source);
	let mut view = FleetView::new(link.snapshots(), ProjectionFilter::route(args.route.as_str()), LogLayer::default());
	let mut markers = ReconcileStats {
		created: view.markers().len(),
		..ReconcileStats::default()
	};

	let scripted: Vec<&VehicleId> = fleet.iter().filter(|id| **id != self_id).collect();
	let retired = (scripted.len() > 1).then(|| scripted[scripted.len() - 1].clone());
	let clock = Timestamp::now();
	for step in 0..args.ticks {
		let drift = f64::from(step);
		for (i, id) in scripted.iter().enumerate() {
			if retired.as_ref() == Some(*id) && step >= args.ticks / 2 {
				continue;
			}
			let mut patch = position(BASE_LAT + i as f64 * 0.01 + drift * DRIFT, BASE_LNG)?;
			if step % 4 == 3 {
				patch = patch.with_crowd(match (step / 4 + i as u32) % 3 {
					0 => CrowdLevel::Low,
					1 => CrowdLevel::Medium,
					_ => CrowdLevel::High,
				});
			}
			backend.update((*id).clone(), patch);
		}
		if step == args.ticks / 2
			&& let Some(id) = &retired
		{
			tracing::info!(%id, "sim.vehicle.retired");
			backend.delete(id.clone());
		}

		let taken_at = clock.offset_millis(i64::from(step) * args.tick_ms as i64);
		samples.send(PositionSample::new(BASE_LAT + drift * OPERATOR_DRIFT, BASE_LNG, taken_at).with_accuracy(5.0));

		tokio::time::sleep(tick).await;
		accumulate(&mut markers, view.refresh());
	}

	// Let the last sample go out and echo back.
	tokio::time::sleep(tick * 2).await;
	accumulate(&mut markers, view.refresh());

	let summary = FleetSummary::from_store(&link.store().get());
	markers.removed += view.close();
	broadcaster.stop(tick).await;
	let report = Report {
		summary,
		markers,
		store: link.store().stats(),
		broadcast: broadcaster.stats(),
	};
	link.shutdown(SYNC_TIMEOUT).await;
	Ok(report)
}
