//! Read-only fleet summary handed to the advisory text service.

use std::collections::BTreeMap;

use convoy_primitives::{CrowdLevel, Timestamp, VehicleId};
use convoy_store::FleetStore;
use serde::{Deserialize, Serialize};

/// Point-in-time summary of the active fleet, grouped by route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
	/// Newest `updated_at` among the summarized vehicles.
	pub as_of: Option<Timestamp>,
	pub active_vehicles: usize,
	pub routes: Vec<RouteSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
	pub route: String,
	pub crowd: CrowdCounts,
	pub vehicles: Vec<VehicleSummary>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrowdCounts {
	pub low: usize,
	pub medium: usize,
	pub high: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSummary {
	pub id: VehicleId,
	pub lat: f64,
	pub lng: f64,
	pub crowd_level: CrowdLevel,
	pub last_stop: String,
	pub updated_at: Timestamp,
}

impl FleetSummary {
	pub fn from_store(store: &FleetStore) -> Self {
		let mut routes: BTreeMap<&str, RouteSummary> = BTreeMap::new();
		let mut as_of = None;
		let mut active_vehicles = 0;
		for vehicle in store.iter().filter(|vehicle| vehicle.active) {
			active_vehicles += 1;
			as_of = as_of.max(Some(vehicle.updated_at));
			let route = routes.entry(vehicle.route_label.as_str()).or_insert_with(|| RouteSummary {
				route: vehicle.route_label.clone(),
				crowd: CrowdCounts::default(),
				vehicles: Vec::new(),
			});
			match vehicle.crowd_level {
				CrowdLevel::Low => route.crowd.low += 1,
				CrowdLevel::Medium => route.crowd.medium += 1,
				CrowdLevel::High => route.crowd.high += 1,
			}
			route.vehicles.push(VehicleSummary {
				id: vehicle.id.clone(),
				lat: vehicle.position.lat(),
				lng: vehicle.position.lng(),
				crowd_level: vehicle.crowd_level,
				last_stop: vehicle.last_stop_label.clone(),
				updated_at: vehicle.updated_at,
			});
		}
		Self {
			as_of,
			active_vehicles,
			routes: routes.into_values().collect(),
		}
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string_pretty(self)
	}
}
