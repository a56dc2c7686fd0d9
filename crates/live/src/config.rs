//! TOML configuration for the live services.
//!
//! Every section and field is optional; absent values take the defaults
//! below. Unknown keys are rejected so typos surface at load time.

use std::path::Path;
use std::time::Duration;

use convoy_primitives::VehicleId;
use convoy_worker::Backoff;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvoyConfig {
	pub link: LinkConfig,
	pub broadcast: BroadcastConfig,
	pub store: StoreConfig,
}

/// Subscription reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
	pub initial_backoff_ms: u64,
	pub max_backoff_ms: u64,
	pub backoff_multiplier: f64,
	/// Fraction of each delay randomized in both directions.
	pub jitter: f64,
	/// Retries allowed after consecutive failures before giving up; 0 retries forever.
	pub max_attempts: u32,
	/// Capacity of the lifecycle event channel.
	pub event_buffer: usize,
}

impl Default for LinkConfig {
	fn default() -> Self {
		Self {
			initial_backoff_ms: 250,
			max_backoff_ms: 10_000,
			backoff_multiplier: 2.0,
			jitter: 0.2,
			max_attempts: 0,
			event_buffer: 256,
		}
	}
}

impl LinkConfig {
	pub fn backoff(&self) -> Backoff {
		Backoff::new(Duration::from_millis(self.initial_backoff_ms), Duration::from_millis(self.max_backoff_ms))
			.multiplier(self.backoff_multiplier)
			.jitter(self.jitter)
			.max_attempts((self.max_attempts > 0).then_some(self.max_attempts))
	}
}

/// Operator position broadcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BroadcastConfig {
	pub enabled: bool,
	/// Vehicle this device reports for. Broadcasting is idle while unset.
	pub self_id: Option<VehicleId>,
	pub interval_ms: u64,
	/// Movement below this distance since the last emitted sample is suppressed.
	pub min_distance_m: f64,
	/// Exponential smoothing weight for new samples; 1 disables smoothing.
	pub smoothing: f64,
	/// Samples reporting a worse accuracy radius are dropped.
	pub max_accuracy_m: f64,
}

impl Default for BroadcastConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			self_id: None,
			interval_ms: 3_000,
			min_distance_m: 10.0,
			smoothing: 1.0,
			max_accuracy_m: 100.0,
		}
	}
}

impl BroadcastConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}
}

/// Store housekeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
	/// How long delete tombstones are kept to discard late stale updates.
	pub tombstone_retention_ms: u64,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			tombstone_retention_ms: 600_000,
		}
	}
}

impl StoreConfig {
	pub fn tombstone_retention(&self) -> Duration {
		Duration::from_millis(self.tombstone_retention_ms)
	}
}

impl ConvoyConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(content)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads, parses and validates a TOML file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&content)
	}

	/// Renders the effective configuration as TOML.
	pub fn to_toml_string(&self) -> Result<String, ConfigError> {
		Ok(toml::to_string_pretty(self)?)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
			ConfigError::Invalid { field, reason: reason.into() }
		}

		let link = &self.link;
		if link.initial_backoff_ms == 0 {
			return Err(invalid("link.initial_backoff_ms", "must be positive"));
		}
		if link.max_backoff_ms < link.initial_backoff_ms {
			return Err(invalid("link.max_backoff_ms", "must be at least link.initial_backoff_ms"));
		}
		if !(1.0..).contains(&link.backoff_multiplier) {
			return Err(invalid("link.backoff_multiplier", "must be >= 1.0"));
		}
		if !(0.0..=1.0).contains(&link.jitter) {
			return Err(invalid("link.jitter", "must be within [0, 1]"));
		}
		if link.event_buffer == 0 {
			return Err(invalid("link.event_buffer", "must be positive"));
		}

		let broadcast = &self.broadcast;
		if broadcast.interval_ms == 0 {
			return Err(invalid("broadcast.interval_ms", "must be positive"));
		}
		if !(0.0..).contains(&broadcast.min_distance_m) {
			return Err(invalid("broadcast.min_distance_m", "must be non-negative"));
		}
		if broadcast.smoothing.is_nan() || broadcast.smoothing <= 0.0 || broadcast.smoothing > 1.0 {
			return Err(invalid("broadcast.smoothing", "must be within (0, 1]"));
		}
		if broadcast.max_accuracy_m.is_nan() || broadcast.max_accuracy_m <= 0.0 {
			return Err(invalid("broadcast.max_accuracy_m", "must be positive"));
		}
		Ok(())
	}
}
