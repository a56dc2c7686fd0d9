//! Live fleet plumbing around the [`convoy_store`] reducer.
//!
//! * [`SubscriptionManager`]: owns the change-channel lifecycle
//!   (`Disconnected → Connecting → Synced → Degraded`), rebuilds the store
//!   from a bulk read on every (re)connect, and folds live events one at a
//!   time into the [`EntityStore`](convoy_store::EntityStore).
//! * [`PositionBroadcaster`]: samples the operator device on a timer and
//!   publishes throttled position updates for the configured self vehicle.
//! * [`FleetBackend`]: the seam to the realtime service; [`MemoryBackend`]
//!   is an in-process implementation with fault injection.
//! * [`wire`]: mapping between realtime messages and [`ChangeEvent`](convoy_primitives::ChangeEvent)s.
//! * [`ConvoyConfig`]: TOML configuration for all of the above.

pub mod backend;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod memory;
pub mod subscription;
pub mod wire;

pub use backend::{ChangeStream, FleetBackend};
pub use broadcast::{BroadcastStats, BroadcasterHandle, LatestSample, PositionBroadcaster, PositionSample, PositionSource, SampleSender, sample_channel};
pub use config::{BroadcastConfig, ConvoyConfig, LinkConfig, StoreConfig};
pub use error::{ChannelError, ConfigError, LinkError};
pub use memory::MemoryBackend;
pub use subscription::{LinkEvent, LinkState, LinkStatus, SubscriptionHandle, SubscriptionManager};
pub use wire::{RawChange, VehicleRow};
