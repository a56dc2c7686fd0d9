//! Core value types shared by every convoy crate.
//!
//! * [`VehicleSnapshot`]: one tracked vehicle at one instant.
//! * [`VehiclePatch`]: a partial set of snapshot fields carried by change events.
//! * [`ChangeEvent`]: an insert, update or delete notification for one vehicle.
//! * [`GeoPoint`]: a validated latitude/longitude pair.
//! * [`Timestamp`]: the source-supplied instant used for conflict resolution.

pub mod error;
pub mod event;
pub mod geo;
pub mod time;
pub mod vehicle;

pub use error::ValidationError;
pub use event::{ChangeEvent, EventKind};
pub use geo::{BoundingBox, GeoPoint};
pub use time::Timestamp;
pub use vehicle::{CrowdLevel, VehicleId, VehiclePatch, VehicleSnapshot};
