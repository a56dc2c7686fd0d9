//! Read-only views over the fleet store.
//!
//! * [`project`]: filtered, id-ordered projection of one snapshot.
//! * [`MarkerDiff`] / [`MarkerSet`]: create/move/remove reconciliation of
//!   per-view markers, so a marker lives exactly as long as its vehicle stays
//!   in the projection.
//! * [`FleetView`]: a snapshot subscription bound to a filter and a marker set.
//! * [`advisory`]: serializable fleet summary for external consumers.
//!
//! Nothing here writes to the store.

pub mod advisory;
mod markers;
mod projection;
mod session;

pub use advisory::FleetSummary;
pub use markers::{MarkerDiff, MarkerLayer, MarkerSet, ReconcileStats};
pub use projection::{Projection, ProjectionFilter, project};
pub use session::FleetView;
