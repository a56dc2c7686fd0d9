//! Fleet state: the immutable [`FleetStore`] snapshot, the pure [`reduce`]
//! function that folds one [`ChangeEvent`](convoy_primitives::ChangeEvent)
//! into it, and the atomically published [`EntityStore`].
//!
//! # Mental model
//!
//! * Readers pin an `Arc<FleetStore>` and see one complete point-in-time fleet.
//! * The single writer reduces the current snapshot into a replacement and
//!   publishes it with CAS; readers holding the old snapshot are unaffected.
//! * Every vehicle is stored behind its own `Arc`, so a reduction that touches
//!   one vehicle shares every other entry with the previous snapshot.
//!
//! # Invariants
//!
//! * At most one snapshot per id; ids never change after creation.
//! * Updates and deletes older than the stored version are no-ops; equal
//!   timestamps resolve Delete > Update > Insert.
//! * A delete leaves a tombstone so a stale update cannot resurrect the vehicle,
//!   while a newer update re-inserts it.

mod fleet;
mod reducer;
mod store;

pub use fleet::{FleetStore, Version};
pub use reducer::{IgnoreReason, Outcome, Reduction, reduce};
pub use store::{EntityStore, RejectHook, StoreStats};

#[cfg(test)]
mod tests;
