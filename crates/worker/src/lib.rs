//! Shared task runtime primitives for the live fleet services.
//!
//! * [`TaskClass`]: execution class attached to every spawned task for observability.
//! * [`spawn`]: runtime-aware task spawning.
//! * [`ScopedTask`]: owned task handle that cancels on drop and joins on shutdown.
//! * [`GenerationClock`] / [`GenerationToken`]: per-attempt lifecycle identity.
//! * [`Backoff`]: capped, jittered exponential retry delays.

mod backoff;
mod class;
mod join;
mod spawn;
mod token;

pub use backoff::Backoff;
pub use class::TaskClass;
pub use join::{ScopedTask, ShutdownReport};
pub use spawn::spawn;
pub use token::{GenerationClock, GenerationToken};
pub use tokio_util::sync::CancellationToken;
