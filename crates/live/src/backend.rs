use async_trait::async_trait;
use convoy_primitives::ChangeEvent;
use tokio::sync::mpsc;

use crate::{ChannelError, RawChange, VehicleRow};

/// Inbound change messages for one subscription.
///
/// The stream ends (or yields an error) when the subscription drops; dropping
/// the receiver unsubscribes.
pub type ChangeStream = mpsc::Receiver<Result<RawChange, ChannelError>>;

/// The realtime fleet service.
#[async_trait]
pub trait FleetBackend: Send + Sync + 'static {
	/// Bulk read of every active row.
	async fn fetch_all(&self) -> Result<Vec<VehicleRow>, ChannelError>;

	/// Opens a live change subscription on the fleet topic.
	async fn subscribe(&self) -> Result<ChangeStream, ChannelError>;

	/// Writes one change for a vehicle. The service echoes it to every
	/// subscriber, including the publisher, with a server-assigned timestamp.
	async fn publish(&self, event: ChangeEvent) -> Result<(), ChannelError>;
}
