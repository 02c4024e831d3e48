use async_trait::async_trait;

use crate::models::{Ride, RideStatus};

/// Committed ride changes, emitted after the store write succeeds.
#[derive(Debug, Clone)]
pub enum RideEvent {
    Created(Ride),
    /// Passenger joined or left; fare shares were recomputed.
    RosterChanged(Ride),
    StatusChanged { ride: Ride, previous: RideStatus },
}

impl RideEvent {
    pub fn ride(&self) -> &Ride {
        match self {
            RideEvent::Created(ride) | RideEvent::RosterChanged(ride) => ride,
            RideEvent::StatusChanged { ride, .. } => ride,
        }
    }
}

/// Receives ride changes for real-time fan-out. Delivery is best-effort:
/// implementations must not fail the caller.
#[async_trait]
pub trait RideNotifier: Send + Sync {
    async fn notify(&self, event: RideEvent);
}

pub struct NoopNotifier;

#[async_trait]
impl RideNotifier for NoopNotifier {
    async fn notify(&self, _event: RideEvent) {}
}
