use ridenest_hub::CoordinationHub;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

/// Periodically drop live locations from vehicles that stopped reporting.
pub fn start_location_sweeper(hub: Arc<CoordinationHub>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Location sweeper started, every {:?}", every);
        loop {
            ticker.tick().await;
            hub.sweep_stale_locations().await;
        }
    })
}
