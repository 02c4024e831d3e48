use axum::extract::State;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use ridenest_ride::RideError;

use crate::{error::AppError, state::AppState};

/// Prometheus registry for the API process.
pub struct Metrics {
    registry: Registry,
    ride_operations: IntCounterVec,
    frames_sent: IntCounter,
    frames_dropped: IntCounter,
    active_connections: IntGauge,
    live_locations: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ride_operations = IntCounterVec::new(
            Opts::new("ridenest_ride_operations_total", "Ride lifecycle operations by outcome"),
            &["operation", "outcome"],
        )?;
        let frames_sent = IntCounter::new("ridenest_hub_frames_sent_total", "Frames enqueued to clients")?;
        let frames_dropped = IntCounter::new(
            "ridenest_hub_frames_dropped_total",
            "Frames dropped because a client queue was full or closed",
        )?;
        let active_connections = IntGauge::new("ridenest_hub_connections", "Open real-time connections")?;
        let live_locations = IntGauge::new("ridenest_hub_live_locations", "Rides with a cached vehicle position")?;

        registry.register(Box::new(ride_operations.clone()))?;
        registry.register(Box::new(frames_sent.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(active_connections.clone()))?;
        registry.register(Box::new(live_locations.clone()))?;

        Ok(Self {
            registry,
            ride_operations,
            frames_sent,
            frames_dropped,
            active_connections,
            live_locations,
        })
    }

    pub fn record<T>(&self, operation: &str, result: &Result<T, RideError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => outcome_label(e),
        };
        self.ride_operations.with_label_values(&[operation, outcome]).inc();
    }

    fn export(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::InternalServerError(format!("Metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| AppError::InternalServerError(e.to_string()))
    }
}

fn outcome_label(err: &RideError) -> &'static str {
    match err {
        RideError::Validation(_) => "validation",
        RideError::NotFound(_) | RideError::PassengerNotFound { .. } => "not_found",
        RideError::InvalidState { .. } => "invalid_state",
        RideError::Capacity { .. } => "capacity",
        RideError::Duplicate(_) => "duplicate",
        RideError::Authorization(_) => "forbidden",
        RideError::StoreTimeout => "timeout",
        RideError::Contention(_) => "contention",
        RideError::Store(_) => "store_error",
    }
}

/// `GET /metrics`. Hub counters are folded in at scrape time.
pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, AppError> {
    let stats = state.hub.stats().await;
    let metrics = &state.metrics;

    metrics
        .frames_sent
        .inc_by(stats.frames_sent.saturating_sub(metrics.frames_sent.get()));
    metrics
        .frames_dropped
        .inc_by(stats.frames_dropped.saturating_sub(metrics.frames_dropped.get()));
    metrics.active_connections.set(stats.connections as i64);
    metrics.live_locations.set(stats.live_locations as i64);

    metrics.export()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_outcomes_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record::<()>("join", &Ok(()));
        metrics.record::<()>("join", &Err(RideError::Capacity { capacity: 4 }));

        let text = metrics.export().unwrap();
        assert!(text.contains(r#"ridenest_ride_operations_total{operation="join",outcome="capacity"} 1"#));
        assert!(text.contains(r#"ridenest_ride_operations_total{operation="join",outcome="ok"} 1"#));
    }
}
