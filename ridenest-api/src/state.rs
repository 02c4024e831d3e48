use anyhow::Context;
use ridenest_core::{AccessGate, RatingRepository, RideNotifier, RideRepository, TokenVerifier};
use ridenest_fare::FareEngine;
use ridenest_hub::{CoordinationHub, HubConfig};
use ridenest_ride::RideLifecycleManager;
use ridenest_store::app_config::{Config, RateLimitConfig, StoreBackend};
use ridenest_store::{InMemoryRatingRepository, InMemoryRideRepository, RedisClient};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;
use crate::middleware::{CircuitBreaker, JwtVerifier};

#[derive(Clone)]
pub struct AppState {
    pub rides: Arc<RideLifecycleManager>,
    pub hub: Arc<CoordinationHub>,
    pub gate: Arc<AccessGate>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Present only with the redis backend; the rate limiter is off without it
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit: RateLimitConfig,
    pub metrics: Arc<Metrics>,
    pub breaker: Arc<CircuitBreaker>,
}

impl AppState {
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let state = match config.store.backend {
            StoreBackend::Memory => {
                tracing::info!("Using in-memory ride store");
                Self::assemble(
                    config,
                    Arc::new(InMemoryRideRepository::new()),
                    Arc::new(InMemoryRatingRepository::new()),
                    None,
                )
            }
            StoreBackend::Redis => {
                let url = config
                    .store
                    .redis_url
                    .as_deref()
                    .context("store.redis_url is not set")?;
                let client = Arc::new(RedisClient::new(url).await.context("Failed to connect to Redis")?);
                tracing::info!("Using Redis ride store");
                Self::assemble(config, client.clone(), client.clone(), Some(client))
            }
        }?;

        // Rides already under way keep streaming across a restart
        let under_way = state.rides.rides_under_way().await.context("Failed to load rides under way")?;
        for ride_id in under_way {
            state.hub.track_ride(ride_id).await;
        }
        Ok(state)
    }

    /// Wire the services over the given repositories.
    pub fn assemble(
        config: &Config,
        rides: Arc<dyn RideRepository>,
        ratings: Arc<dyn RatingRepository>,
        redis: Option<Arc<RedisClient>>,
    ) -> anyhow::Result<Self> {
        let hub = Arc::new(CoordinationHub::new(HubConfig {
            queue_capacity: config.hub.outbound_queue_capacity,
            location_capacity: config.hub.location_cache_capacity,
            location_ttl: Duration::from_secs(config.hub.location_ttl_seconds),
        }));

        let notifier: Arc<dyn RideNotifier> = hub.clone();
        let manager = RideLifecycleManager::new(rides, ratings, notifier, FareEngine::new(config.fare.clone()))
            .with_deadline(Duration::from_millis(config.store.deadline_ms))
            .with_max_retries(config.store.max_retries);

        Ok(Self {
            rides: Arc::new(manager),
            hub,
            gate: Arc::new(AccessGate::new()),
            verifier: Arc::new(JwtVerifier::new(&config.auth.jwt_secret)),
            redis,
            rate_limit: config.rate_limit.clone(),
            metrics: Arc::new(Metrics::new().context("Failed to register metrics")?),
            breaker: Arc::new(CircuitBreaker::new("ride-store", 5, Duration::from_secs(30))),
        })
    }
}
