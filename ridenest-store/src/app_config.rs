use ridenest_fare::FareConfig;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub fare: FareConfig,
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
    /// Deadline for a single store call
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Optimistic retries on a version conflict before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_deadline_ms() -> u64 { 2_000 }
fn default_max_retries() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct HubSettings {
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_location_capacity")]
    pub location_cache_capacity: usize,
    #[serde(default = "default_location_ttl")]
    pub location_ttl_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_queue_capacity() -> usize { 64 }
fn default_location_capacity() -> usize { 10_000 }
fn default_location_ttl() -> u64 { 300 }
fn default_sweep_interval() -> u64 { 30 }

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_queue_capacity(),
            location_cache_capacity: default_location_capacity(),
            location_ttl_seconds: default_location_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: i64,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
}

fn default_requests_per_window() -> i64 { 100 }
fn default_window_seconds() -> i64 { 60 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl Config {
    /// In-memory store with default tuning, for tests and quick local runs.
    pub fn in_memory(jwt_secret: &str) -> Self {
        Self {
            server: ServerConfig { port: 5000 },
            auth: AuthConfig {
                jwt_secret: jwt_secret.to_string(),
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                redis_url: None,
                deadline_ms: default_deadline_ms(),
                max_retries: default_max_retries(),
            },
            fare: FareConfig::default(),
            hub: HubSettings::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `RIDENEST_STORE__BACKEND=redis` sets `store.backend`
            .add_source(
                config::Environment::with_prefix("RIDENEST")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(config::ConfigError::Message(
                "store.redis_url is required when store.backend = \"redis\"".to_string(),
            ));
        }
        if self.hub.outbound_queue_capacity == 0 || self.hub.location_cache_capacity == 0 {
            return Err(config::ConfigError::Message(
                "hub queue and cache capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let raw = r#"
            [server]
            port = 5000

            [auth]
            jwt_secret = "dev-secret"

            [store]
            backend = "memory"
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.deadline_ms, 2_000);
        assert_eq!(config.hub.outbound_queue_capacity, 64);
        assert_eq!(config.fare.base_fare, 30.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_backend_needs_url() {
        let raw = r#"
            [server]
            port = 5000
            [auth]
            jwt_secret = "dev-secret"
            [store]
            backend = "redis"
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_in_memory_defaults_validate() {
        let config = Config::in_memory("secret");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.validate().is_ok());
    }
}
