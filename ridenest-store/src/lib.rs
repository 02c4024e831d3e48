pub mod app_config;
pub mod memory_repo;
pub mod redis_repo;

pub use memory_repo::{InMemoryRatingRepository, InMemoryRideRepository};
pub use redis_repo::RedisClient;
