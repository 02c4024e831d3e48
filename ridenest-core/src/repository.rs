use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Rating, Ride};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    /// Another writer committed first; re-read and retry.
    #[error("Version conflict on ride {ride_id}: expected {expected}")]
    Conflict { ride_id: Uuid, expected: u64 },
    #[error("Ride not found: {0}")]
    NotFound(Uuid),
    #[error("Ride already exists: {0}")]
    AlreadyExists(Uuid),
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Ride documents, one writer at a time per ride.
///
/// Every write after `insert` goes through `compare_and_swap`, so two writers that
/// read the same version can never both commit.
#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn insert(&self, ride: &Ride) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Ride>, StoreError>;

    async fn list(&self) -> Result<Vec<Ride>, StoreError>;

    /// Replace the stored document with `ride` only if the stored version still equals
    /// `expected_version`. The caller bumps `ride.version` beforehand.
    async fn compare_and_swap(&self, ride: &Ride, expected_version: u64) -> Result<(), StoreError>;
}

/// Per-user rating aggregates held in the user store.
#[async_trait]
pub trait RatingRepository: Send + Sync {
    async fn get_rating(&self, user_id: &str) -> Result<Rating, StoreError>;

    /// Fold one score into the running average atomically and return the new aggregate.
    async fn record_rating(&self, user_id: &str, score: u8) -> Result<Rating, StoreError>;
}
