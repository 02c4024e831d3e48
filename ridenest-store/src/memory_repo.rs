use async_trait::async_trait;
use ridenest_core::{Rating, RatingRepository, Ride, RideRepository, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Process-local ride store for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryRideRepository {
    rides: Arc<RwLock<HashMap<Uuid, Ride>>>,
}

impl InMemoryRideRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RideRepository for InMemoryRideRepository {
    async fn insert(&self, ride: &Ride) -> Result<(), StoreError> {
        let mut rides = self.rides.write().await;
        if rides.contains_key(&ride.id) {
            return Err(StoreError::AlreadyExists(ride.id));
        }
        rides.insert(ride.id, ride.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Ride>, StoreError> {
        Ok(self.rides.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Ride>, StoreError> {
        Ok(self.rides.read().await.values().cloned().collect())
    }

    async fn compare_and_swap(&self, ride: &Ride, expected_version: u64) -> Result<(), StoreError> {
        let mut rides = self.rides.write().await;
        let stored = rides.get_mut(&ride.id).ok_or(StoreError::NotFound(ride.id))?;

        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                ride_id: ride.id,
                expected: expected_version,
            });
        }

        *stored = ride.clone();
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRatingRepository {
    ratings: Arc<Mutex<HashMap<String, Rating>>>,
}

impl InMemoryRatingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RatingRepository for InMemoryRatingRepository {
    async fn get_rating(&self, user_id: &str) -> Result<Rating, StoreError> {
        Ok(self.ratings.lock().await.get(user_id).copied().unwrap_or_default())
    }

    async fn record_rating(&self, user_id: &str, score: u8) -> Result<Rating, StoreError> {
        let mut ratings = self.ratings.lock().await;
        let entry = ratings.entry(user_id.to_string()).or_default();
        *entry = entry.record(score);
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ridenest_core::{RideType, RouteSummary, VehicleRef};
    use ridenest_shared::VehicleClass;

    fn ride() -> Ride {
        Ride::new(
            RideType::Pool,
            "rider-1".to_string(),
            VehicleRef { id: Some("KA-01-1234".to_string()), class: VehicleClass::Sedan },
            Utc::now(),
            RouteSummary { distance: 5_000.0, duration: 900.0, optimized: true },
        )
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let repo = InMemoryRideRepository::new();
        let mut ride = ride();
        repo.insert(&ride).await.unwrap();

        ride.total_fare = 120;
        ride.version = 1;
        repo.compare_and_swap(&ride, 0).await.unwrap();

        // A writer still holding version 0 loses
        let mut stale = ride.clone();
        stale.total_fare = 999;
        stale.version = 1;
        let result = repo.compare_and_swap(&stale, 0).await;
        assert_eq!(result, Err(StoreError::Conflict { ride_id: ride.id, expected: 0 }));

        let stored = repo.get(ride.id).await.unwrap().unwrap();
        assert_eq!(stored.total_fare, 120);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_and_missing_ride() {
        let repo = InMemoryRideRepository::new();
        let ride = ride();
        repo.insert(&ride).await.unwrap();
        assert_eq!(repo.insert(&ride).await, Err(StoreError::AlreadyExists(ride.id)));

        let ghost = self::ride();
        assert_eq!(repo.compare_and_swap(&ghost, 0).await, Err(StoreError::NotFound(ghost.id)));
        assert!(repo.get(ghost.id).await.unwrap().is_none());
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rating_running_average() {
        let repo = InMemoryRatingRepository::new();
        repo.record_rating("driver-1", 5).await.unwrap();
        repo.record_rating("driver-1", 4).await.unwrap();
        let rating = repo.record_rating("driver-1", 3).await.unwrap();

        assert_eq!(rating.count, 3);
        assert!((rating.average - 4.0).abs() < 1e-9);
        assert_eq!(repo.get_rating("nobody").await.unwrap(), Rating::default());
    }
}
