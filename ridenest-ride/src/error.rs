use ridenest_core::{CoreError, RideStatus, StoreError};
use ridenest_fare::FareError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RideError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Ride not found: {0}")]
    NotFound(Uuid),

    #[error("Passenger {user_id} is not on ride {ride_id}")]
    PassengerNotFound { ride_id: Uuid, user_id: String },

    #[error("Ride is {status}, cannot {action}")]
    InvalidState { status: RideStatus, action: String },

    #[error("Ride is full ({capacity} seats)")]
    Capacity { capacity: usize },

    #[error("Duplicate request: {0}")]
    Duplicate(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    /// The store did not answer within the deadline. Safe to retry.
    #[error("Ride store timed out")]
    StoreTimeout,

    /// Every optimistic retry lost to a concurrent writer.
    #[error("Ride {0} is being modified concurrently, retry later")]
    Contention(Uuid),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl RideError {
    /// Transient failures a client may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RideError::StoreTimeout | RideError::Contention(_))
    }
}

impl From<StoreError> for RideError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RideError::NotFound(id),
            other => RideError::Store(other),
        }
    }
}

impl From<CoreError> for RideError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => RideError::Validation(msg),
            CoreError::InvalidTransition { from, to } => RideError::InvalidState {
                status: from,
                action: format!("move to {}", to),
            },
            CoreError::IdentityError(msg) => RideError::Authorization(msg),
        }
    }
}

impl From<FareError> for RideError {
    fn from(err: FareError) -> Self {
        RideError::Validation(err.to_string())
    }
}
