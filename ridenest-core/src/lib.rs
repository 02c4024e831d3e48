pub mod access;
pub mod identity;
pub mod models;
pub mod notifier;
pub mod repository;

pub use access::{AccessError, AccessGate, Operation};
pub use identity::{Identity, Role, TokenVerifier};
pub use models::{FareShare, Passenger, PassengerStatus, Rating, Ride, RideStatus, RideType, RouteSummary, VehicleRef};
pub use notifier::{NoopNotifier, RideEvent, RideNotifier};
pub use repository::{RatingRepository, RideRepository, StoreError};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: RideStatus, to: RideStatus },
    #[error("Identity verification failed: {0}")]
    IdentityError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
