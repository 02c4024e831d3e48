pub mod error;
pub mod manager;

pub use error::RideError;
pub use manager::{RideLifecycleManager, RideRequest};
