pub mod geo;
pub mod models;
pub mod pii;

pub use geo::{GeoPoint, Location};
pub use models::vehicle::VehicleClass;
pub use pii::Masked;
