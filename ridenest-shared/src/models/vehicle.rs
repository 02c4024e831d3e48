use serde::{Deserialize, Serialize};
use std::fmt;

/// Vehicle classes offered for group rides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VehicleClass {
    Sedan,
    #[serde(rename = "SUV")]
    Suv,
    Van,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [VehicleClass::Sedan, VehicleClass::Suv, VehicleClass::Van];

    /// Seats available to passengers (driver excluded).
    pub fn capacity(&self) -> usize {
        match self {
            VehicleClass::Sedan => 4,
            VehicleClass::Suv => 6,
            VehicleClass::Van => 12,
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleClass::Sedan => write!(f, "Sedan"),
            VehicleClass::Suv => write!(f, "SUV"),
            VehicleClass::Van => write!(f, "Van"),
        }
    }
}
