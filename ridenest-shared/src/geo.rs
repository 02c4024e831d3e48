use serde::{Deserialize, Serialize};

use crate::pii::Masked;

/// WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A pickup or dropoff point as entered by the rider.
///
/// The street address is personal data, so it never shows up in `Debug` output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub address: Masked<String>,
    pub coordinates: GeoPoint,
}

impl Location {
    pub fn new(address: impl Into<String>, coordinates: GeoPoint) -> Self {
        Self {
            address: Masked(address.into()),
            coordinates,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.address.0.trim().is_empty() && self.coordinates.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_bounds() {
        assert!(GeoPoint::new(18.4386, 79.1288).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_address_is_masked_in_debug() {
        let loc = Location::new("456 Office Park", GeoPoint::new(12.97, 77.60));
        let printed = format!("{:?}", loc);
        assert!(!printed.contains("Office Park"));

        let json = serde_json::to_value(&loc).unwrap();
        assert_eq!(json["address"], "456 Office Park");
    }
}
