use ridenest_shared::VehicleClass;
use serde::{Deserialize, Serialize};

/// Tariff used by the fare engine. All amounts are in whole currency units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FareConfig {
    /// Flag-fall charged on every ride
    #[serde(default = "default_base_fare")]
    pub base_fare: f64,

    #[serde(default = "default_per_km_rate")]
    pub per_km_rate: f64,

    #[serde(default = "default_per_min_rate")]
    pub per_min_rate: f64,

    /// Floor applied after the class multiplier
    #[serde(default = "default_minimum_fare")]
    pub minimum_fare: f64,

    #[serde(default = "default_sedan_multiplier")]
    pub sedan_multiplier: f64,

    #[serde(default = "default_suv_multiplier")]
    pub suv_multiplier: f64,

    #[serde(default = "default_van_multiplier")]
    pub van_multiplier: f64,
}

fn default_base_fare() -> f64 { 30.0 }
fn default_per_km_rate() -> f64 { 8.0 }
fn default_per_min_rate() -> f64 { 1.0 }
fn default_minimum_fare() -> f64 { 75.0 }
fn default_sedan_multiplier() -> f64 { 1.0 }
fn default_suv_multiplier() -> f64 { 1.2 }
fn default_van_multiplier() -> f64 { 1.5 }

impl Default for FareConfig {
    fn default() -> Self {
        Self {
            base_fare: default_base_fare(),
            per_km_rate: default_per_km_rate(),
            per_min_rate: default_per_min_rate(),
            minimum_fare: default_minimum_fare(),
            sedan_multiplier: default_sedan_multiplier(),
            suv_multiplier: default_suv_multiplier(),
            van_multiplier: default_van_multiplier(),
        }
    }
}

impl FareConfig {
    pub fn multiplier(&self, class: VehicleClass) -> f64 {
        match class {
            VehicleClass::Sedan => self.sedan_multiplier,
            VehicleClass::Suv => self.suv_multiplier,
            VehicleClass::Van => self.van_multiplier,
        }
    }
}

/// Result of a fare computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FareQuote {
    pub total: i64,
    pub per_person: i64,
    pub passenger_count: usize,
}

/// Pure fare computation. Holds no state besides its tariff.
#[derive(Debug, Clone, Default)]
pub struct FareEngine {
    config: FareConfig,
}

impl FareEngine {
    pub fn new(config: FareConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FareConfig {
        &self.config
    }

    /// Total fare for a route, before splitting.
    ///
    /// `base + km * per_km + min * per_min`, scaled by the class multiplier,
    /// floored at the minimum fare and rounded half away from zero.
    pub fn total(
        &self,
        distance_meters: f64,
        duration_seconds: f64,
        class: VehicleClass,
    ) -> Result<i64, FareError> {
        if !distance_meters.is_finite() || distance_meters < 0.0 {
            return Err(FareError::InvalidInput(format!("distance {}", distance_meters)));
        }
        if !duration_seconds.is_finite() || duration_seconds < 0.0 {
            return Err(FareError::InvalidInput(format!("duration {}", duration_seconds)));
        }

        let distance_km = distance_meters / 1000.0;
        let duration_min = duration_seconds / 60.0;

        let mut fare = self.config.base_fare
            + distance_km * self.config.per_km_rate
            + duration_min * self.config.per_min_rate;
        fare *= self.config.multiplier(class);

        if fare < self.config.minimum_fare {
            fare = self.config.minimum_fare;
        }

        Ok(fare.round() as i64)
    }

    /// Total fare plus the share each of `passenger_count` riders pays.
    pub fn quote(
        &self,
        distance_meters: f64,
        duration_seconds: f64,
        class: VehicleClass,
        passenger_count: usize,
    ) -> Result<FareQuote, FareError> {
        let total = self.total(distance_meters, duration_seconds, class)?;
        Ok(FareQuote {
            total,
            per_person: per_person(total, passenger_count),
            passenger_count,
        })
    }
}

/// `round(total / n)`, or the whole total when nobody is aboard.
///
/// Each share is rounded independently, so `n * share` may differ from `total`
/// by at most `n / 2` units.
pub fn per_person(total: i64, passenger_count: usize) -> i64 {
    if passenger_count == 0 {
        return total;
    }
    (total as f64 / passenger_count as f64).round() as i64
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FareError {
    #[error("Invalid fare input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_van_group_quote() {
        let engine = FareEngine::default();

        // (30 + 10km*8 + 20min*1) * 1.5 = 195
        let quote = engine.quote(10_000.0, 1_200.0, VehicleClass::Van, 4).unwrap();
        assert_eq!(quote.total, 195);
        assert_eq!(quote.per_person, 49);

        // Rounding slack is bounded by the passenger count
        let drift = (quote.per_person * 4 - quote.total).abs();
        assert!(drift <= 4);

        let quote = engine.quote(10_000.0, 1_200.0, VehicleClass::Van, 5).unwrap();
        assert_eq!(quote.total, 195);
        assert_eq!(quote.per_person, 39);
    }

    #[test]
    fn test_minimum_fare_floor() {
        let engine = FareEngine::default();

        // 30 + 8 + 2 = 40, below the floor
        let total = engine.total(1_000.0, 120.0, VehicleClass::Sedan).unwrap();
        assert_eq!(total, 75);
    }

    #[test]
    fn test_suv_multiplier() {
        let engine = FareEngine::default();

        // (30 + 80 + 20) * 1.2 = 156
        let total = engine.total(10_000.0, 1_200.0, VehicleClass::Suv).unwrap();
        assert_eq!(total, 156);
    }

    #[test]
    fn test_empty_ride_keeps_total() {
        assert_eq!(per_person(195, 0), 195);
    }

    #[test]
    fn test_split_slack_for_every_group_size() {
        let engine = FareEngine::default();
        for distance in [2_500.0, 10_000.0, 37_300.0] {
            for class in VehicleClass::ALL {
                let total = engine.total(distance, 1_500.0, class).unwrap();
                for n in 1..=class.capacity() {
                    let share = per_person(total, n);
                    assert!((share * n as i64 - total).abs() <= n as i64);
                }
            }
        }
    }

    #[test]
    fn test_rejects_bad_route_numbers() {
        let engine = FareEngine::default();
        assert!(engine.total(-1.0, 60.0, VehicleClass::Sedan).is_err());
        assert!(engine.total(1_000.0, f64::INFINITY, VehicleClass::Sedan).is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: FareConfig = serde_json::from_str(r#"{"base_fare": 50.0}"#).unwrap();
        assert_eq!(config.base_fare, 50.0);
        assert_eq!(config.minimum_fare, 75.0);
        assert_eq!(config.multiplier(VehicleClass::Van), 1.5);
    }
}
