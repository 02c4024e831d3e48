use chrono::{DateTime, Utc};
use ridenest_shared::{Location, VehicleClass};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Ride status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RideStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Confirmed => "confirmed",
            RideStatus::InProgress => "in-progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
            RideStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled | RideStatus::Rejected)
    }

    /// The vehicle is expected to be streaming its position.
    pub fn tracks_location(&self) -> bool {
        matches!(self, RideStatus::Confirmed | RideStatus::InProgress)
    }

    /// Transition matrix:
    ///
    /// ```text
    /// pending ──> confirmed ──> in-progress ──> completed
    ///    │            │
    ///    ├──> rejected│
    ///    └──> cancelled <┘
    /// ```
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        use RideStatus::*;
        matches!(
            (*self, next),
            (Pending, Confirmed)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (InProgress, Completed)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RideType {
    OfficeCommute,
    EventTransport,
    TourGroup,
    Pool,
    Custom,
    SheMode,
}

impl RideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideType::OfficeCommute => "office-commute",
            RideType::EventTransport => "event-transport",
            RideType::TourGroup => "tour-group",
            RideType::Pool => "pool",
            RideType::Custom => "custom",
            RideType::SheMode => "she-mode",
        }
    }
}

/// Passenger entry status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PassengerStatus {
    Requested,
    Confirmed,
    Cancelled,
}

impl PassengerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassengerStatus::Requested => "requested",
            PassengerStatus::Confirmed => "confirmed",
            PassengerStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FareShare {
    pub amount: i64,
    pub paid: bool,
}

/// One rider's seat on a ride
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Passenger {
    pub user_id: String,
    pub pickup: Location,
    pub dropoff: Location,
    pub fare: FareShare,
    pub status: PassengerStatus,
    pub joined_at: DateTime<Utc>,
    /// Opaque reference to a stored payment method; never interpreted here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
}

impl Passenger {
    pub fn new(user_id: String, pickup: Location, dropoff: Location, status: PassengerStatus) -> Self {
        Self {
            user_id,
            pickup,
            dropoff,
            fare: FareShare::default(),
            status,
            joined_at: Utc::now(),
            payment_method: None,
        }
    }
}

/// Route result handed in by the routing provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RouteSummary {
    /// Meters
    pub distance: f64,
    /// Seconds
    pub duration: f64,
    #[serde(default)]
    pub optimized: bool,
}

impl RouteSummary {
    pub fn is_valid(&self) -> bool {
        self.distance.is_finite()
            && self.duration.is_finite()
            && self.distance > 0.0
            && self.duration >= 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleRef {
    #[serde(default)]
    pub id: Option<String>,
    pub class: VehicleClass,
}

/// Running average of scores a user has received.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Rating {
    pub average: f64,
    pub count: u64,
}

impl Rating {
    /// Incremental mean; no score history is kept.
    pub fn record(&self, score: u8) -> Rating {
        let count = self.count + 1;
        Rating {
            average: (self.average * self.count as f64 + f64::from(score)) / count as f64,
            count,
        }
    }
}

/// A scheduled group trip and its roster. Persisted as one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub ride_type: RideType,
    pub status: RideStatus,
    pub requester_id: String,
    pub driver_id: Option<String>,
    pub vehicle: VehicleRef,
    pub scheduled_time: DateTime<Utc>,
    pub passengers: Vec<Passenger>,
    pub route: RouteSummary,
    pub total_fare: i64,
    /// Users who already submitted a rating for this ride
    #[serde(default)]
    pub rated_by: Vec<String>,
    /// Compare-and-swap token, bumped by every successful write
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn new(
        ride_type: RideType,
        requester_id: String,
        vehicle: VehicleRef,
        scheduled_time: DateTime<Utc>,
        route: RouteSummary,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ride_type,
            status: RideStatus::Pending,
            requester_id,
            driver_id: None,
            vehicle,
            scheduled_time,
            passengers: Vec::new(),
            route,
            total_fare: 0,
            rated_by: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn capacity(&self) -> usize {
        self.vehicle.class.capacity()
    }

    pub fn seats_available(&self) -> usize {
        self.capacity().saturating_sub(self.passengers.len())
    }

    pub fn passenger(&self, user_id: &str) -> Option<&Passenger> {
        self.passengers.iter().find(|p| p.user_id == user_id)
    }

    pub fn has_passenger(&self, user_id: &str) -> bool {
        self.passenger(user_id).is_some()
    }

    pub fn is_driver(&self, user_id: &str) -> bool {
        self.driver_id.as_deref() == Some(user_id)
    }

    /// Driver, passenger or the user who requested the ride.
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.is_driver(user_id) || self.has_passenger(user_id) || self.requester_id == user_id
    }

    /// Remove a passenger entry, returning it.
    pub fn remove_passenger(&mut self, user_id: &str) -> Option<Passenger> {
        let index = self.passengers.iter().position(|p| p.user_id == user_id)?;
        Some(self.passengers.remove(index))
    }

    /// Write a freshly computed split onto the ride and every passenger entry.
    pub fn apply_split(&mut self, total: i64, per_person: i64) {
        self.total_fare = total;
        for passenger in &mut self.passengers {
            passenger.fare.amount = per_person;
        }
    }

    /// `|sum(shares) - total|`; zero for an empty roster.
    pub fn fare_drift(&self) -> i64 {
        if self.passengers.is_empty() {
            return 0;
        }
        let collected: i64 = self.passengers.iter().map(|p| p.fare.amount).sum();
        (collected - self.total_fare).abs()
    }

    /// Move to `next` if the transition matrix allows it.
    pub fn transition(&mut self, next: RideStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
