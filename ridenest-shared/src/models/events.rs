//! Real-time channel frames.
//!
//! Every frame is a JSON object tagged by `event`, e.g.
//! `{"event": "vehicle-location", "rideId": "...", "lat": 18.43, "lng": 79.12}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames sent by a client to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRide { ride_id: Uuid },
    LeaveRide { ride_id: Uuid },
    /// Driver-only: latest vehicle position for a ride.
    VehicleLocation { ride_id: Uuid, lat: f64, lng: f64 },
    JoinGroupChat { group_id: String },
    LeaveGroupChat { group_id: String },
    /// The sender is taken from the connection's identity, never from the frame.
    GroupMessage { group_id: String, message: String },
    /// Driver dashboards subscribe here to hear about newly requested rides.
    JoinDispatch,
}

/// One line of the roster pushed to ride members after a join or cancellation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: String,
    pub status: String,
    pub fare: i64,
    pub paid: bool,
}

/// Frames pushed by the hub to channel members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum HubEvent {
    VehicleLocationUpdate {
        lat: f64,
        lng: f64,
    },
    NewMessage {
        sender: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    RideUpdated {
        ride_id: Uuid,
        passengers: Vec<RosterEntry>,
        total_fare: i64,
        per_person: i64,
    },
    RideStatus {
        ride_id: Uuid,
        status: String,
    },
    NewRide {
        ride_id: Uuid,
        ride_type: String,
        vehicle_class: String,
        scheduled_time: DateTime<Utc>,
        seats_available: usize,
        total_fare: i64,
    },
    Error {
        message: String,
    },
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::VehicleLocationUpdate { .. } => "vehicle-location-update",
            HubEvent::NewMessage { .. } => "new-message",
            HubEvent::RideUpdated { .. } => "ride-updated",
            HubEvent::RideStatus { .. } => "ride-status",
            HubEvent::NewRide { .. } => "new-ride",
            HubEvent::Error { .. } => "error",
        }
    }
}
