use async_trait::async_trait;
use chrono::Utc;
use ridenest_core::{Identity, Ride, RideEvent, RideNotifier};
use ridenest_fare::per_person;
use ridenest_shared::models::events::{HubEvent, RosterEntry};
use ridenest_shared::GeoPoint;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::location::{LiveLocation, LocationCache};
use crate::registry::{ChannelId, ChannelRegistry, ConnectionHandle, ConnectionId, Frame, LocalChannelRegistry};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Frames buffered per connection before new ones are dropped
    pub queue_capacity: usize,
    pub location_capacity: usize,
    /// Live locations older than this are swept
    pub location_ttl: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            location_capacity: 10_000,
            location_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum HubError {
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("Invalid coordinates ({lat}, {lng})")]
    InvalidLocation { lat: f64, lng: f64 },
    #[error("Ride {0} is not streaming its location")]
    NotTracking(Uuid),
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

/// Counters read by the metrics endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub connections: usize,
    pub channels: usize,
    pub live_locations: usize,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// Channel fan-out and the live-location table.
///
/// Delivery is at-most-once: each receiver has a bounded queue and a full queue loses
/// the frame for that receiver only. The sender never waits on a slow client.
pub struct CoordinationHub {
    registry: Arc<dyn ChannelRegistry>,
    locations: Mutex<LocationCache>,
    /// Rides in a status that streams position; samples for any other ride are refused
    tracking: Mutex<HashSet<Uuid>>,
    queue_capacity: usize,
    counters: Counters,
}

impl CoordinationHub {
    pub fn new(config: HubConfig) -> Self {
        Self::with_registry(config, Arc::new(LocalChannelRegistry::new()))
    }

    pub fn with_registry(config: HubConfig, registry: Arc<dyn ChannelRegistry>) -> Self {
        let ttl = chrono::Duration::from_std(config.location_ttl).unwrap_or(chrono::Duration::minutes(5));
        Self {
            registry,
            locations: Mutex::new(LocationCache::new(config.location_capacity, ttl)),
            tracking: Mutex::new(HashSet::new()),
            queue_capacity: config.queue_capacity.max(1),
            counters: Counters::default(),
        }
    }

    /// Register a new client. The receiver drains into the client's socket.
    pub async fn connect(&self, identity: Identity) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        let (handle, rx) = ConnectionHandle::new(identity, self.queue_capacity);
        self.registry.register(handle.clone()).await;
        info!(connection = %handle.id, user_id = %handle.identity.user_id, "Client connected");
        (handle, rx)
    }

    /// Remove the connection from every channel. Safe to call more than once.
    pub async fn disconnect(&self, connection: ConnectionId) {
        let channels = self.registry.unregister(connection).await;
        if !channels.is_empty() {
            debug!(%connection, channels = channels.len(), "Connection left channels");
        }
    }

    /// Subscribe to a ride. A known live position is sent to the new member only.
    pub async fn join_ride(&self, connection: ConnectionId, ride_id: Uuid) -> Result<(), HubError> {
        self.join(connection, ChannelId::Ride(ride_id)).await?;

        let last = self.locations.lock().await.get(&ride_id);
        if let Some(location) = last {
            self.send_to(
                connection,
                &HubEvent::VehicleLocationUpdate {
                    lat: location.lat,
                    lng: location.lng,
                },
            )
            .await?;
        }
        Ok(())
    }

    pub async fn join_group(&self, connection: ConnectionId, group_id: String) -> Result<(), HubError> {
        self.join(connection, ChannelId::Group(group_id)).await
    }

    pub async fn join_dispatch(&self, connection: ConnectionId) -> Result<(), HubError> {
        self.join(connection, ChannelId::Dispatch).await
    }

    pub async fn leave(&self, connection: ConnectionId, channel: &ChannelId) {
        self.registry.leave(connection, channel).await;
    }

    /// Accept position samples for a ride. Called on startup for rides already under way;
    /// afterwards status notifications keep the set current.
    pub async fn track_ride(&self, ride_id: Uuid) {
        self.tracking.lock().await.insert(ride_id);
    }

    pub async fn is_tracking(&self, ride_id: Uuid) -> bool {
        self.tracking.lock().await.contains(&ride_id)
    }

    /// Record the vehicle position and push it to every other member of the ride channel.
    ///
    /// Only rides that are confirmed or in progress take samples.
    pub async fn publish_location(
        &self,
        connection: ConnectionId,
        ride_id: Uuid,
        lat: f64,
        lng: f64,
    ) -> Result<usize, HubError> {
        if !GeoPoint::new(lat, lng).is_valid() {
            return Err(HubError::InvalidLocation { lat, lng });
        }

        // Held across the upsert so a concurrent status change cannot slip between
        let tracking = self.tracking.lock().await;
        if !tracking.contains(&ride_id) {
            debug!(%ride_id, "Dropped location sample for a ride that is not under way");
            return Err(HubError::NotTracking(ride_id));
        }
        let evicted = self.locations.lock().await.upsert(ride_id, lat, lng, Utc::now());
        drop(tracking);
        if let Some(evicted) = evicted {
            debug!(ride_id = %evicted, "Location cache full, evicted stalest ride");
        }

        self.broadcast(
            &ChannelId::Ride(ride_id),
            &HubEvent::VehicleLocationUpdate { lat, lng },
            Some(connection),
        )
        .await
    }

    /// Stamp a chat line and send it to the whole group, sender included. Not stored.
    pub async fn group_message(&self, group_id: String, sender: String, message: String) -> Result<usize, HubError> {
        if message.trim().is_empty() {
            return Err(HubError::EmptyMessage);
        }
        let event = HubEvent::NewMessage {
            sender,
            message,
            timestamp: Utc::now(),
        };
        self.broadcast(&ChannelId::Group(group_id), &event, None).await
    }

    /// Encode once and enqueue for every member except `exclude`. Returns frames enqueued.
    pub async fn broadcast(
        &self,
        channel: &ChannelId,
        event: &HubEvent,
        exclude: Option<ConnectionId>,
    ) -> Result<usize, HubError> {
        let frame = encode(event)?;
        let mut delivered = 0;

        for member in self.registry.members(channel).await {
            if Some(member.id) == exclude {
                continue;
            }
            if self.deliver(&member, frame.clone()) {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Send one frame to one connection.
    pub async fn send_to(&self, connection: ConnectionId, event: &HubEvent) -> Result<(), HubError> {
        let handle = self
            .registry
            .connection(connection)
            .await
            .ok_or(HubError::UnknownConnection(connection))?;
        self.deliver(&handle, encode(event)?);
        Ok(())
    }

    pub async fn location(&self, ride_id: Uuid) -> Option<LiveLocation> {
        self.locations.lock().await.get(&ride_id)
    }

    /// Drop positions from vehicles that went quiet. Returns how many were removed.
    pub async fn sweep_stale_locations(&self) -> usize {
        let swept = self.locations.lock().await.sweep_stale(Utc::now());
        if !swept.is_empty() {
            info!(count = swept.len(), "Swept inactive live locations");
        }
        swept.len()
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            frames_sent: self.counters.sent.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            connections: self.registry.connection_count().await,
            channels: self.registry.channel_count().await,
            live_locations: self.locations.lock().await.len(),
        }
    }

    async fn join(&self, connection: ConnectionId, channel: ChannelId) -> Result<(), HubError> {
        if !self.registry.join(connection, channel.clone()).await {
            return Err(HubError::UnknownConnection(connection));
        }
        debug!(%connection, %channel, "Joined channel");
        Ok(())
    }

    fn deliver(&self, handle: &ConnectionHandle, frame: Frame) -> bool {
        match handle.try_deliver(frame) {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(failure) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(user_id = %handle.identity.user_id, error = %failure, "Dropped outbound frame");
                false
            }
        }
    }

    async fn forget_ride(&self, ride_id: Uuid) {
        self.locations.lock().await.evict(&ride_id);
        self.registry.close(&ChannelId::Ride(ride_id)).await;
    }
}

fn encode(event: &HubEvent) -> Result<Frame, HubError> {
    serde_json::to_string(event)
        .map(Frame::from)
        .map_err(|e| HubError::Encode(e.to_string()))
}

fn roster_update(ride: &Ride) -> HubEvent {
    HubEvent::RideUpdated {
        ride_id: ride.id,
        passengers: ride
            .passengers
            .iter()
            .map(|p| RosterEntry {
                user_id: p.user_id.clone(),
                status: p.status.as_str().to_string(),
                fare: p.fare.amount,
                paid: p.fare.paid,
            })
            .collect(),
        total_fare: ride.total_fare,
        per_person: per_person(ride.total_fare, ride.passengers.len()),
    }
}

fn announcement(ride: &Ride) -> HubEvent {
    HubEvent::NewRide {
        ride_id: ride.id,
        ride_type: ride.ride_type.as_str().to_string(),
        vehicle_class: ride.vehicle.class.to_string(),
        scheduled_time: ride.scheduled_time,
        seats_available: ride.seats_available(),
        total_fare: ride.total_fare,
    }
}

#[async_trait]
impl RideNotifier for CoordinationHub {
    async fn notify(&self, event: RideEvent) {
        let result = match &event {
            RideEvent::Created(ride) if ride.driver_id.is_none() => {
                self.broadcast(&ChannelId::Dispatch, &announcement(ride), None).await
            }
            RideEvent::Created(_) => Ok(0),
            RideEvent::RosterChanged(ride) => {
                self.broadcast(&ChannelId::Ride(ride.id), &roster_update(ride), None).await
            }
            RideEvent::StatusChanged { ride, previous } => {
                let channel = ChannelId::Ride(ride.id);
                let status = HubEvent::RideStatus {
                    ride_id: ride.id,
                    status: ride.status.as_str().to_string(),
                };
                let mut result = self.broadcast(&channel, &status, None).await;
                if result.is_ok() && !ride.passengers.is_empty() {
                    result = self.broadcast(&channel, &roster_update(ride), None).await;
                }

                {
                    let mut tracking = self.tracking.lock().await;
                    if ride.status.tracks_location() {
                        tracking.insert(ride.id);
                    } else {
                        tracking.remove(&ride.id);
                        self.locations.lock().await.evict(&ride.id);
                    }
                }
                if ride.status.is_terminal() {
                    debug!(ride_id = %ride.id, from = %previous, to = %ride.status, "Closing ride channel");
                    self.forget_ride(ride.id).await;
                }
                result
            }
        };

        if let Err(e) = result {
            warn!(ride_id = %event.ride().id, error = %e, "Ride notification not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridenest_core::{Passenger, PassengerStatus, RideStatus, RideType, Role, RouteSummary, VehicleRef};
    use ridenest_shared::{Location, VehicleClass};
    use serde_json::Value;

    fn hub(queue_capacity: usize) -> CoordinationHub {
        CoordinationHub::new(HubConfig {
            queue_capacity,
            ..HubConfig::default()
        })
    }

    fn next_frame(rx: &mut mpsc::Receiver<Frame>) -> Option<Value> {
        rx.try_recv().ok().and_then(|f| serde_json::from_str(&f).ok())
    }

    fn ride(status: RideStatus) -> Ride {
        let mut ride = Ride::new(
            RideType::EventTransport,
            "p1".to_string(),
            VehicleRef { id: None, class: VehicleClass::Van },
            Utc::now(),
            RouteSummary { distance: 10_000.0, duration: 1_200.0, optimized: false },
        );
        ride.status = status;
        ride.driver_id = Some("d1".to_string());
        let stop = Location::new("Stadium", GeoPoint::new(12.9, 77.6));
        ride.passengers.push(Passenger::new("p1".to_string(), stop.clone(), stop, PassengerStatus::Confirmed));
        ride.apply_split(195, 195);
        ride
    }

    #[tokio::test]
    async fn test_location_reaches_members_only() {
        let hub = hub(8);
        let ride_id = Uuid::new_v4();
        let (driver, mut driver_rx) = hub.connect(Identity::new("d1", Role::Driver)).await;
        let (rider, mut rider_rx) = hub.connect(Identity::new("p1", Role::Passenger)).await;
        let (_outsider, mut outsider_rx) = hub.connect(Identity::new("p9", Role::Passenger)).await;
        hub.track_ride(ride_id).await;

        hub.join_ride(driver.id, ride_id).await.unwrap();
        hub.join_ride(rider.id, ride_id).await.unwrap();

        let delivered = hub.publish_location(driver.id, ride_id, 18.43, 79.12).await.unwrap();
        assert_eq!(delivered, 1);

        let frame = next_frame(&mut rider_rx).unwrap();
        assert_eq!(frame["event"], "vehicle-location-update");
        assert_eq!(frame["lat"], 18.43);
        assert!(next_frame(&mut driver_rx).is_none());
        assert!(next_frame(&mut outsider_rx).is_none());
    }

    #[tokio::test]
    async fn test_late_joiner_gets_last_position_alone() {
        let hub = hub(8);
        let ride_id = Uuid::new_v4();
        let (driver, _driver_rx) = hub.connect(Identity::new("d1", Role::Driver)).await;
        let (early, mut early_rx) = hub.connect(Identity::new("p1", Role::Passenger)).await;
        hub.track_ride(ride_id).await;
        hub.join_ride(driver.id, ride_id).await.unwrap();
        hub.join_ride(early.id, ride_id).await.unwrap();
        hub.publish_location(driver.id, ride_id, 12.97, 77.59).await.unwrap();
        assert!(next_frame(&mut early_rx).is_some());

        let (late, mut late_rx) = hub.connect(Identity::new("p2", Role::Passenger)).await;
        hub.join_ride(late.id, ride_id).await.unwrap();

        let frame = next_frame(&mut late_rx).unwrap();
        assert_eq!(frame["lng"], 77.59);
        assert!(next_frame(&mut early_rx).is_none());
    }

    #[tokio::test]
    async fn test_slow_receiver_drops_without_blocking() {
        let hub = hub(1);
        let ride_id = Uuid::new_v4();
        let (driver, _driver_rx) = hub.connect(Identity::new("d1", Role::Driver)).await;
        let (rider, mut rider_rx) = hub.connect(Identity::new("p1", Role::Passenger)).await;
        hub.track_ride(ride_id).await;
        hub.join_ride(driver.id, ride_id).await.unwrap();
        hub.join_ride(rider.id, ride_id).await.unwrap();

        hub.publish_location(driver.id, ride_id, 1.0, 1.0).await.unwrap();
        let second = hub.publish_location(driver.id, ride_id, 2.0, 2.0).await.unwrap();
        assert_eq!(second, 0);

        let stats = hub.stats().await;
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(next_frame(&mut rider_rx).unwrap()["lat"], 1.0);
        // The cache keeps the newest sample even though delivery dropped it
        assert_eq!(hub.location(ride_id).await.map(|l| l.lat), Some(2.0));
    }

    #[tokio::test]
    async fn test_group_chat_and_disconnect() {
        let hub = hub(8);
        let (a, mut a_rx) = hub.connect(Identity::new("a", Role::Passenger)).await;
        let (b, mut b_rx) = hub.connect(Identity::new("b", Role::Passenger)).await;
        hub.join_group(a.id, "trek".to_string()).await.unwrap();
        hub.join_group(b.id, "trek".to_string()).await.unwrap();

        let sent = hub
            .group_message("trek".to_string(), "a".to_string(), "leaving at 6".to_string())
            .await
            .unwrap();
        assert_eq!(sent, 2);
        assert_eq!(next_frame(&mut b_rx).unwrap()["event"], "new-message");
        assert_eq!(next_frame(&mut a_rx).unwrap()["message"], "leaving at 6");

        hub.disconnect(b.id).await;
        hub.disconnect(b.id).await;
        assert_eq!(hub.stats().await.connections, 1);
        assert_eq!(
            hub.join_group(b.id, "trek".to_string()).await,
            Err(HubError::UnknownConnection(b.id))
        );
        assert!(hub.publish_location(a.id, Uuid::new_v4(), 120.0, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_status_change_evicts_location_and_closes_channel() {
        let hub = hub(8);
        let ride = ride(RideStatus::InProgress);
        let (driver, _driver_rx) = hub.connect(Identity::new("d1", Role::Driver)).await;
        let (rider, mut rider_rx) = hub.connect(Identity::new("p1", Role::Passenger)).await;
        hub.join_ride(driver.id, ride.id).await.unwrap();
        hub.join_ride(rider.id, ride.id).await.unwrap();
        hub.track_ride(ride.id).await;
        hub.publish_location(driver.id, ride.id, 5.0, 5.0).await.unwrap();
        next_frame(&mut rider_rx);

        let mut done = ride.clone();
        done.status = RideStatus::Completed;
        hub.notify(RideEvent::StatusChanged { ride: done, previous: RideStatus::InProgress }).await;

        let frame = next_frame(&mut rider_rx).unwrap();
        assert_eq!(frame["event"], "ride-status");
        assert_eq!(frame["status"], "completed");
        assert!(hub.location(ride.id).await.is_none());
        assert!(!hub.is_tracking(ride.id).await);
    }

    #[tokio::test]
    async fn test_sample_after_completion_is_refused() {
        let hub = hub(8);
        let (driver, _driver_rx) = hub.connect(Identity::new("d1", Role::Driver)).await;
        let mut finished = ride(RideStatus::InProgress);
        hub.notify(RideEvent::StatusChanged { ride: finished.clone(), previous: RideStatus::Confirmed }).await;
        assert!(hub.is_tracking(finished.id).await);
        hub.publish_location(driver.id, finished.id, 5.0, 5.0).await.unwrap();

        finished.status = RideStatus::Completed;
        hub.notify(RideEvent::StatusChanged { ride: finished.clone(), previous: RideStatus::InProgress }).await;

        // A driver client still streaming after completion
        assert_eq!(
            hub.publish_location(driver.id, finished.id, 6.0, 6.0).await,
            Err(HubError::NotTracking(finished.id))
        );
        assert!(hub.location(finished.id).await.is_none());

        let (late, mut late_rx) = hub.connect(Identity::new("p2", Role::Passenger)).await;
        hub.join_ride(late.id, finished.id).await.unwrap();
        assert!(next_frame(&mut late_rx).is_none());

        // Pending rides and unknown ids never take samples
        let pending = ride(RideStatus::Pending);
        assert_eq!(
            hub.publish_location(driver.id, pending.id, 1.0, 1.0).await,
            Err(HubError::NotTracking(pending.id))
        );
        assert_eq!(hub.stats().await.live_locations, 0);
    }

    #[tokio::test]
    async fn test_roster_and_dispatch_frames() {
        let hub = hub(8);
        let (watcher, mut watcher_rx) = hub.connect(Identity::new("d7", Role::Driver)).await;
        hub.join_dispatch(watcher.id).await.unwrap();

        let mut open = ride(RideStatus::Pending);
        open.driver_id = None;
        hub.notify(RideEvent::Created(open.clone())).await;
        let frame = next_frame(&mut watcher_rx).unwrap();
        assert_eq!(frame["event"], "new-ride");
        assert_eq!(frame["vehicleClass"], "Van");
        assert_eq!(frame["seatsAvailable"], 11);

        hub.join_ride(watcher.id, open.id).await.unwrap();
        hub.notify(RideEvent::RosterChanged(open)).await;
        let frame = next_frame(&mut watcher_rx).unwrap();
        assert_eq!(frame["event"], "ride-updated");
        assert_eq!(frame["totalFare"], 195);
        assert_eq!(frame["passengers"][0]["userId"], "p1");
    }
}
