use chrono::{DateTime, Utc};
use ridenest_core::{
    Identity, Passenger, PassengerStatus, Rating, RatingRepository, Ride, RideEvent, RideNotifier,
    RideRepository, RideStatus, RideType, Role, RouteSummary, StoreError, VehicleRef,
};
use ridenest_fare::FareEngine;
use ridenest_shared::Location;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::RideError;

/// What a caller asks for when creating a ride.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    #[serde(rename = "type")]
    pub ride_type: RideType,
    pub vehicle: VehicleRef,
    pub scheduled_time: DateTime<Utc>,
    pub route: Option<RouteSummary>,
    #[serde(default)]
    pub pickup: Option<Location>,
    #[serde(default)]
    pub dropoff: Option<Location>,
    /// Expected party size, defaulting to one. It only checks that the vehicle class is
    /// big enough; no seats are held, each rider claims a seat by joining.
    #[serde(default)]
    pub passenger_count: Option<usize>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// Owns every ride state change.
///
/// Each mutation re-reads the ride, applies the change to a fresh copy and commits it
/// with a compare-and-swap on the version token. A lost race retries from the read, up
/// to `max_retries` times. Hub notifications go out only after the commit.
pub struct RideLifecycleManager {
    rides: Arc<dyn RideRepository>,
    ratings: Arc<dyn RatingRepository>,
    notifier: Arc<dyn RideNotifier>,
    fares: FareEngine,
    deadline: Duration,
    max_retries: u32,
}

impl RideLifecycleManager {
    pub fn new(
        rides: Arc<dyn RideRepository>,
        ratings: Arc<dyn RatingRepository>,
        notifier: Arc<dyn RideNotifier>,
        fares: FareEngine,
    ) -> Self {
        Self {
            rides,
            ratings,
            notifier,
            fares,
            deadline: Duration::from_secs(2),
            max_retries: 5,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn fares(&self) -> &FareEngine {
        &self.fares
    }

    /// Create a `pending` ride. A passenger requester with pickup and dropoff takes the
    /// first seat; a driver requester is assigned as the driver.
    pub async fn create(&self, actor: &Identity, request: RideRequest) -> Result<Ride, RideError> {
        let route = request
            .route
            .filter(RouteSummary::is_valid)
            .ok_or_else(|| RideError::Validation("route is missing or invalid".to_string()))?;

        let capacity = request.vehicle.class.capacity();
        let seats = request.passenger_count.unwrap_or(1);
        if seats == 0 {
            return Err(RideError::Validation("passenger count must be at least 1".to_string()));
        }
        if seats > capacity {
            return Err(RideError::Validation(format!(
                "{} seats requested but a {} carries {}",
                seats, request.vehicle.class, capacity
            )));
        }

        let mut ride = Ride::new(
            request.ride_type,
            actor.user_id.clone(),
            request.vehicle,
            request.scheduled_time,
            route,
        );

        match actor.role {
            Role::Driver => ride.driver_id = Some(actor.user_id.clone()),
            Role::Passenger => match (request.pickup, request.dropoff) {
                (Some(pickup), Some(dropoff)) => {
                    validate_locations(&pickup, &dropoff)?;
                    let mut passenger =
                        Passenger::new(actor.user_id.clone(), pickup, dropoff, PassengerStatus::Confirmed);
                    passenger.payment_method = request.payment_method;
                    ride.passengers.push(passenger);
                }
                (None, None) => {}
                _ => {
                    return Err(RideError::Validation(
                        "pickup and dropoff must be given together".to_string(),
                    ))
                }
            },
            Role::Admin => {}
        }

        self.reprice(&mut ride)?;
        self.with_deadline_on(self.rides.insert(&ride)).await?;

        info!(
            ride_id = %ride.id,
            requester = %actor.user_id,
            ride_type = ride.ride_type.as_str(),
            total_fare = ride.total_fare,
            "Ride created"
        );
        self.notifier.notify(RideEvent::Created(ride.clone())).await;
        Ok(ride)
    }

    /// Add the caller to a pending ride and re-split the fare across everyone aboard.
    pub async fn join(
        &self,
        actor: &Identity,
        ride_id: Uuid,
        pickup: Location,
        dropoff: Location,
        payment_method: Option<String>,
    ) -> Result<Ride, RideError> {
        validate_locations(&pickup, &dropoff)?;

        let (_, ride) = self
            .mutate(ride_id, |ride| {
                if ride.status != RideStatus::Pending {
                    return Err(RideError::InvalidState {
                        status: ride.status,
                        action: "join".to_string(),
                    });
                }
                if ride.seats_available() == 0 {
                    return Err(RideError::Capacity { capacity: ride.capacity() });
                }
                if ride.has_passenger(&actor.user_id) {
                    return Err(RideError::Duplicate(format!(
                        "{} already joined ride {}",
                        actor.user_id, ride.id
                    )));
                }

                let mut passenger = Passenger::new(
                    actor.user_id.clone(),
                    pickup.clone(),
                    dropoff.clone(),
                    PassengerStatus::Requested,
                );
                passenger.payment_method = payment_method.clone();
                ride.passengers.push(passenger);
                self.reprice(ride)
            })
            .await?;

        info!(
            %ride_id,
            user_id = %actor.user_id,
            passengers = ride.passengers.len(),
            total_fare = ride.total_fare,
            "Passenger joined ride"
        );
        self.notifier.notify(RideEvent::RosterChanged(ride.clone())).await;
        Ok(ride)
    }

    /// Confirm a pending ride. An unassigned ride is claimed by the accepting driver.
    pub async fn accept(&self, actor: &Identity, ride_id: Uuid) -> Result<Ride, RideError> {
        let (previous, ride) = self
            .mutate(ride_id, |ride| {
                let assigned = ride.driver_id.clone();
                match assigned.as_deref() {
                    Some(driver) if driver != actor.user_id && !actor.is_admin() => {
                        return Err(RideError::Authorization(format!(
                            "ride {} is assigned to another driver",
                            ride.id
                        )));
                    }
                    Some(_) => {}
                    None if actor.role == Role::Driver => {
                        ride.driver_id = Some(actor.user_id.clone());
                    }
                    None => {
                        return Err(RideError::Validation(format!(
                            "ride {} has no driver to confirm",
                            ride.id
                        )));
                    }
                }
                ride.transition(RideStatus::Confirmed)?;
                Ok(())
            })
            .await?;

        info!(%ride_id, driver = ?ride.driver_id, "Ride accepted");
        self.notifier.notify(status_event(previous, ride.clone())).await;
        Ok(ride)
    }

    /// Decline a pending ride. Terminal: the ride is not re-offered.
    pub async fn reject(&self, actor: &Identity, ride_id: Uuid) -> Result<Ride, RideError> {
        let (previous, ride) = self
            .mutate(ride_id, |ride| {
                ensure_assigned_driver(ride, actor)?;
                ride.transition(RideStatus::Rejected)?;
                Ok(())
            })
            .await?;

        info!(%ride_id, actor = %actor.user_id, "Ride rejected");
        self.notifier.notify(status_event(previous, ride.clone())).await;
        Ok(ride)
    }

    /// Driver-driven progress: `confirmed -> in-progress -> completed`.
    pub async fn update_status(
        &self,
        actor: &Identity,
        ride_id: Uuid,
        next: RideStatus,
    ) -> Result<Ride, RideError> {
        if !matches!(next, RideStatus::InProgress | RideStatus::Completed) {
            return Err(RideError::Validation(format!(
                "status {} cannot be set directly; use accept, reject or cancel",
                next
            )));
        }

        let (previous, ride) = self
            .mutate(ride_id, |ride| {
                ensure_assigned_driver(ride, actor)?;
                ride.transition(next)?;
                Ok(())
            })
            .await?;

        info!(%ride_id, from = %previous, to = %ride.status, "Ride status changed");
        self.notifier.notify(status_event(previous, ride.clone())).await;
        Ok(ride)
    }

    /// Driver marks one passenger entry. `cancelled` removes the entry like a self-cancel.
    pub async fn update_passenger_status(
        &self,
        actor: &Identity,
        ride_id: Uuid,
        passenger_id: &str,
        status: PassengerStatus,
    ) -> Result<Ride, RideError> {
        if status == PassengerStatus::Requested {
            return Err(RideError::Validation(
                "passenger status can only be set to confirmed or cancelled".to_string(),
            ));
        }

        let (previous, ride) = self
            .mutate(ride_id, |ride| {
                ensure_assigned_driver(ride, actor)?;
                ensure_roster_open(ride, "change passenger status")?;

                match status {
                    PassengerStatus::Confirmed => {
                        let id = ride.id;
                        let entry = ride
                            .passengers
                            .iter_mut()
                            .find(|p| p.user_id == passenger_id)
                            .ok_or_else(|| RideError::PassengerNotFound {
                                ride_id: id,
                                user_id: passenger_id.to_string(),
                            })?;
                        entry.status = PassengerStatus::Confirmed;
                        Ok(())
                    }
                    _ => self.drop_passenger(ride, passenger_id),
                }
            })
            .await?;

        info!(%ride_id, passenger_id, status = status.as_str(), "Passenger status updated");
        self.notifier.notify(status_event(previous, ride.clone())).await;
        Ok(ride)
    }

    /// Driver or admin cancels the whole ride; a passenger cancels their own seat.
    pub async fn cancel(&self, actor: &Identity, ride_id: Uuid) -> Result<Ride, RideError> {
        let (previous, ride) = self
            .mutate(ride_id, |ride| {
                if actor.is_admin() || ride.is_driver(&actor.user_id) {
                    ride.transition(RideStatus::Cancelled)?;
                    return Ok(());
                }
                if ride.has_passenger(&actor.user_id) {
                    ensure_roster_open(ride, "cancel a seat")?;
                    return self.drop_passenger(ride, &actor.user_id);
                }
                if ride.requester_id == actor.user_id {
                    ride.transition(RideStatus::Cancelled)?;
                    return Ok(());
                }
                Err(RideError::Authorization(format!(
                    "{} is not part of ride {}",
                    actor.user_id, ride.id
                )))
            })
            .await?;

        info!(%ride_id, actor = %actor.user_id, status = %ride.status, "Ride cancellation applied");
        self.notifier.notify(status_event(previous, ride.clone())).await;
        Ok(ride)
    }

    /// Rate a completed ride. A passenger rates the driver; a driver names the passenger.
    pub async fn rate(
        &self,
        actor: &Identity,
        ride_id: Uuid,
        score: u8,
        rated_user: Option<String>,
    ) -> Result<Rating, RideError> {
        if !(1..=5).contains(&score) {
            return Err(RideError::Validation(format!("score {} is outside 1..=5", score)));
        }

        let mut target = String::new();
        self.mutate(ride_id, |ride| {
            if ride.status != RideStatus::Completed {
                return Err(RideError::InvalidState {
                    status: ride.status,
                    action: "rate".to_string(),
                });
            }
            if !ride.is_participant(&actor.user_id) {
                return Err(RideError::Authorization(format!(
                    "{} did not take part in ride {}",
                    actor.user_id, ride.id
                )));
            }
            if ride.rated_by.iter().any(|u| u == &actor.user_id) {
                return Err(RideError::Duplicate(format!(
                    "{} already rated ride {}",
                    actor.user_id, ride.id
                )));
            }

            target = if ride.is_driver(&actor.user_id) {
                match rated_user.as_deref() {
                    Some(user) if ride.has_passenger(user) => user.to_string(),
                    _ => {
                        return Err(RideError::Validation(
                            "drivers must name a passenger of this ride to rate".to_string(),
                        ))
                    }
                }
            } else {
                ride.driver_id
                    .clone()
                    .ok_or_else(|| RideError::Validation("ride has no driver to rate".to_string()))?
            };

            ride.rated_by.push(actor.user_id.clone());
            Ok(())
        })
        .await?;

        let rating = match self
            .with_deadline_on(self.ratings.record_rating(&target, score))
            .await
        {
            Ok(rating) => rating,
            Err(e) => {
                // Release the mark so a retry is not refused as a duplicate
                let released = self
                    .mutate(ride_id, |ride| {
                        ride.rated_by.retain(|u| u != &actor.user_id);
                        Ok(())
                    })
                    .await;
                if let Err(undo) = released {
                    error!(%ride_id, rater = %actor.user_id, error = %undo, "Could not release rating mark");
                }
                return Err(e);
            }
        };

        info!(%ride_id, rater = %actor.user_id, rated = %target, score, "Rating recorded");
        Ok(rating)
    }

    pub async fn get(&self, actor: &Identity, ride_id: Uuid) -> Result<Ride, RideError> {
        let ride = self.load(ride_id).await?;
        if !is_visible_to(&ride, actor) {
            return Err(RideError::Authorization(format!(
                "{} cannot view ride {}",
                actor.user_id, ride_id
            )));
        }
        Ok(ride)
    }

    /// Rides the caller may see, soonest first.
    pub async fn list_visible(&self, actor: &Identity) -> Result<Vec<Ride>, RideError> {
        let mut rides: Vec<Ride> = self
            .with_deadline_on(self.rides.list())
            .await?
            .into_iter()
            .filter(|ride| is_visible_to(ride, actor))
            .collect();
        rides.sort_by_key(|ride| ride.scheduled_time);
        Ok(rides)
    }

    /// The driver's rides that have not finished yet, soonest first.
    pub async fn upcoming_for_driver(&self, actor: &Identity) -> Result<Vec<Ride>, RideError> {
        let mut rides: Vec<Ride> = self
            .with_deadline_on(self.rides.list())
            .await?
            .into_iter()
            .filter(|ride| ride.is_driver(&actor.user_id) && !ride.status.is_terminal())
            .collect();
        rides.sort_by_key(|ride| ride.scheduled_time);
        Ok(rides)
    }

    /// Rides whose vehicle is expected to be streaming its position.
    pub async fn rides_under_way(&self) -> Result<Vec<Uuid>, RideError> {
        Ok(self
            .with_deadline_on(self.rides.list())
            .await?
            .into_iter()
            .filter(|ride| ride.status.tracks_location())
            .map(|ride| ride.id)
            .collect())
    }

    async fn load(&self, ride_id: Uuid) -> Result<Ride, RideError> {
        self.with_deadline_on(self.rides.get(ride_id))
            .await?
            .ok_or(RideError::NotFound(ride_id))
    }

    /// Read-modify-CAS loop. Returns the status before the change and the committed ride.
    async fn mutate<F>(&self, ride_id: Uuid, mut apply: F) -> Result<(RideStatus, Ride), RideError>
    where
        F: FnMut(&mut Ride) -> Result<(), RideError> + Send,
    {
        for attempt in 0..=self.max_retries {
            let mut ride = self.load(ride_id).await?;
            let previous = ride.status;
            let expected = ride.version;

            apply(&mut ride)?;
            ride.version = expected + 1;
            ride.updated_at = Utc::now();

            match self
                .with_deadline_on(self.rides.compare_and_swap(&ride, expected))
                .await
            {
                Ok(()) => return Ok((previous, ride)),
                Err(RideError::Store(StoreError::Conflict { .. })) => {
                    debug!(%ride_id, attempt, "Version conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(%ride_id, retries = self.max_retries, "Gave up after repeated version conflicts");
        Err(RideError::Contention(ride_id))
    }

    async fn with_deadline_on<T, F>(&self, call: F) -> Result<T, RideError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.deadline, call).await {
            Ok(result) => result.map_err(RideError::from),
            Err(_) => {
                warn!(deadline_ms = self.deadline.as_millis() as u64, "Store call timed out");
                Err(RideError::StoreTimeout)
            }
        }
    }

    fn reprice(&self, ride: &mut Ride) -> Result<(), RideError> {
        let quote = self.fares.quote(
            ride.route.distance,
            ride.route.duration,
            ride.vehicle.class,
            ride.passengers.len(),
        )?;
        ride.apply_split(quote.total, quote.per_person);
        Ok(())
    }

    /// Remove one passenger, re-split, and cancel the ride once nobody is left.
    fn drop_passenger(&self, ride: &mut Ride, user_id: &str) -> Result<(), RideError> {
        ride.remove_passenger(user_id)
            .ok_or_else(|| RideError::PassengerNotFound {
                ride_id: ride.id,
                user_id: user_id.to_string(),
            })?;
        self.reprice(ride)?;

        if ride.passengers.is_empty() {
            ride.transition(RideStatus::Cancelled)?;
        }
        Ok(())
    }
}

fn validate_locations(pickup: &Location, dropoff: &Location) -> Result<(), RideError> {
    if !pickup.is_valid() || !dropoff.is_valid() {
        return Err(RideError::Validation("pickup and dropoff need an address and valid coordinates".to_string()));
    }
    Ok(())
}

fn ensure_assigned_driver(ride: &Ride, actor: &Identity) -> Result<(), RideError> {
    if actor.is_admin() || ride.is_driver(&actor.user_id) {
        return Ok(());
    }
    Err(RideError::Authorization(format!(
        "{} is not the assigned driver of ride {}",
        actor.user_id, ride.id
    )))
}

fn ensure_roster_open(ride: &Ride, action: &str) -> Result<(), RideError> {
    if matches!(ride.status, RideStatus::Pending | RideStatus::Confirmed) {
        return Ok(());
    }
    Err(RideError::InvalidState {
        status: ride.status,
        action: action.to_string(),
    })
}

fn is_visible_to(ride: &Ride, actor: &Identity) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Driver => {
            ride.is_driver(&actor.user_id)
                || (ride.driver_id.is_none() && ride.status == RideStatus::Pending)
        }
        Role::Passenger => ride.requester_id == actor.user_id || ride.has_passenger(&actor.user_id),
    }
}

fn status_event(previous: RideStatus, ride: Ride) -> RideEvent {
    if previous == ride.status {
        RideEvent::RosterChanged(ride)
    } else {
        RideEvent::StatusChanged { ride, previous }
    }
}
