use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Extension, Json, Router,
};
use ridenest_core::{Identity, Operation, PassengerStatus, Rating, Ride, RideStatus};
use ridenest_ride::RideRequest;
use ridenest_shared::Location;
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: RideStatus,
}

#[derive(Debug, Deserialize)]
pub struct PassengerStatusRequest {
    pub status: PassengerStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRideRequest {
    pub pickup: Location,
    pub dropoff: Location,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRideRequest {
    pub score: u8,
    /// Required when a driver rates one of their passengers
    #[serde(default)]
    pub rated_user_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rides", post(create_ride).get(list_rides))
        .route("/rides/driver/upcoming", get(upcoming_rides))
        .route("/rides/{id}", get(get_ride))
        .route("/rides/{id}/status", put(update_status))
        .route("/rides/{id}/passengers/{pid}/status", put(update_passenger_status))
        .route("/rides/{id}/cancel", put(cancel_ride))
        .route("/rides/{id}/rate", post(rate_ride))
        .route("/rides/{id}/accept", put(accept_ride))
        .route("/rides/{id}/reject", put(reject_ride))
        .route("/rides/{id}/join", post(join_ride))
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_ride(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<RideRequest>,
) -> Result<(StatusCode, Json<Ride>), AppError> {
    state.gate.authorize(&identity, Operation::CreateRide)?;

    let result = state.rides.create(&identity, req).await;
    state.metrics.record("create", &result);
    Ok((StatusCode::CREATED, Json(result?)))
}

async fn list_rides(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Ride>>, AppError> {
    state.gate.authorize(&identity, Operation::ListRides)?;
    Ok(Json(state.rides.list_visible(&identity).await?))
}

async fn upcoming_rides(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Ride>>, AppError> {
    state.gate.authorize(&identity, Operation::UpcomingRides)?;
    Ok(Json(state.rides.upcoming_for_driver(&identity).await?))
}

async fn get_ride(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    state.gate.authorize(&identity, Operation::GetRide)?;
    Ok(Json(state.rides.get(&identity, id).await?))
}

async fn update_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Ride>, AppError> {
    state.gate.authorize(&identity, Operation::UpdateStatus)?;

    let result = state.rides.update_status(&identity, id, req.status).await;
    state.metrics.record("update_status", &result);
    Ok(Json(result?))
}

async fn update_passenger_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((id, passenger_id)): Path<(Uuid, String)>,
    Json(req): Json<PassengerStatusRequest>,
) -> Result<Json<Ride>, AppError> {
    state.gate.authorize(&identity, Operation::UpdatePassengerStatus)?;

    let result = state
        .rides
        .update_passenger_status(&identity, id, &passenger_id, req.status)
        .await;
    state.metrics.record("update_passenger_status", &result);
    Ok(Json(result?))
}

async fn cancel_ride(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    state.gate.authorize(&identity, Operation::CancelRide)?;

    let result = state.rides.cancel(&identity, id).await;
    state.metrics.record("cancel", &result);
    Ok(Json(result?))
}

async fn rate_ride(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<RateRideRequest>,
) -> Result<Json<Rating>, AppError> {
    state.gate.authorize(&identity, Operation::RateRide)?;

    let result = state.rides.rate(&identity, id, req.score, req.rated_user_id).await;
    state.metrics.record("rate", &result);
    Ok(Json(result?))
}

async fn accept_ride(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    state.gate.authorize(&identity, Operation::AcceptRide)?;

    let result = state.rides.accept(&identity, id).await;
    state.metrics.record("accept", &result);
    Ok(Json(result?))
}

async fn reject_ride(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    state.gate.authorize(&identity, Operation::RejectRide)?;

    let result = state.rides.reject(&identity, id).await;
    state.metrics.record("reject", &result);
    Ok(Json(result?))
}

async fn join_ride(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<JoinRideRequest>,
) -> Result<Json<Ride>, AppError> {
    state.gate.authorize(&identity, Operation::JoinRide)?;

    let result = state
        .rides
        .join(&identity, id, req.pickup, req.dropoff, req.payment_method)
        .await;
    state.metrics.record("join", &result);
    Ok(Json(result?))
}
