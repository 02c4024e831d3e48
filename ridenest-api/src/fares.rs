use axum::{extract::State, routing::post, Extension, Json, Router};
use ridenest_core::{Identity, Operation};
use ridenest_fare::FareQuote;
use ridenest_shared::VehicleClass;
use serde::Deserialize;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    /// Meters
    pub distance: f64,
    /// Seconds
    pub duration: f64,
    pub vehicle_class: VehicleClass,
    #[serde(default = "one")]
    pub passenger_count: usize,
}

fn one() -> usize {
    1
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/fares/quote", post(quote_fare))
}

/// Estimate before booking. Nothing is stored.
async fn quote_fare(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<FareQuote>, AppError> {
    state.gate.authorize(&identity, Operation::QuoteFare)?;

    let capacity = req.vehicle_class.capacity();
    if req.passenger_count > capacity {
        return Err(AppError::ValidationError(format!(
            "A {} seats at most {} passengers",
            req.vehicle_class, capacity
        )));
    }

    let quote = state
        .rides
        .fares()
        .quote(req.distance, req.duration, req.vehicle_class, req.passenger_count)?;
    Ok(Json(quote))
}
