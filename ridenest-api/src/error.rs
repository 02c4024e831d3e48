use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ridenest_core::AccessError;
use ridenest_fare::FareError;
use ridenest_ride::RideError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    /// Transient; the client may retry the same request
    ServiceUnavailable(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<RideError> for AppError {
    fn from(err: RideError) -> Self {
        let msg = err.to_string();
        match err {
            RideError::Validation(_) => AppError::ValidationError(msg),
            RideError::NotFound(_) | RideError::PassengerNotFound { .. } => AppError::NotFoundError(msg),
            RideError::InvalidState { .. } | RideError::Capacity { .. } | RideError::Duplicate(_) => {
                AppError::ConflictError(msg)
            }
            RideError::Authorization(_) => AppError::AuthorizationError(msg),
            RideError::StoreTimeout | RideError::Contention(_) => AppError::ServiceUnavailable(msg),
            RideError::Store(_) => AppError::InternalServerError(msg),
        }
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        AppError::AuthorizationError(err.to_string())
    }
}

impl From<FareError> for AppError {
    fn from(err: FareError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Anyhow(err)
    }
}
