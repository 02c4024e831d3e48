use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use ridenest_core::{CoreError, CoreResult, Identity, Role, TokenVerifier};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// HS256 bearer tokens from the identity provider.
pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Mint a token for `identity`. Used by local tooling and tests.
    pub fn issue(&self, identity: &Identity, ttl: chrono::Duration) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: identity.user_id.clone(),
            role: identity.role.as_str().to_string(),
            exp: (Utc::now() + ttl).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> CoreResult<Identity> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| CoreError::IdentityError(e.to_string()))?;

        let role = Role::from_claim(&data.claims.role)
            .ok_or_else(|| CoreError::IdentityError(format!("unknown role {}", data.claims.role)))?;

        Ok(Identity::new(data.claims.sub, role))
    }
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Verify the bearer token and attach the caller's [`Identity`] to the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Authorization(bearer) = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::AuthenticationError("Missing bearer token".to_string()))?;

    let identity = state.verifier.verify(bearer.token()).map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        AppError::AuthenticationError("Invalid or expired token".to_string())
    })?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
