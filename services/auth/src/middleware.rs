//! Middleware for JWT access token validation

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::debug;

use crate::{AppState, routes::ApiError};

/// Validate the bearer access token and expose its
/// [`Claims`](crate::jwt::Claims) to handlers as a request extension
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(ApiError::Unauthorized);
    };

    let claims = state
        .session_service
        .jwt()
        .validate_token(bearer.token())
        .map_err(|e| {
            debug!("Rejected access token: {}", e);
            ApiError::Unauthorized
        })?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
