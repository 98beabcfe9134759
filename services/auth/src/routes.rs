//! Authentication service routes

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    AppState,
    jwt::Claims,
    middleware::auth_middleware,
    models::{Account, AccountStatus, Role},
    service::{AuthError, TokenPair},
    validation::{
        validate_display_name, validate_email, validate_password, validate_verification_code,
    },
};

/// Request for account registration
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

/// Request for email verification
#[derive(Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

/// Request for user login
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request for token refresh
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Response for login and refresh
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

impl From<TokenPair> for TokenResponse {
    fn from(tokens: TokenPair) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
        }
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Profile of the authenticated account
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for MeResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            display_name: account.display_name,
            avatar_url: account.avatar_url,
            role: account.role,
            status: account.status,
            created_at: account.created_at,
        }
    }
}

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/me", get(me))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let auth = Router::new()
        .route("/register", post(register))
        .route("/verify", post(verify_email))
        .route("/login", post(login))
        .route("/refresh", post(refresh_token))
        .merge(protected);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/auth", auth)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "auth-service"
    }))
}

/// Account registration endpoint
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Registration attempt for: {}", payload.email);

    validate_email(&payload.email).map_err(ApiError::Validation)?;
    validate_password(&payload.password).map_err(ApiError::Validation)?;
    validate_display_name(&payload.display_name).map_err(ApiError::Validation)?;

    state
        .session_service
        .register(&payload.email, &payload.password, payload.display_name.trim())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Verification code sent to email".to_string(),
        }),
    ))
}

/// Email verification endpoint
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Verification attempt for: {}", payload.email);

    validate_email(&payload.email).map_err(ApiError::Validation)?;
    validate_verification_code(&payload.code).map_err(ApiError::Validation)?;

    state
        .session_service
        .verify_email(&payload.email, &payload.code)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Email verified successfully".to_string(),
        }),
    ))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Login attempt for: {}", payload.email);

    validate_email(&payload.email).map_err(ApiError::Validation)?;
    if payload.password.is_empty() {
        return Err(ApiError::Validation("Password is required".to_string()));
    }

    let tokens = state
        .session_service
        .login(&payload.email, &payload.password)
        .await?;

    Ok((StatusCode::OK, Json(TokenResponse::from(tokens))))
}

/// Refresh token endpoint
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!("Token refresh request");

    if payload.refresh_token.is_empty() {
        return Err(ApiError::Validation("Refresh token is required".to_string()));
    }

    let tokens = state
        .session_service
        .refresh(&payload.refresh_token)
        .await?;

    Ok((StatusCode::OK, Json(TokenResponse::from(tokens))))
}

/// Current account endpoint
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state.session_service.get_user_by_id(claims.sub).await?;
    Ok((StatusCode::OK, Json(MeResponse::from(account))))
}

/// HTTP-facing error
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unauthorized,
    Service(AuthError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Service(err) => match err {
                AuthError::AlreadyActive
                | AuthError::InvalidOrExpiredCode
                | AuthError::AccountMissing => (StatusCode::BAD_REQUEST, err.to_string()),
                AuthError::InvalidCredentials
                | AuthError::NotVerified
                | AuthError::InvalidRefreshToken => (StatusCode::UNAUTHORIZED, err.to_string()),
                AuthError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
                AuthError::Store(_)
                | AuthError::Token(_)
                | AuthError::Password(_)
                | AuthError::Lifetime(_) => {
                    error!("Request failed: {}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
        };

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
