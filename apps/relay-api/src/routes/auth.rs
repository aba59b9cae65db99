//! Account routes: registration and login.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::password;
use crate::db::StoreError;
use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::models::user::NewUser;
use crate::AppState;

/// Longest accepted username, in characters.
const MAX_USERNAME_LEN: usize = 32;

pub fn router(enable_register: bool) -> Router<AppState> {
    let router = Router::new().route("/login", post(login));
    if enable_register {
        router.route("/register", post(register))
    } else {
        router
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub msg: String,
}

// ---------------------------------------------------------------------------
// POST /register
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/register",
    tag = "Auth",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Account created", body = MessageResponse),
        (status = 400, description = "Invalid input or username taken", body = ApiErrorBody),
    ),
)]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let username = body.username.trim();

    let mut errors = Vec::new();
    if username.is_empty() || username.chars().count() > MAX_USERNAME_LEN {
        errors.push(FieldError {
            field: "username".into(),
            message: format!("Username must be 1–{MAX_USERNAME_LEN} characters"),
        });
    } else if username.chars().any(char::is_whitespace) {
        errors.push(FieldError {
            field: "username".into(),
            message: "Username may not contain whitespace".into(),
        });
    }
    if body.password.is_empty() {
        errors.push(FieldError {
            field: "password".into(),
            message: "Password is required".into(),
        });
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    // Argon2 is CPU-bound; keep it off the async workers.
    let plaintext = body.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&plaintext))
        .await
        .map_err(|e| {
            tracing::error!(?e, "password hashing task failed");
            ApiError::internal("Failed to process password")
        })?
        .map_err(|e| {
            tracing::error!(?e, "password hashing failed");
            ApiError::internal("Failed to process password")
        })?;
    let id = relay_common::id::prefixed_ulid(relay_common::id::prefix::USER);

    let user = state
        .users
        .create(NewUser {
            id: &id,
            username,
            password_hash: &password_hash,
            created_at: Utc::now(),
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(message) => ApiError::bad_request(message),
            other => ApiError::from(other),
        })?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    Ok(Json(MessageResponse {
        msg: "User registered successfully".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// POST /login
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    /// Token lifetime in seconds.
    pub expires_in: i64,
}

#[utoipa::path(
    post,
    path = "/login",
    tag = "Auth",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ApiErrorBody),
    ),
)]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Some(user) = state.users.find_by_username(body.username.trim()).await? else {
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    let plaintext = body.password;
    let stored_hash = user.password_hash.clone();
    let verified =
        tokio::task::spawn_blocking(move || password::verify_password(&plaintext, &stored_hash))
            .await
            .map_err(|e| {
                tracing::error!(?e, "password verification task failed");
                ApiError::internal("Failed to process password")
            })?;
    if !verified {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let access_token = state.tokens.issue(&user.username).map_err(|e| {
        tracing::error!(%e, "failed to sign access token");
        ApiError::internal("Token signing failed")
    })?;

    tracing::info!(username = %user.username, "user logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: state.tokens.ttl().num_seconds(),
    }))
}
