//! Bearer token extraction for the HTTP surface.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::AppState;

/// Header older browser clients send their raw token in.
const LEGACY_TOKEN_HEADER: &str = "token";

/// Authenticated user extracted from the `Authorization: Bearer <token>`
/// header (or the legacy `token` header).
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
}

/// Rejection returned when the bearer token is missing or invalid.
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;

        let username = state.tokens.verify(token).map_err(|err| {
            tracing::debug!(%err, "rejected bearer token");
            AuthError {
                message: "Invalid or expired token",
            }
        })?;

        Ok(AuthUser { username })
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    if let Some(header) = headers.get(AUTHORIZATION) {
        let value = header.to_str().map_err(|_| AuthError {
            message: "Invalid Authorization header format",
        })?;
        return value.strip_prefix("Bearer ").ok_or(AuthError {
            message: "Invalid Authorization header format",
        });
    }

    headers
        .get(LEGACY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(AuthError {
            message: "Missing Authorization header",
        })
}
