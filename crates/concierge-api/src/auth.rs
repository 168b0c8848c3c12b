//! Bearer-token authentication and caller identity.
//!
//! The gateway in front of this service authenticates the user and passes
//! the identifier in `x-user-id`. This service only checks the shared
//! bearer token and requires that header.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use concierge_core::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

/// Load the token from file, or generate and save a new one.
pub fn load_or_generate_token(token_path: &std::path::Path) -> String {
    if let Ok(contents) = std::fs::read_to_string(token_path) {
        let token = contents.trim().to_string();
        if !token.is_empty() {
            tracing::info!(path = %token_path.display(), "API token loaded");
            return token;
        }
    }

    let token = generate_token();
    if let Some(parent) = token_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(token_path, &token) {
        tracing::warn!(error = %e, path = %token_path.display(), "Failed to save API token");
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(token_path, std::fs::Permissions::from_mode(0o600));
        }
        tracing::info!(path = %token_path.display(), "API token saved");
    }
    token
}

/// Middleware that validates `Authorization: Bearer <token>`.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let header = match req.headers().get("authorization") {
        Some(value) => value,
        None => return ApiError::Unauthorized("Missing Authorization header".to_string()).into_response(),
    };
    let value = match header.to_str() {
        Ok(s) => s,
        Err(_) => {
            return ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
                .into_response()
        }
    };
    match value.strip_prefix("Bearer ") {
        Some(token) if token == state.api_token => next.run(req).await,
        _ => ApiError::Unauthorized("Invalid bearer token".to_string()).into_response(),
    }
}

/// The user a request acts for, read from [`USER_ID_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_id_from_headers(&parts.headers)
            .map(|id| Caller(UserId::from(id)))
            .ok_or_else(|| {
                ApiError::Unauthorized(format!("Missing or empty {} header", USER_ID_HEADER))
            })
    }
}

/// Non-blank user id from the headers, if present.
pub fn user_id_from_headers(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}
