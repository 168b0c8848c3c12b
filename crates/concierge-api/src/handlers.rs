//! Route handler functions.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use concierge_chat::{ChatMessage, ChatReply};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request and response types
// =============================================================================

/// Body of `POST /chat`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The whole client-held transcript, oldest first.
    pub messages: Vec<ChatMessage>,
    /// IANA timezone name. Unknown names fall back to UTC.
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub model_available: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    /// Whether any conversation state existed.
    pub reset: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health - public liveness check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        model_available: state.model_available,
    })
}

/// POST /chat - process one conversation turn.
pub async fn chat(
    State(state): State<AppState>,
    Caller(user): Caller,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }
    let reply = state
        .chat
        .process_turn(&request.messages, user, request.timezone.as_deref())
        .await?;
    Ok(Json(reply))
}

/// DELETE /conversations/me - forget the caller's conversation state.
pub async fn reset_conversation(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<ResetResponse>, ApiError> {
    let reset = state.chat.reset(&user).await?;
    info!(user_id = %user, existed = reset, "Conversation reset");
    Ok(Json(ResetResponse { reset }))
}
