//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same JSON error body and maps chat
//! failures to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use concierge_chat::{ChatError, LlmError};

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "unauthorized").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid parameters.
    BadRequest(String),
    /// 401 - missing credentials or caller identity.
    Unauthorized(String),
    /// 422 - well-formed request the chat engine cannot accept.
    UnprocessableEntity(String),
    /// 429 - rate limit exceeded.
    TooManyRequests(String),
    /// 500 - unexpected server error.
    Internal(String),
    /// 502 - the language-model service failed.
    BadGateway(String),
    /// 503 - a required component is not configured.
    ServiceUnavailable(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::UnprocessableEntity(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity", msg)
            }
            ApiError::TooManyRequests(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "too_many_requests", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();
        let body = ErrorBody {
            error: error_code.to_string(),
            message: message.to_string(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyConversation | ChatError::MessageTooLong(_) => {
                ApiError::UnprocessableEntity(err.to_string())
            }
            ChatError::StateStore(msg) => {
                tracing::error!(error = %msg, "Conversation state failure");
                ApiError::Internal("Conversation state is unavailable. Please retry.".to_string())
            }
            ChatError::Llm(LlmError::NotConfigured(msg)) => {
                tracing::warn!(reason = %msg, "Model-driven turn requested without a model");
                ApiError::ServiceUnavailable(
                    "The assistant can only handle simple calendar requests right now. \
                     Try again later or phrase the request with an explicit time or event id."
                        .to_string(),
                )
            }
            ChatError::Llm(e) => {
                tracing::error!(error = %e, "Model service failure");
                ApiError::BadGateway(
                    "The assistant is temporarily unavailable. Nothing was changed; please try again."
                        .to_string(),
                )
            }
        }
    }
}
