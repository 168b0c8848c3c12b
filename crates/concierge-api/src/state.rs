//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use concierge_chat::ChatService;

/// Shared application state. Cloned into every handler task.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    /// Bearer token required on protected routes.
    pub api_token: String,
    /// Whether a language model is wired in. Reported by `/health`.
    pub model_available: bool,
    /// Chat requests allowed per user per second.
    pub rate_limit_per_sec: u64,
    /// Port the server listens on; drives the CORS origin list.
    pub port: u16,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(chat: ChatService, api_token: String, model_available: bool, port: u16) -> Self {
        Self {
            chat: Arc::new(chat),
            api_token,
            model_available,
            rate_limit_per_sec: 5,
            port,
            start_time: Instant::now(),
        }
    }
}
