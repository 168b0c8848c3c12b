//! Concierge API crate - axum HTTP surface for chat turns.
//!
//! Exposes `POST /chat`, `DELETE /conversations/me` and a public
//! `GET /health`, with bearer-token auth and per-user rate limiting.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
