//! Per-user fixed-window rate limiter middleware.
//!
//! Each caller (keyed by the user id header) gets `max_per_sec` requests
//! per wall-clock second.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::user_id_from_headers;
use crate::error::ApiError;

/// Windows kept before stale ones are pruned.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone)]
pub struct RateLimiter {
    max_per_sec: u64,
    /// Caller key to (window second, count in window).
    windows: Arc<Mutex<HashMap<String, (u64, u64)>>>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Try to acquire a permit for `key` at epoch second `now`.
    fn try_acquire_at(&self, key: &str, now: u64) -> bool {
        let Ok(mut windows) = self.windows.lock() else {
            // A poisoned limiter must not take the service down.
            return true;
        };
        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, (second, _)| *second == now);
        }
        let entry = windows.entry(key.to_string()).or_insert((now, 0));
        if entry.0 != now {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max_per_sec
    }

    pub fn try_acquire(&self, key: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(key, now)
    }
}

/// Axum middleware that enforces the rate limit.
pub async fn rate_limit_middleware(
    axum::extract::Extension(limiter): axum::extract::Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    let key = user_id_from_headers(req.headers()).unwrap_or("anonymous").to_string();
    if limiter.try_acquire(&key) {
        next.run(req).await
    } else {
        tracing::info!(user_id = %key, "Rate limit exceeded");
        ApiError::TooManyRequests("Rate limit exceeded. Please slow down.".to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_per_key_and_window() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire_at("a", 100));
        assert!(limiter.try_acquire_at("a", 100));
        assert!(!limiter.try_acquire_at("a", 100));
        assert!(limiter.try_acquire_at("b", 100));
        assert!(limiter.try_acquire_at("a", 101));
    }
}
