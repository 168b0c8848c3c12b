//! Per-request context: who is asking, in which timezone, and when.
//!
//! "Now" is captured once when the request starts and carried through the
//! whole turn so that every temporal decision in that turn agrees.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::types::UserId;

/// Authenticated caller plus the clock reading for this request.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub user_id: UserId,
    pub timezone: Tz,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    /// Build a context at the current instant.
    ///
    /// An absent or unrecognised timezone name falls back to UTC.
    pub fn new(user_id: UserId, timezone: Option<&str>) -> Self {
        Self::at(user_id, timezone, Utc::now())
    }

    /// Build a context with an injected clock reading.
    pub fn at(user_id: UserId, timezone: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            timezone: parse_timezone(timezone),
            now,
        }
    }

    /// The request instant in the caller's timezone.
    pub fn local_now(&self) -> DateTime<Tz> {
        self.now.with_timezone(&self.timezone)
    }
}

/// Parse an IANA timezone name, defaulting to UTC.
pub fn parse_timezone(name: Option<&str>) -> Tz {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.parse::<Tz>().unwrap_or_else(|_| {
            tracing::debug!(timezone = %n, "Unknown timezone, using UTC");
            Tz::UTC
        }),
        None => Tz::UTC,
    }
}
