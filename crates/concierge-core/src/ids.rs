//! Canonical record identifiers.
//!
//! Every targeted update or delete must reference a canonical identifier: a
//! hyphenated 36-character UUID. Values copied from other fields (emails,
//! phone numbers, external meeting ids) are rejected here, mechanically,
//! rather than trusted because a model produced them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConciergeError;

/// Length of a hyphenated UUID.
pub const CANONICAL_ID_LEN: usize = 36;

/// A validated canonical record identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(pub Uuid);

/// What a rejected identifier candidate looked like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdShape {
    Empty,
    Email,
    Phone,
    Other,
}

impl fmt::Display for IdShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdShape::Empty => write!(f, "an empty value"),
            IdShape::Email => write!(f, "an email address"),
            IdShape::Phone => write!(f, "a phone number"),
            IdShape::Other => write!(f, "not a record id"),
        }
    }
}

impl CanonicalId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a canonical identifier.
    ///
    /// Only the hyphenated form is accepted; braced, urn and simple forms
    /// that `Uuid::parse_str` would tolerate are rejected.
    pub fn parse(raw: &str) -> Result<Self, IdShape> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdShape::Empty);
        }
        if trimmed.len() == CANONICAL_ID_LEN {
            let bytes = trimmed.as_bytes();
            let hyphens_ok = [8, 13, 18, 23].iter().all(|&i| bytes[i] == b'-');
            if hyphens_ok {
                if let Ok(uuid) = Uuid::parse_str(trimmed) {
                    return Ok(Self(uuid));
                }
            }
        }
        Err(classify_shape(trimmed))
    }

    /// Parse, producing a user-facing validation error naming the field.
    pub fn parse_field(raw: &str, field: &str) -> Result<Self, ConciergeError> {
        Self::parse(raw).map_err(|shape| {
            ConciergeError::Validation(format!(
                "'{}' cannot be used as {}: it is {}. Record ids are 36-character UUIDs; \
                 search by name first to find the id.",
                raw.trim(),
                field,
                shape
            ))
        })
    }

    /// Find every canonical identifier embedded in free text, in order.
    pub fn find_all(text: &str) -> Vec<Self> {
        let mut found = Vec::new();
        let bytes = text.as_bytes();
        if bytes.len() < CANONICAL_ID_LEN {
            return found;
        }
        let mut i = 0;
        while i + CANONICAL_ID_LEN <= bytes.len() {
            let boundary_before = i == 0 || !bytes[i - 1].is_ascii_hexdigit();
            let end = i + CANONICAL_ID_LEN;
            let boundary_after = end == bytes.len() || !bytes[end].is_ascii_hexdigit();
            if boundary_before && boundary_after && text.is_char_boundary(i) && text.is_char_boundary(end) {
                if let Ok(id) = Self::parse(&text[i..end]) {
                    found.push(id);
                    i = end;
                    continue;
                }
            }
            i += 1;
        }
        found
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for CanonicalId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

fn classify_shape(raw: &str) -> IdShape {
    if raw.contains('@') {
        return IdShape::Email;
    }
    let digits = raw.chars().filter(|c| c.is_ascii_digit()).count();
    let phone_chars = raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'));
    if phone_chars && digits >= 7 {
        return IdShape::Phone;
    }
    IdShape::Other
}
