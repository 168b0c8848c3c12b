//! Error types for the entity storage boundary.

use concierge_core::error::ConciergeError;
use concierge_core::{CanonicalId, EntityKind};

/// Errors returned by [`EntityStore`](crate::EntityStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: CanonicalId },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Errors from the search-result cache collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<ConciergeError> for StoreError {
    fn from(err: ConciergeError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<StoreError> for ConciergeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ConciergeError::NotFound(err.to_string()),
            StoreError::Backend(msg) => ConciergeError::Storage(msg),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let id = CanonicalId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let err = StoreError::NotFound {
            kind: EntityKind::Contact,
            id,
        };
        assert_eq!(
            err.to_string(),
            "contact not found: 550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_into_concierge_error() {
        let err: ConciergeError = StoreError::Backend("locked".to_string()).into();
        assert!(matches!(err, ConciergeError::Storage(_)));
        assert_eq!(err.to_string(), "Storage error: locked");
    }

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::Unavailable("redis down".to_string());
        assert_eq!(err.to_string(), "cache unavailable: redis down");
    }
}
