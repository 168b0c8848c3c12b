//! Error types for the action engine.

use concierge_core::error::ConciergeError;
use concierge_storage::StoreError;

use crate::types::CandidateSummary;

/// Failures of a single routed operation.
///
/// These never escape the [`OperationRouter`](crate::OperationRouter); they
/// are folded into a failed [`OperationResult`](crate::OperationResult).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Ambiguous target: {message}")]
    AmbiguousTarget {
        message: String,
        candidates: Vec<CandidateSummary>,
    },
    #[error("Past event rejected: {0}")]
    PastEventRejected(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        existing_id: concierge_core::CanonicalId,
    },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("External service error: {0}")]
    ExternalService(String),
}

impl OperationError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OperationError::Validation(_) => "validation",
            OperationError::AmbiguousTarget { .. } => "ambiguous_target",
            OperationError::PastEventRejected(_) => "past_event_rejected",
            OperationError::NotFound(_) => "not_found",
            OperationError::Conflict { .. } => "conflict",
            OperationError::Storage(_) => "storage",
            OperationError::ExternalService(_) => "external_service",
        }
    }

    /// Text safe to show the user. Storage and external details stay in the
    /// logs.
    pub fn user_message(&self) -> String {
        match self {
            OperationError::Validation(msg)
            | OperationError::PastEventRejected(msg)
            | OperationError::NotFound(msg) => msg.clone(),
            OperationError::AmbiguousTarget {
                message,
                candidates,
            } => {
                let listed = candidates
                    .iter()
                    .map(|c| format!("{} ({})", c.label, c.id))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("{} Matches: {}", message, listed)
            }
            OperationError::Conflict {
                message,
                existing_id,
            } => format!("{} Existing record id: {}", message, existing_id),
            OperationError::Storage(_) => {
                "The data store could not complete that request. Nothing was changed; \
                 please try again shortly."
                    .to_string()
            }
            OperationError::ExternalService(_) => {
                "An external service did not respond. Please try again.".to_string()
            }
        }
    }

    pub fn candidates(&self) -> &[CandidateSummary] {
        match self {
            OperationError::AmbiguousTarget { candidates, .. } => candidates,
            _ => &[],
        }
    }
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => {
                OperationError::NotFound(format!("No {} with id {} exists.", kind, id))
            }
            StoreError::Backend(msg) => OperationError::Storage(msg),
        }
    }
}

impl From<ConciergeError> for OperationError {
    fn from(err: ConciergeError) -> Self {
        match err {
            ConciergeError::Validation(msg) => OperationError::Validation(msg),
            ConciergeError::NotFound(msg) => OperationError::NotFound(msg),
            other => OperationError::Storage(other.to_string()),
        }
    }
}

/// Errors translating a model tool call into an [`Intent`](crate::Intent).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntentError {
    #[error("Unknown operation type: {0}")]
    UnknownOperation(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Action {action} is not supported for {operation}")]
    UnsupportedAction { operation: String, action: String },
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}
