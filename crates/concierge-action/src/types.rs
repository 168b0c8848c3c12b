//! Core types and value objects for the action engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use concierge_core::{CanonicalId, EntityKind};

use crate::duplicates::DuplicateEcho;
use crate::error::OperationError;

// =============================================================================
// Enums
// =============================================================================

/// The closed set of operation families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Contact,
    Calendar,
    Alert,
    Settings,
    DuplicateManagement,
    General,
}

impl OperationType {
    /// The entity table written by this family, if any.
    pub fn entity(self) -> Option<EntityKind> {
        match self {
            OperationType::Contact | OperationType::DuplicateManagement => {
                Some(EntityKind::Contact)
            }
            OperationType::Calendar => Some(EntityKind::CalendarEvent),
            OperationType::Alert => Some(EntityKind::Alert),
            OperationType::Settings => Some(EntityKind::Settings),
            OperationType::General => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Contact => write!(f, "contact"),
            OperationType::Calendar => write!(f, "calendar"),
            OperationType::Alert => write!(f, "alert"),
            OperationType::Settings => write!(f, "settings"),
            OperationType::DuplicateManagement => write!(f, "duplicate_management"),
            OperationType::General => write!(f, "general"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Ok(OperationType::Contact),
            "calendar" | "event" | "events" => Ok(OperationType::Calendar),
            "alert" | "alerts" | "reminder" => Ok(OperationType::Alert),
            "settings" | "profile" => Ok(OperationType::Settings),
            "duplicate_management" | "duplicates" => Ok(OperationType::DuplicateManagement),
            "general" => Ok(OperationType::General),
            other => Err(format!("Unknown operation type: {}", other)),
        }
    }
}

/// Verb applied to an operation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Read,
    Update,
    Delete,
    List,
    Search,
    Analyze,
    Help,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => write!(f, "create"),
            ActionKind::Read => write!(f, "read"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::Delete => write!(f, "delete"),
            ActionKind::List => write!(f, "list"),
            ActionKind::Search => write!(f, "search"),
            ActionKind::Analyze => write!(f, "analyze"),
            ActionKind::Help => write!(f, "help"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(ActionKind::Create),
            "read" | "get" => Ok(ActionKind::Read),
            "update" => Ok(ActionKind::Update),
            "delete" => Ok(ActionKind::Delete),
            "list" => Ok(ActionKind::List),
            "search" | "find" => Ok(ActionKind::Search),
            "analyze" => Ok(ActionKind::Analyze),
            "help" => Ok(ActionKind::Help),
            other => Err(format!("Unknown action: {}", other)),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// A record offered to the user for disambiguation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub id: CanonicalId,
    pub label: String,
}

/// Structured failure attached to an [`OperationResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<CandidateSummary>,
}

impl From<&OperationError> for ErrorDetail {
    fn from(err: &OperationError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.user_message(),
            candidates: err.candidates().to_vec(),
        }
    }
}

/// Normalized outcome of one routed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub operation: OperationType,
    pub action: ActionKind,
    /// Human-readable summary of what happened.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Whether any record was inserted, updated or deleted.
    pub wrote: bool,
    /// Duplicate analyses produced by this operation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicate_echo: Vec<DuplicateEcho>,
}

impl OperationResult {
    pub fn failure(operation: OperationType, action: ActionKind, err: &OperationError) -> Self {
        Self {
            success: false,
            operation,
            action,
            message: err.user_message(),
            data: None,
            error: Some(ErrorDetail::from(err)),
            wrote: false,
            duplicate_echo: Vec::new(),
        }
    }

    /// The entity table this result wrote to, if it wrote.
    pub fn entity_written(&self) -> Option<EntityKind> {
        if self.wrote {
            self.operation.entity()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type_round_trip() {
        for op in [
            OperationType::Contact,
            OperationType::Calendar,
            OperationType::Alert,
            OperationType::Settings,
            OperationType::DuplicateManagement,
            OperationType::General,
        ] {
            assert_eq!(op.to_string().parse::<OperationType>().unwrap(), op);
        }
        assert!("invoice".parse::<OperationType>().is_err());
    }

    #[test]
    fn test_action_kind_aliases() {
        assert_eq!("FIND".parse::<ActionKind>().unwrap(), ActionKind::Search);
        assert_eq!("get".parse::<ActionKind>().unwrap(), ActionKind::Read);
        assert!("merge".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_failure_result_shape() {
        let err = OperationError::NotFound("No contact named Zed.".to_string());
        let result = OperationResult::failure(OperationType::Contact, ActionKind::Delete, &err);
        assert!(!result.success);
        assert!(!result.wrote);
        assert_eq!(result.entity_written(), None);
        let detail = result.error.unwrap();
        assert_eq!(detail.kind, "not_found");
        assert_eq!(detail.message, "No contact named Zed.");
    }

    #[test]
    fn test_entity_written_for_duplicates_is_contact() {
        assert_eq!(
            OperationType::DuplicateManagement.entity(),
            Some(EntityKind::Contact)
        );
        assert_eq!(OperationType::General.entity(), None);
    }
}
