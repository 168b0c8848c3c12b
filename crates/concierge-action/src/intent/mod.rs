//! Structured intents.
//!
//! An [`Intent`] is a closed tagged union: one variant per operation family,
//! each carrying a typed payload. JSON only exists at the model edge
//! ([`tool`]), where arguments are translated into this form immediately.

pub mod tool;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use concierge_core::{ContactDraft, ContactPatch, DateRange, EventDraft, EventPatch, ProfilePatch};

use crate::types::{ActionKind, OperationType};

pub use tool::{tool_definitions, RawIntent, CRM_TOOL_NAME};

/// One requested operation plus the user text that prompted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub operation: Operation,
    /// Latest user message of the turn. The temporal guard reads it.
    pub raw_text: String,
}

impl Intent {
    pub fn new(operation: Operation, raw_text: impl Into<String>) -> Self {
        Self {
            operation,
            raw_text: raw_text.into(),
        }
    }

    pub fn operation_type(&self) -> OperationType {
        match &self.operation {
            Operation::Contact(_) => OperationType::Contact,
            Operation::Calendar(_) => OperationType::Calendar,
            Operation::Alert(_) => OperationType::Alert,
            Operation::Settings(_) => OperationType::Settings,
            Operation::Duplicates(_) => OperationType::DuplicateManagement,
            Operation::General => OperationType::General,
        }
    }

    pub fn action(&self) -> ActionKind {
        match &self.operation {
            Operation::Contact(op) => match op {
                ContactOp::Create(_) => ActionKind::Create,
                ContactOp::Read(_) => ActionKind::Read,
                ContactOp::Update { .. } => ActionKind::Update,
                ContactOp::Delete(_) => ActionKind::Delete,
                ContactOp::List { .. } => ActionKind::List,
                ContactOp::Search(_) => ActionKind::Search,
            },
            Operation::Calendar(op) => match op {
                CalendarOp::Create(_) => ActionKind::Create,
                CalendarOp::Read(_) => ActionKind::Read,
                CalendarOp::Update { .. } => ActionKind::Update,
                CalendarOp::Delete(_) => ActionKind::Delete,
                CalendarOp::List { .. } => ActionKind::List,
                CalendarOp::Search(_) => ActionKind::Search,
            },
            Operation::Alert(op) => match op {
                AlertOp::Create(_) => ActionKind::Create,
                AlertOp::Read(_) => ActionKind::Read,
                AlertOp::Update { .. } => ActionKind::Update,
                AlertOp::Delete { .. } => ActionKind::Delete,
                AlertOp::List(_) => ActionKind::List,
                AlertOp::Search(_) => ActionKind::Search,
            },
            Operation::Settings(op) => match op {
                SettingsOp::Read => ActionKind::Read,
                SettingsOp::Update(_) => ActionKind::Update,
            },
            Operation::Duplicates(op) => match op {
                DuplicateOp::Analyze(_) => ActionKind::Analyze,
                DuplicateOp::List => ActionKind::List,
                DuplicateOp::Delete { .. } => ActionKind::Delete,
            },
            Operation::General => ActionKind::Help,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "op", rename_all = "snake_case")]
pub enum Operation {
    Contact(ContactOp),
    Calendar(CalendarOp),
    Alert(AlertOp),
    Settings(SettingsOp),
    Duplicates(DuplicateOp),
    General,
}

// =============================================================================
// Contacts
// =============================================================================

/// How to find contacts. Identifiers stay raw here; the router validates
/// them so the user learns why a value was refused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactCriteria {
    pub id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub search_term: Option<String>,
}

impl ContactCriteria {
    pub fn is_empty(&self) -> bool {
        [&self.id, &self.first_name, &self.last_name, &self.search_term]
            .iter()
            .all(|v| v.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactOp {
    Create(ContactDraft),
    Read(ContactCriteria),
    Update {
        target: ContactCriteria,
        patch: ContactPatch,
    },
    Delete(ContactCriteria),
    List {
        limit: Option<usize>,
    },
    Search(ContactCriteria),
}

// =============================================================================
// Calendar
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCriteria {
    pub id: Option<String>,
    pub search_term: Option<String>,
    pub range: Option<DateRange>,
    pub limit: Option<usize>,
}

impl EventCriteria {
    pub fn is_empty(&self) -> bool {
        self.id.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.search_term.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.range.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarOp {
    Create(EventDraft),
    Read(EventCriteria),
    Update {
        target: EventCriteria,
        patch: EventPatch,
    },
    Delete(EventCriteria),
    List {
        limit: Option<usize>,
    },
    Search(EventCriteria),
}

// =============================================================================
// Alerts
// =============================================================================

/// Alert fields as the user expressed them. Priority and status stay as
/// text until the router maps them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertCriteria {
    pub id: Option<String>,
    pub search_term: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOp {
    Create(AlertFields),
    Read(AlertCriteria),
    Update { id: Option<String>, fields: AlertFields },
    Delete { id: Option<String> },
    List(AlertCriteria),
    Search(AlertCriteria),
}

// =============================================================================
// Settings and duplicates
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsOp {
    Read,
    Update(ProfilePatch),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateOp {
    /// Analyze records sharing a name. Without criteria, every duplicate
    /// group is analyzed.
    Analyze(Option<ContactCriteria>),
    /// Report groups of same-name contacts without ranking them.
    List,
    /// Delete candidates from an earlier analysis, in order.
    Delete { ids: Vec<String> },
}
