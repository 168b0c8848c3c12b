//! Operation engine for Concierge.
//!
//! Turns structured intents into scoped storage calls: the temporal guard
//! checks dates first, the operation router dispatches to per-family
//! handlers, the duplicate engine ranks same-person contacts, and the smart
//! router recognizes calendar requests simple enough to skip the model.

pub mod duplicates;
pub mod error;
pub mod handler;
pub mod intent;
pub mod router;
pub mod smart;
pub mod temporal;
pub mod types;

pub use duplicates::{analyze, DuplicateAnalysis, DuplicateEcho, CONTACT_IMPORTANT_FIELDS};
pub use error::{IntentError, OperationError};
pub use intent::{tool_definitions, Intent, Operation, RawIntent, CRM_TOOL_NAME};
pub use router::{OperationRouter, RouterSettings};
pub use smart::{FastAction, Route, RoutingRule, SmartRouter};
pub use types::{ActionKind, CandidateSummary, ErrorDetail, OperationResult, OperationType};
