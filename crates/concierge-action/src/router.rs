//! Operation router.
//!
//! Runs one [`Intent`] against the entity store: temporal guard first, then
//! the handler for its operation family. Every failure is folded into the
//! returned [`OperationResult`]; nothing here returns `Err` to the caller.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use concierge_core::{RequestContext, UserId};
use concierge_storage::{EntityStore, SearchCache};

use crate::duplicates::DuplicateEcho;
use crate::error::OperationError;
use crate::intent::{Intent, Operation};
use crate::temporal;
use crate::types::OperationResult;

/// Router tunables.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Length given to events created without an end time.
    pub default_event_minutes: i64,
    pub contact_list_limit: usize,
    pub event_list_limit: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            default_event_minutes: 60,
            contact_list_limit: 25,
            event_list_limit: 20,
        }
    }
}

/// What a handler produced on success.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub message: String,
    pub data: Option<Value>,
    pub wrote: bool,
    pub duplicate_echo: Vec<DuplicateEcho>,
}

impl Outcome {
    pub(crate) fn read(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            ..Self::default()
        }
    }

    pub(crate) fn write(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
            wrote: true,
            ..Self::default()
        }
    }
}

pub struct OperationRouter {
    pub(crate) store: Arc<dyn EntityStore>,
    pub(crate) cache: Option<Arc<dyn SearchCache>>,
    pub(crate) settings: RouterSettings,
}

impl OperationRouter {
    pub fn new(store: Arc<dyn EntityStore>, settings: RouterSettings) -> Self {
        Self {
            store,
            cache: None,
            settings,
        }
    }

    /// Attach the contact search cache.
    pub fn with_cache(mut self, cache: Arc<dyn SearchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Execute one intent for the caller in `ctx`.
    pub async fn execute(&self, mut intent: Intent, ctx: &RequestContext) -> OperationResult {
        let operation = intent.operation_type();
        let action = intent.action();

        let outcome = match temporal::apply(&mut intent, ctx) {
            Err(e) => Err(e),
            Ok(()) => self.dispatch(intent.operation, ctx).await,
        };

        match outcome {
            Ok(outcome) => {
                info!(
                    user_id = %ctx.user_id,
                    operation = %operation,
                    action = %action,
                    wrote = outcome.wrote,
                    "Operation succeeded"
                );
                OperationResult {
                    success: true,
                    operation,
                    action,
                    message: outcome.message,
                    data: outcome.data,
                    error: None,
                    wrote: outcome.wrote,
                    duplicate_echo: outcome.duplicate_echo,
                }
            }
            Err(err) => {
                match &err {
                    OperationError::Storage(detail) | OperationError::ExternalService(detail) => {
                        error!(
                            user_id = %ctx.user_id,
                            operation = %operation,
                            action = %action,
                            error = %detail,
                            "Operation failed"
                        );
                    }
                    other => {
                        info!(
                            user_id = %ctx.user_id,
                            operation = %operation,
                            action = %action,
                            kind = other.kind(),
                            "Operation refused"
                        );
                    }
                }
                OperationResult::failure(operation, action, &err)
            }
        }
    }

    async fn dispatch(&self, operation: Operation, ctx: &RequestContext) -> Result<Outcome, OperationError> {
        match operation {
            Operation::Contact(op) => self.contact(op, ctx).await,
            Operation::Calendar(op) => self.calendar(op, ctx).await,
            Operation::Alert(op) => self.alert(op, ctx).await,
            Operation::Settings(op) => self.settings(op, ctx).await,
            Operation::Duplicates(op) => self.duplicates(op, ctx).await,
            Operation::General => Ok(general_help()),
        }
    }

    /// Drop the user's cached contact searches. Failure is logged only.
    pub(crate) async fn invalidate_contacts(&self, user: &UserId) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear_user_cache(user).await {
                warn!(user_id = %user, error = %e, "Search cache invalidation failed");
            }
        }
    }
}

pub const CAPABILITIES: &str = "I can manage your CRM: create, find, update and delete contacts; \
schedule, search, change and cancel calendar events; keep prioritized alerts; read and update \
your profile settings; and find duplicate contacts, recommend which record to keep, and delete \
the extras once you confirm.";

fn general_help() -> Outcome {
    Outcome::read(
        CAPABILITIES,
        serde_json::json!({
            "operations": ["contact", "calendar", "alert", "settings", "duplicate_management"],
        }),
    )
}
