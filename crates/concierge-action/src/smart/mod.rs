//! Smart router: picks the fast path for simple calendar requests.
//!
//! Classification walks an ordered list of [`RoutingRule`]s and takes the
//! first one that applies. Complexity rules come first and always route to
//! the model, so a request that merely looks simple ("when is my meeting
//! tomorrow at 3pm?") never takes the fast path.

pub mod rules;
pub mod time;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use concierge_core::{CanonicalId, EventDraft, EventPatch, RequestContext};

use crate::intent::{CalendarOp, EventCriteria, Intent, Operation};

pub use rules::default_rules;

/// A fully specified calendar action that needs no model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FastAction {
    CreateEvent(EventDraft),
    UpdateEvent { id: CanonicalId, patch: EventPatch },
    DeleteEvent { id: CanonicalId },
}

impl FastAction {
    pub fn name(&self) -> &'static str {
        match self {
            FastAction::CreateEvent(_) => "create_event",
            FastAction::UpdateEvent { .. } => "update_event",
            FastAction::DeleteEvent { .. } => "delete_event",
        }
    }

    /// The equivalent intent, so the fast path runs through the same router
    /// and temporal guard as model-driven calls.
    pub fn into_intent(self, raw_text: &str) -> Intent {
        let op = match self {
            FastAction::CreateEvent(draft) => CalendarOp::Create(draft),
            FastAction::UpdateEvent { id, patch } => CalendarOp::Update {
                target: EventCriteria {
                    id: Some(id.to_string()),
                    ..EventCriteria::default()
                },
                patch,
            },
            FastAction::DeleteEvent { id } => CalendarOp::Delete(EventCriteria {
                id: Some(id.to_string()),
                ..EventCriteria::default()
            }),
        };
        Intent::new(Operation::Calendar(op), raw_text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Fast(FastAction),
    /// Hand the request to the model. `rule` names what decided that.
    Slow { rule: &'static str },
}

impl Route {
    pub fn is_fast(&self) -> bool {
        matches!(self, Route::Fast(_))
    }
}

/// Everything a rule may look at.
pub struct ClassifyInput<'a> {
    pub raw: &'a str,
    pub lower: String,
    pub ids: Vec<CanonicalId>,
    pub ctx: &'a RequestContext,
    pub default_event_minutes: i64,
}

/// One entry of the ordered rule list.
#[derive(Clone, Copy)]
pub struct RoutingRule {
    pub name: &'static str,
    pub applies: fn(&ClassifyInput<'_>) -> bool,
    pub route: fn(&ClassifyInput<'_>) -> Route,
}

impl std::fmt::Debug for RoutingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingRule").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub struct SmartRouter {
    rules: Vec<RoutingRule>,
    default_event_minutes: i64,
}

impl SmartRouter {
    pub fn new(default_event_minutes: i64) -> Self {
        Self::with_rules(default_rules(), default_event_minutes)
    }

    pub fn with_rules(rules: Vec<RoutingRule>, default_event_minutes: i64) -> Self {
        Self {
            rules,
            default_event_minutes,
        }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn classify(&self, raw_text: &str, ctx: &RequestContext) -> Route {
        let mut ids = CanonicalId::find_all(raw_text);
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(*id));
        let input = ClassifyInput {
            raw: raw_text,
            lower: raw_text.to_lowercase(),
            ids,
            ctx,
            default_event_minutes: self.default_event_minutes,
        };
        for rule in &self.rules {
            if (rule.applies)(&input) {
                let route = (rule.route)(&input);
                debug!(rule = rule.name, fast = route.is_fast(), "Smart router matched");
                return route;
            }
        }
        Route::Slow { rule: "no_match" }
    }

    /// The fast action for `raw_text`, if any.
    pub fn fast_action(&self, raw_text: &str, ctx: &RequestContext) -> Option<FastAction> {
        match self.classify(raw_text, ctx) {
            Route::Fast(action) => Some(action),
            Route::Slow { .. } => None,
        }
    }
}
