//! The default routing rules, in priority order.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::debug;

use concierge_core::{CanonicalId, EventDraft, EventPatch};

use super::time::{self, TimeExpr};
use super::{ClassifyInput, FastAction, Route, RoutingRule};
use crate::temporal::PAST_EVENT_GRACE_SECS;

// =============================================================================
// Patterns
// =============================================================================

static TEMPORAL_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bwhen\s+(?:is|are|was|do|does|am|will)\b|\bwhat\s+time\b")
        .expect("Invalid temporal query regex")
});

static AVAILABILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:available|availability|free|busy|open\s+slots?)\b")
        .expect("Invalid availability regex")
});

static SEARCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:search|find|list|show|look\s+up|look\s+for|what'?s\s+on|anything\s+on)\b")
        .expect("Invalid search regex")
});

static CONFLICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:conflicts?|overlap\w*|double[- ]booked|clash\w*)\b")
        .expect("Invalid conflict regex")
});

static RESCHEDULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:reschedul\w*|postpon\w*|push\s+(?:it\s+)?back|bump)\b")
        .expect("Invalid reschedule regex")
});

static RECURRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:every|daily|weekly|monthly|recurring)\b").expect("Invalid recurrence regex")
});

static OTHER_ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:contacts?|alerts?|reminders?|remind|duplicates?|settings|profile)\b")
        .expect("Invalid entity regex")
});

static DELETE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:delete|remove|cancel)\b").expect("Invalid delete regex")
});

static CALENDAR_NOUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:event|meeting|appointment|calendar)\b").expect("Invalid calendar noun regex")
});

static UPDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:rename|retitle|change|update|move)\b").expect("Invalid update regex")
});

static CREATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:schedule|create|add|book|set\s+up|put)\b").expect("Invalid create regex")
});

static RENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:\b(?:rename|retitle)\b.*?|\b(?:title|name)\s+)\bto\s+["“']?([^"”']+?)["”']?\s*[.!]?\s*$"#,
    )
    .expect("Invalid rename regex")
});

static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["“]([^"”]+)["”]"#).expect("Invalid quoted title regex")
});

static CREATE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:please\s+)?(?:(?:can|could)\s+you\s+)?(?:schedule|create|add|book|set\s+up|put)\s+(?:(?:a|an|the|my)\s+)?(?:new\s+)?(?:(?:calendar\s+)?(event|meeting|appointment)\b\s*)?(?:(?:called|titled|named|about)\s+)?",
    )
    .expect("Invalid create prefix regex")
});

static CALENDAR_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:to|on|in|onto)\s+(?:my\s+)?calendar\b|\bplease\b")
        .expect("Invalid calendar suffix regex")
});

// =============================================================================
// Rules
// =============================================================================

macro_rules! slow_when {
    ($name:literal, $re:ident) => {
        RoutingRule {
            name: $name,
            applies: |input| $re.is_match(&input.lower),
            route: |_| Route::Slow { rule: $name },
        }
    };
}

/// Complexity exclusions first, then the three fast shapes.
pub fn default_rules() -> Vec<RoutingRule> {
    vec![
        slow_when!("temporal_query", TEMPORAL_QUERY_RE),
        slow_when!("availability", AVAILABILITY_RE),
        slow_when!("search_or_list", SEARCH_RE),
        slow_when!("conflict", CONFLICT_RE),
        slow_when!("reschedule", RESCHEDULE_RE),
        slow_when!("recurring", RECURRING_RE),
        slow_when!("other_entity", OTHER_ENTITY_RE),
        RoutingRule {
            name: "multiple_ids",
            applies: |input| input.ids.len() > 1,
            route: |_| Route::Slow { rule: "multiple_ids" },
        },
        RoutingRule {
            name: "delete_event",
            applies: |input| {
                input.ids.len() == 1
                    && DELETE_RE.is_match(&input.lower)
                    && CALENDAR_NOUN_RE.is_match(&input.lower)
            },
            route: |input| {
                Route::Fast(FastAction::DeleteEvent {
                    id: input.ids[0],
                })
            },
        },
        RoutingRule {
            name: "update_event",
            applies: |input| input.ids.len() == 1 && UPDATE_RE.is_match(&input.lower),
            route: route_update,
        },
        RoutingRule {
            name: "create_event",
            applies: |input| input.ids.is_empty() && CREATE_RE.is_match(&input.lower),
            route: route_create,
        },
    ]
}

fn resolve_future(
    expr: &TimeExpr,
    input: &ClassifyInput<'_>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), &'static str> {
    let (start, end) = time::resolve(expr, input.ctx, input.default_event_minutes).map_err(|e| {
        debug!(reason = ?e, "Fast path time not resolvable");
        "unresolved_time"
    })?;
    if start < input.ctx.now - Duration::seconds(PAST_EVENT_GRACE_SECS) {
        return Err("time_in_past");
    }
    Ok((start, end))
}

fn route_create(input: &ClassifyInput<'_>) -> Route {
    let Some(expr) = time::find(input.raw) else {
        return Route::Slow { rule: "create_without_time" };
    };
    if time::has_unparsed_duration(input.raw, &expr.spans) {
        return Route::Slow { rule: "unparsed_duration" };
    }
    let (start, end) = match resolve_future(&expr, input) {
        Ok(times) => times,
        Err(rule) => return Route::Slow { rule },
    };
    let Some(title) = create_title(input.raw, &expr) else {
        return Route::Slow { rule: "create_without_title" };
    };
    Route::Fast(FastAction::CreateEvent(EventDraft {
        title,
        description: None,
        location: None,
        start_time: start,
        end_time: Some(end),
        attendees: Vec::new(),
    }))
}

fn route_update(input: &ClassifyInput<'_>) -> Route {
    let id = input.ids[0];
    if let Some(expr) = time::find(input.raw) {
        if time::has_unparsed_duration(input.raw, &expr.spans) {
            return Route::Slow { rule: "unparsed_duration" };
        }
        let (start, end) = match resolve_future(&expr, input) {
            Ok(times) => times,
            Err(rule) => return Route::Slow { rule },
        };
        return Route::Fast(FastAction::UpdateEvent {
            id,
            patch: EventPatch {
                start_time: Some(start),
                // Without an explicit end or length the event keeps its length.
                end_time: (expr.end.is_some() || expr.duration_minutes.is_some()).then_some(end),
                ..EventPatch::default()
            },
        });
    }
    if time::has_unparsed_duration(input.raw, &[]) {
        return Route::Slow { rule: "unparsed_duration" };
    }
    if let Some(title) = rename_title(input.raw) {
        return Route::Fast(FastAction::UpdateEvent {
            id,
            patch: EventPatch {
                title: Some(title),
                ..EventPatch::default()
            },
        });
    }
    Route::Slow { rule: "update_unparsed" }
}

// =============================================================================
// Title extraction
// =============================================================================

fn rename_title(raw: &str) -> Option<String> {
    let caps = RENAME_RE.captures(raw.trim())?;
    let title = caps.get(1)?.as_str().trim();
    if title.is_empty() || !CanonicalId::find_all(title).is_empty() {
        return None;
    }
    Some(title.to_string())
}

/// Derive an event title from a create request: a quoted title wins,
/// otherwise the words left after cutting the verb and the time.
fn create_title(raw: &str, expr: &TimeExpr) -> Option<String> {
    if let Some(caps) = QUOTED_RE.captures(raw) {
        let quoted = caps.get(1)?.as_str().trim();
        if !quoted.is_empty() {
            return Some(quoted.to_string());
        }
    }

    let text = time::cut_spans(raw, &expr.spans);

    let noun = CREATE_PREFIX_RE
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| capitalize(&m.as_str().to_lowercase()));
    let text = CREATE_PREFIX_RE.replace(&text, "");
    let text = CALENDAR_SUFFIX_RE.replace_all(&text, " ");

    let mut words: Vec<&str> = text.split_whitespace().collect();
    while let Some(last) = words.last() {
        let bare = last.trim_end_matches(['.', ',', '!', ';', ':']);
        if bare.is_empty() || matches!(bare.to_lowercase().as_str(), "at" | "on" | "for" | "from" | "to") {
            words.pop();
        } else {
            break;
        }
    }
    let mut title = words.join(" ");
    title = title.trim_end_matches(['.', ',', '!', ';', ':']).to_string();

    match (title.is_empty(), noun) {
        (true, noun) => noun,
        (false, Some(noun)) if title.to_lowercase().starts_with("with ") => {
            Some(format!("{} {}", noun, title))
        }
        (false, _) => Some(capitalize(&title)),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
