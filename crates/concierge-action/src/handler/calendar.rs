use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use concierge_core::{CalendarEvent, CanonicalId, EventDraft, EventPatch, RequestContext, DateRange};
use concierge_storage::EventQuery;

use super::{clean, to_data};
use crate::error::OperationError;
use crate::intent::{CalendarOp, EventCriteria};
use crate::router::{OperationRouter, Outcome};
use crate::types::CandidateSummary;

const SEARCH_LIMIT: usize = 50;
const UPCOMING_DAYS: i64 = 365;

impl OperationRouter {
    pub(crate) async fn calendar(&self, op: CalendarOp, ctx: &RequestContext) -> Result<Outcome, OperationError> {
        match op {
            CalendarOp::Create(draft) => self.create_event(draft, ctx).await,
            CalendarOp::Read(criteria) => {
                let found = self.resolve_events(&criteria, ctx).await?;
                match found.len() {
                    0 => Err(OperationError::NotFound(format!(
                        "No calendar event matches {}.",
                        describe(&criteria, ctx)
                    ))),
                    1 => Ok(Outcome::read(
                        format!("Found {}.", label(&found[0], ctx)),
                        to_data(&found[0])?,
                    )),
                    n => Ok(Outcome::read(
                        format!("Found {} events matching {}.", n, describe(&criteria, ctx)),
                        json!({ "events": found, "count": n }),
                    )),
                }
            }
            CalendarOp::Search(criteria) => {
                let found = self.resolve_events(&criteria, ctx).await?;
                let message = if found.is_empty() {
                    format!("No events match {}.", describe(&criteria, ctx))
                } else {
                    format!("Found {} event(s) matching {}.", found.len(), describe(&criteria, ctx))
                };
                Ok(Outcome::read(message, json!({ "events": found, "count": found.len() })))
            }
            CalendarOp::List { limit } => {
                let query = EventQuery {
                    term: None,
                    range: Some(DateRange {
                        start: ctx.now,
                        end: ctx.now + Duration::days(UPCOMING_DAYS),
                    }),
                    limit: Some(limit.unwrap_or(self.settings.event_list_limit)),
                };
                let found = self.store.find_events(&ctx.user_id, &query).await?;
                let message = if found.is_empty() {
                    "You have no upcoming events.".to_string()
                } else {
                    format!("You have {} upcoming event(s).", found.len())
                };
                Ok(Outcome::read(message, json!({ "events": found, "count": found.len() })))
            }
            CalendarOp::Update { target, patch } => self.update_event(target, patch, ctx).await,
            CalendarOp::Delete(criteria) => {
                let event = self.resolve_one_event(&criteria, ctx).await?;
                if !self.store.delete_event(&ctx.user_id, event.id).await? {
                    return Err(OperationError::NotFound(format!(
                        "Event {} no longer exists.",
                        event.id
                    )));
                }
                Ok(Outcome::write(
                    format!("Deleted {}.", label(&event, ctx)),
                    json!({ "deleted_id": event.id }),
                ))
            }
        }
    }

    async fn create_event(&self, draft: EventDraft, ctx: &RequestContext) -> Result<Outcome, OperationError> {
        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(OperationError::Validation(
                "An event needs a title.".to_string(),
            ));
        }
        let end = draft
            .end_time
            .unwrap_or(draft.start_time + Duration::minutes(self.settings.default_event_minutes));
        check_order(draft.start_time, end)?;

        let draft = EventDraft {
            title,
            description: clean(draft.description),
            location: clean(draft.location),
            start_time: draft.start_time,
            end_time: Some(end),
            attendees: draft
                .attendees
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        };
        let event = self.store.insert_event(&ctx.user_id, draft).await?;
        Ok(Outcome::write(
            format!("Scheduled {}.", label(&event, ctx)),
            to_data(&event)?,
        ))
    }

    async fn update_event(
        &self,
        target: EventCriteria,
        patch: EventPatch,
        ctx: &RequestContext,
    ) -> Result<Outcome, OperationError> {
        let mut patch = EventPatch {
            title: patch.title.map(|t| t.trim().to_string()),
            description: clean(patch.description),
            location: clean(patch.location),
            ..patch
        };
        if patch.is_empty() {
            return Err(OperationError::Validation(
                "No changes were given for the event.".to_string(),
            ));
        }
        if patch.title.as_deref() == Some("") {
            return Err(OperationError::Validation(
                "An event's title cannot be blank.".to_string(),
            ));
        }

        let event = self.resolve_one_event(&target, ctx).await?;
        // Moving the start alone keeps the event's length.
        if let (Some(start), None) = (patch.start_time, patch.end_time) {
            patch.end_time = Some(start + (event.end_time - event.start_time));
        }
        check_order(
            patch.start_time.unwrap_or(event.start_time),
            patch.end_time.unwrap_or(event.end_time),
        )?;

        let updated = self.store.update_event(&ctx.user_id, event.id, &patch).await?;
        Ok(Outcome::write(
            format!("Updated {}.", label(&updated, ctx)),
            to_data(&updated)?,
        ))
    }

    async fn resolve_one_event(
        &self,
        criteria: &EventCriteria,
        ctx: &RequestContext,
    ) -> Result<CalendarEvent, OperationError> {
        if criteria.is_empty() {
            return Err(OperationError::Validation(
                "Tell me which event you mean: its title, its date or its record id.".to_string(),
            ));
        }
        let mut found = self.resolve_events(criteria, ctx).await?;
        match found.len() {
            0 => Err(OperationError::NotFound(format!(
                "No calendar event matches {}.",
                describe(criteria, ctx)
            ))),
            1 => Ok(found.remove(0)),
            n => Err(OperationError::AmbiguousTarget {
                message: format!(
                    "{} events match {}. Which one did you mean?",
                    n,
                    describe(criteria, ctx)
                ),
                candidates: found
                    .iter()
                    .map(|e| CandidateSummary {
                        id: e.id,
                        label: label(e, ctx),
                    })
                    .collect(),
            }),
        }
    }

    async fn resolve_events(
        &self,
        criteria: &EventCriteria,
        ctx: &RequestContext,
    ) -> Result<Vec<CalendarEvent>, OperationError> {
        if let Some(raw) = criteria.id.as_deref().filter(|s| !s.trim().is_empty()) {
            let id = CanonicalId::parse_field(raw, "an event id")?;
            return Ok(self.store.get_event(&ctx.user_id, id).await?.into_iter().collect());
        }
        let query = EventQuery {
            term: clean(criteria.search_term.clone()),
            range: criteria.range,
            limit: Some(criteria.limit.unwrap_or(SEARCH_LIMIT)),
        };
        Ok(self.store.find_events(&ctx.user_id, &query).await?)
    }
}

fn check_order(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), OperationError> {
    if end <= start {
        return Err(OperationError::Validation(
            "An event must end after it starts.".to_string(),
        ));
    }
    Ok(())
}

fn local(t: DateTime<Utc>, ctx: &RequestContext) -> String {
    t.with_timezone(&ctx.timezone)
        .format("%a %b %-d, %Y %-I:%M %p")
        .to_string()
}

fn label(event: &CalendarEvent, ctx: &RequestContext) -> String {
    format!("\"{}\" on {}", event.title, local(event.start_time, ctx))
}

fn describe(criteria: &EventCriteria, ctx: &RequestContext) -> String {
    if let Some(id) = criteria.id.as_deref().filter(|s| !s.trim().is_empty()) {
        return format!("id {}", id.trim());
    }
    let term = criteria
        .search_term
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    match (term, criteria.range) {
        (Some(t), Some(r)) => format!("\"{}\" between {} and {}", t, local(r.start, ctx), local(r.end, ctx)),
        (Some(t), None) => format!("\"{}\"", t),
        (None, Some(r)) => format!("the period {} to {}", local(r.start, ctx), local(r.end, ctx)),
        (None, None) => "your request".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use concierge_core::UserId;
    use concierge_storage::{EntityStore, MemoryStore};

    use crate::intent::{Intent, Operation};
    use crate::router::RouterSettings;

    use super::*;

    fn setup() -> (OperationRouter, Arc<MemoryStore>, RequestContext) {
        let store = Arc::new(MemoryStore::new());
        let router = OperationRouter::new(store.clone(), RouterSettings::default());
        (router, store, RequestContext::new(UserId::from("u1"), None))
    }

    fn draft(title: &str, start: DateTime<Utc>) -> EventDraft {
        EventDraft {
            title: title.to_string(),
            description: None,
            location: None,
            start_time: start,
            end_time: None,
            attendees: vec![],
        }
    }

    fn run(op: CalendarOp) -> Intent {
        Intent::new(Operation::Calendar(op), "test")
    }

    #[tokio::test]
    async fn test_create_defaults_end_time() {
        let (router, _, ctx) = setup();
        let start = ctx.now + Duration::days(1);
        let result = router
            .execute(run(CalendarOp::Create(draft("Dentist", start))), &ctx)
            .await;
        assert!(result.success);
        let event: CalendarEvent = serde_json::from_value(result.data.unwrap()).unwrap();
        assert_eq!(event.end_time - event.start_time, Duration::minutes(60));
    }

    #[tokio::test]
    async fn test_create_in_past_rejected_without_write() {
        let (router, store, ctx) = setup();
        let result = router
            .execute(run(CalendarOp::Create(draft("Standup", ctx.now - Duration::hours(3)))), &ctx)
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, "past_event_rejected");
        let all = store
            .find_events(&ctx.user_id, &EventQuery::default())
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_create_end_before_start_rejected() {
        let (router, _, ctx) = setup();
        let start = ctx.now + Duration::days(1);
        let mut d = draft("Lunch", start);
        d.end_time = Some(start - Duration::minutes(5));
        let result = router.execute(run(CalendarOp::Create(d)), &ctx).await;
        assert_eq!(result.error.unwrap().kind, "validation");
    }

    #[tokio::test]
    async fn test_update_start_keeps_duration() {
        let (router, store, ctx) = setup();
        let start = ctx.now + Duration::days(2);
        let mut d = draft("Review", start);
        d.end_time = Some(start + Duration::minutes(90));
        let event = store.insert_event(&ctx.user_id, d).await.unwrap();

        let new_start = start + Duration::hours(3);
        let result = router
            .execute(
                run(CalendarOp::Update {
                    target: EventCriteria {
                        id: Some(event.id.to_string()),
                        ..EventCriteria::default()
                    },
                    patch: EventPatch {
                        start_time: Some(new_start),
                        ..EventPatch::default()
                    },
                }),
                &ctx,
            )
            .await;
        assert!(result.success);
        let stored = store.get_event(&ctx.user_id, event.id).await.unwrap().unwrap();
        assert_eq!(stored.start_time, new_start);
        assert_eq!(stored.end_time, new_start + Duration::minutes(90));
    }

    #[tokio::test]
    async fn test_delete_by_meeting_number_rejected() {
        let (router, _, ctx) = setup();
        let result = router
            .execute(
                run(CalendarOp::Delete(EventCriteria {
                    id: Some("84512367890".to_string()),
                    ..EventCriteria::default()
                })),
                &ctx,
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, "validation");
    }

    #[tokio::test]
    async fn test_delete_ambiguous_title() {
        let (router, store, ctx) = setup();
        let start = ctx.now + Duration::days(1);
        store.insert_event(&ctx.user_id, draft("Sync", start)).await.unwrap();
        store
            .insert_event(&ctx.user_id, draft("Sync", start + Duration::days(1)))
            .await
            .unwrap();
        let result = router
            .execute(
                run(CalendarOp::Delete(EventCriteria {
                    search_term: Some("sync".to_string()),
                    ..EventCriteria::default()
                })),
                &ctx,
            )
            .await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, "ambiguous_target");
        assert_eq!(error.candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_list_only_upcoming() {
        let (router, store, ctx) = setup();
        store
            .insert_event(&ctx.user_id, draft("Old", ctx.now - Duration::days(3)))
            .await
            .unwrap();
        store
            .insert_event(&ctx.user_id, draft("Next", ctx.now + Duration::days(3)))
            .await
            .unwrap();
        let result = router.execute(run(CalendarOp::List { limit: None }), &ctx).await;
        assert_eq!(result.data.unwrap()["count"], 1);
    }
}
