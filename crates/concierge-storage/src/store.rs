//! The entity storage boundary.
//!
//! Row-level CRUD plus filtered search over contacts, calendar events,
//! alerts and settings profiles. Every call is scoped by the authenticated
//! [`UserId`]; there is no unscoped query on this trait.

use async_trait::async_trait;

use concierge_core::{
    Alert, AlertDraft, AlertPatch, AlertStatus, CalendarEvent, CanonicalId, Contact,
    ContactDraft, ContactPatch, DateRange, EventDraft, EventPatch, ProfilePatch,
    SettingsProfile, UserId,
};

use crate::error::StoreResult;

/// Contact lookup shapes. Results are always ordered most recently updated
/// first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContactQuery {
    /// Case-insensitive equality on first and last name. `last: None`
    /// matches contacts without a last name.
    FullName { first: String, last: Option<String> },
    /// Case-insensitive substring over name, email, company and phone
    /// fields.
    Term(String),
    /// The most recently updated contacts.
    Recent { limit: usize },
}

/// Calendar event filter. Results are ordered by start time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventQuery {
    /// Substring over title, description and location.
    pub term: Option<String>,
    /// Only events overlapping this range.
    pub range: Option<DateRange>,
    pub limit: Option<usize>,
}

/// Alert filter. Results are ordered by priority (highest first), then due
/// time (soonest first, undated last).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AlertQuery {
    pub status: Option<AlertStatus>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    // ---- contacts ----
    async fn insert_contact(&self, user: &UserId, draft: ContactDraft) -> StoreResult<Contact>;
    async fn get_contact(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<Contact>>;
    async fn find_contacts(&self, user: &UserId, query: &ContactQuery) -> StoreResult<Vec<Contact>>;
    /// Fails with `NotFound` when the id does not belong to the user.
    async fn update_contact(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &ContactPatch,
    ) -> StoreResult<Contact>;
    /// Returns `false` when nothing was deleted.
    async fn delete_contact(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool>;

    // ---- calendar ----
    async fn insert_event(&self, user: &UserId, draft: EventDraft) -> StoreResult<CalendarEvent>;
    async fn get_event(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<CalendarEvent>>;
    async fn find_events(&self, user: &UserId, query: &EventQuery) -> StoreResult<Vec<CalendarEvent>>;
    async fn update_event(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &EventPatch,
    ) -> StoreResult<CalendarEvent>;
    async fn delete_event(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool>;

    // ---- alerts ----
    async fn insert_alert(&self, user: &UserId, draft: AlertDraft) -> StoreResult<Alert>;
    async fn get_alert(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<Alert>>;
    async fn find_alerts(&self, user: &UserId, query: &AlertQuery) -> StoreResult<Vec<Alert>>;
    async fn update_alert(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &AlertPatch,
    ) -> StoreResult<Alert>;
    async fn delete_alert(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool>;

    // ---- settings ----
    async fn get_profile(&self, user: &UserId) -> StoreResult<Option<SettingsProfile>>;
    /// Create the profile if absent, then apply the patch.
    async fn upsert_profile(&self, user: &UserId, patch: &ProfilePatch) -> StoreResult<SettingsProfile>;
}

/// Whether a contact satisfies a query. Shared by backends that filter in
/// process.
pub fn contact_matches(contact: &Contact, query: &ContactQuery) -> bool {
    match query {
        ContactQuery::FullName { first, last } => {
            let first_ok = contact.first_name.trim().eq_ignore_ascii_case(first.trim());
            let stored_last = contact
                .last_name
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty());
            let last_ok = match (stored_last, last.as_deref().map(str::trim)) {
                (Some(stored), Some(wanted)) => stored.eq_ignore_ascii_case(wanted),
                (None, None) => true,
                (None, Some(wanted)) => wanted.is_empty(),
                (Some(_), None) => false,
            };
            first_ok && last_ok
        }
        ContactQuery::Term(term) => {
            let needle = term.trim().to_lowercase();
            if needle.is_empty() {
                return false;
            }
            SEARCHABLE_CONTACT_FIELDS.iter().any(|field| {
                contact
                    .field(field)
                    .is_some_and(|v| v.to_lowercase().contains(&needle))
            })
        }
        ContactQuery::Recent { .. } => true,
    }
}

/// Columns consulted by a free-text contact search.
pub const SEARCHABLE_CONTACT_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "email",
    "company",
    "phone",
    "mobile_phone",
    "work_phone",
];

/// Whether an event satisfies a filter (ignoring `limit`).
pub fn event_matches(event: &CalendarEvent, query: &EventQuery) -> bool {
    if let Some(range) = &query.range {
        if !range.overlaps(event.start_time, event.end_time) {
            return false;
        }
    }
    if let Some(term) = query.term.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let needle = term.to_lowercase();
        let hit = event.title.to_lowercase().contains(&needle)
            || event
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle))
            || event
                .location
                .as_deref()
                .is_some_and(|l| l.to_lowercase().contains(&needle));
        if !hit {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn contact(first: &str, last: Option<&str>) -> Contact {
        let now = Utc::now();
        Contact {
            id: CanonicalId::new_v4(),
            user_id: UserId::from("u1"),
            first_name: first.to_string(),
            last_name: last.map(str::to_string),
            email: Some(format!("{}@example.com", first.to_lowercase())),
            phone: None,
            mobile_phone: None,
            work_phone: None,
            company: Some("Initech".to_string()),
            job_title: None,
            address: None,
            birthday: None,
            notes: None,
            website: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_full_name_is_case_insensitive() {
        let c = contact("Jane", Some("Doe"));
        let q = ContactQuery::FullName {
            first: "jane".to_string(),
            last: Some("DOE".to_string()),
        };
        assert!(contact_matches(&c, &q));
    }

    #[test]
    fn test_full_name_missing_last_name() {
        let c = contact("Cher", None);
        let q = ContactQuery::FullName {
            first: "Cher".to_string(),
            last: None,
        };
        assert!(contact_matches(&c, &q));
        let with_last = contact("Cher", Some("Sarkisian"));
        assert!(!contact_matches(&with_last, &q));
    }

    #[test]
    fn test_term_matches_company_and_email() {
        let c = contact("Peter", Some("Gibbons"));
        assert!(contact_matches(&c, &ContactQuery::Term("initech".to_string())));
        assert!(contact_matches(&c, &ContactQuery::Term("peter@".to_string())));
        assert!(!contact_matches(&c, &ContactQuery::Term("globex".to_string())));
        assert!(!contact_matches(&c, &ContactQuery::Term("  ".to_string())));
    }

    #[test]
    fn test_event_matches_range_and_term() {
        let start = Utc::now();
        let event = CalendarEvent {
            id: CanonicalId::new_v4(),
            user_id: UserId::from("u1"),
            title: "Quarterly review".to_string(),
            description: None,
            location: Some("Room 4".to_string()),
            start_time: start,
            end_time: start + Duration::hours(1),
            attendees: vec![],
            external_id: None,
            created_at: start,
            updated_at: start,
        };
        let hit = EventQuery {
            term: Some("room".to_string()),
            range: Some(DateRange {
                start: start - Duration::days(1),
                end: start + Duration::days(1),
            }),
            limit: None,
        };
        assert!(event_matches(&event, &hit));

        let miss = EventQuery {
            range: Some(DateRange {
                start: start + Duration::hours(2),
                end: start + Duration::hours(3),
            }),
            ..EventQuery::default()
        };
        assert!(!event_matches(&event, &miss));
    }
}
