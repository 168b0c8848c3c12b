//! In-process entity store.
//!
//! Backs tests and the `memory` storage backend. Tables are plain maps
//! behind a mutex; ordering rules match the SQLite backend.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use concierge_core::{
    Alert, AlertDraft, AlertPatch, CalendarEvent, CanonicalId, Contact, ContactDraft,
    ContactPatch, EntityKind, EventDraft, EventPatch, ProfilePatch, SettingsProfile, UserId,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    contact_matches, event_matches, AlertQuery, ContactQuery, EntityStore, EventQuery,
};

#[derive(Default)]
struct Tables {
    contacts: HashMap<CanonicalId, Contact>,
    events: HashMap<CanonicalId, CalendarEvent>,
    alerts: HashMap<CanonicalId, Alert>,
    profiles: HashMap<UserId, SettingsProfile>,
}

/// Entity store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| StoreError::Backend(format!("Store lock poisoned: {}", e)))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert_contact(&self, user: &UserId, draft: ContactDraft) -> StoreResult<Contact> {
        let now = Utc::now();
        let contact = Contact {
            id: CanonicalId::new_v4(),
            user_id: user.clone(),
            first_name: draft.first_name,
            last_name: draft.last_name,
            email: draft.email,
            phone: draft.phone,
            mobile_phone: draft.mobile_phone,
            work_phone: draft.work_phone,
            company: draft.company,
            job_title: draft.job_title,
            address: draft.address,
            birthday: draft.birthday,
            notes: draft.notes,
            website: draft.website,
            created_at: now,
            updated_at: now,
        };
        self.lock()?.contacts.insert(contact.id, contact.clone());
        debug!(user = %user, id = %contact.id, "Contact inserted");
        Ok(contact)
    }

    async fn get_contact(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<Contact>> {
        Ok(self
            .lock()?
            .contacts
            .get(&id)
            .filter(|c| &c.user_id == user)
            .cloned())
    }

    async fn find_contacts(&self, user: &UserId, query: &ContactQuery) -> StoreResult<Vec<Contact>> {
        let tables = self.lock()?;
        let mut found: Vec<Contact> = tables
            .contacts
            .values()
            .filter(|c| &c.user_id == user && contact_matches(c, query))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        if let ContactQuery::Recent { limit } = query {
            found.truncate(*limit);
        }
        Ok(found)
    }

    async fn update_contact(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &ContactPatch,
    ) -> StoreResult<Contact> {
        let mut tables = self.lock()?;
        let contact = tables
            .contacts
            .get_mut(&id)
            .filter(|c| &c.user_id == user)
            .ok_or(StoreError::NotFound {
                kind: EntityKind::Contact,
                id,
            })?;
        patch.apply(contact);
        contact.updated_at = Utc::now();
        Ok(contact.clone())
    }

    async fn delete_contact(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let owned = tables.contacts.get(&id).is_some_and(|c| &c.user_id == user);
        if owned {
            tables.contacts.remove(&id);
        }
        Ok(owned)
    }

    async fn insert_event(&self, user: &UserId, draft: EventDraft) -> StoreResult<CalendarEvent> {
        let now = Utc::now();
        let event = CalendarEvent {
            id: CanonicalId::new_v4(),
            user_id: user.clone(),
            title: draft.title,
            description: draft.description,
            location: draft.location,
            start_time: draft.start_time,
            end_time: draft.end_time.unwrap_or(draft.start_time),
            attendees: draft.attendees,
            external_id: None,
            created_at: now,
            updated_at: now,
        };
        self.lock()?.events.insert(event.id, event.clone());
        debug!(user = %user, id = %event.id, "Event inserted");
        Ok(event)
    }

    async fn get_event(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<CalendarEvent>> {
        Ok(self
            .lock()?
            .events
            .get(&id)
            .filter(|e| &e.user_id == user)
            .cloned())
    }

    async fn find_events(&self, user: &UserId, query: &EventQuery) -> StoreResult<Vec<CalendarEvent>> {
        let tables = self.lock()?;
        let mut found: Vec<CalendarEvent> = tables
            .events
            .values()
            .filter(|e| &e.user_id == user && event_matches(e, query))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn update_event(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &EventPatch,
    ) -> StoreResult<CalendarEvent> {
        let mut tables = self.lock()?;
        let event = tables
            .events
            .get_mut(&id)
            .filter(|e| &e.user_id == user)
            .ok_or(StoreError::NotFound {
                kind: EntityKind::CalendarEvent,
                id,
            })?;
        patch.apply(event);
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn delete_event(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let owned = tables.events.get(&id).is_some_and(|e| &e.user_id == user);
        if owned {
            tables.events.remove(&id);
        }
        Ok(owned)
    }

    async fn insert_alert(&self, user: &UserId, draft: AlertDraft) -> StoreResult<Alert> {
        let now = Utc::now();
        let alert = Alert {
            id: CanonicalId::new_v4(),
            user_id: user.clone(),
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            status: draft.status,
            due_at: draft.due_at,
            created_at: now,
            updated_at: now,
        };
        self.lock()?.alerts.insert(alert.id, alert.clone());
        Ok(alert)
    }

    async fn get_alert(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<Alert>> {
        Ok(self
            .lock()?
            .alerts
            .get(&id)
            .filter(|a| &a.user_id == user)
            .cloned())
    }

    async fn find_alerts(&self, user: &UserId, query: &AlertQuery) -> StoreResult<Vec<Alert>> {
        let tables = self.lock()?;
        let mut found: Vec<Alert> = tables
            .alerts
            .values()
            .filter(|a| &a.user_id == user)
            .filter(|a| query.status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        // Priority descending, then due soonest with undated last.
        found.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| match (a.due_at, b.due_at) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn update_alert(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &AlertPatch,
    ) -> StoreResult<Alert> {
        let mut tables = self.lock()?;
        let alert = tables
            .alerts
            .get_mut(&id)
            .filter(|a| &a.user_id == user)
            .ok_or(StoreError::NotFound {
                kind: EntityKind::Alert,
                id,
            })?;
        patch.apply(alert);
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    async fn delete_alert(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        let owned = tables.alerts.get(&id).is_some_and(|a| &a.user_id == user);
        if owned {
            tables.alerts.remove(&id);
        }
        Ok(owned)
    }

    async fn get_profile(&self, user: &UserId) -> StoreResult<Option<SettingsProfile>> {
        Ok(self.lock()?.profiles.get(user).cloned())
    }

    async fn upsert_profile(&self, user: &UserId, patch: &ProfilePatch) -> StoreResult<SettingsProfile> {
        let now = Utc::now();
        let mut tables = self.lock()?;
        let profile = tables
            .profiles
            .entry(user.clone())
            .or_insert_with(|| SettingsProfile::empty(user.clone(), now));
        patch.apply(profile);
        profile.updated_at = now;
        Ok(profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use concierge_core::AlertStatus;

    fn draft(first: &str, last: &str) -> ContactDraft {
        ContactDraft {
            first_name: first.to_string(),
            last_name: Some(last.to_string()),
            ..ContactDraft::default()
        }
    }

    #[tokio::test]
    async fn test_contacts_are_user_scoped() {
        let store = MemoryStore::new();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let c = store.insert_contact(&alice, draft("Jane", "Doe")).await.unwrap();

        assert!(store.get_contact(&alice, c.id).await.unwrap().is_some());
        assert!(store.get_contact(&bob, c.id).await.unwrap().is_none());
        assert!(!store.delete_contact(&bob, c.id).await.unwrap());
        let err = store
            .update_contact(&bob, c.id, &ContactPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.delete_contact(&alice, c.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_contacts_by_full_name() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");
        store.insert_contact(&user, draft("Jane", "Doe")).await.unwrap();
        store.insert_contact(&user, draft("John", "Doe")).await.unwrap();

        let found = store
            .find_contacts(
                &user,
                &ContactQuery::FullName {
                    first: "jane".to_string(),
                    last: Some("doe".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].first_name, "Jane");

        let by_term = store
            .find_contacts(&user, &ContactQuery::Term("doe".to_string()))
            .await
            .unwrap();
        assert_eq!(by_term.len(), 2);
    }

    #[tokio::test]
    async fn test_recent_contacts_limit() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");
        for i in 0..5 {
            store
                .insert_contact(&user, draft(&format!("P{}", i), "X"))
                .await
                .unwrap();
        }
        let found = store
            .find_contacts(&user, &ContactQuery::Recent { limit: 3 })
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_events_sorted_by_start() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");
        let base = Utc::now();
        for (title, offset) in [("later", 5), ("sooner", 1)] {
            store
                .insert_event(
                    &user,
                    EventDraft {
                        title: title.to_string(),
                        description: None,
                        location: None,
                        start_time: base + Duration::hours(offset),
                        end_time: Some(base + Duration::hours(offset + 1)),
                        attendees: vec![],
                    },
                )
                .await
                .unwrap();
        }
        let found = store.find_events(&user, &EventQuery::default()).await.unwrap();
        assert_eq!(found[0].title, "sooner");
        assert_eq!(found[1].title, "later");
    }

    #[tokio::test]
    async fn test_alerts_ordered_by_priority_then_due() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");
        let now = Utc::now();
        let mk = |title: &str, priority: i32, due: Option<i64>| AlertDraft {
            title: title.to_string(),
            description: None,
            priority,
            status: AlertStatus::Pending,
            due_at: due.map(|h| now + Duration::hours(h)),
        };
        store.insert_alert(&user, mk("low", 1, Some(1))).await.unwrap();
        store.insert_alert(&user, mk("high-undated", 3, None)).await.unwrap();
        store.insert_alert(&user, mk("high-soon", 3, Some(2))).await.unwrap();

        let titles: Vec<String> = store
            .find_alerts(&user, &AlertQuery::default())
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["high-soon", "high-undated", "low"]);
    }

    #[tokio::test]
    async fn test_upsert_profile_creates_then_patches() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");
        assert!(store.get_profile(&user).await.unwrap().is_none());

        let patch = ProfilePatch {
            display_name: Some("Jane".to_string()),
            ..ProfilePatch::default()
        };
        let profile = store.upsert_profile(&user, &patch).await.unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Jane"));
        assert!(profile.email_notifications);

        let patch = ProfilePatch {
            email_notifications: Some(false),
            ..ProfilePatch::default()
        };
        let profile = store.upsert_profile(&user, &patch).await.unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Jane"));
        assert!(!profile.email_notifications);
    }
}
