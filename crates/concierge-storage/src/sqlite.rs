//! SQLite-backed entity store.
//!
//! Each trait call runs a short statement sequence under the
//! [`Database`] mutex. Updates are read-modify-write inside one lock hold.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;
use uuid::Uuid;

use concierge_core::{
    Alert, AlertDraft, AlertPatch, AlertStatus, CalendarEvent, CanonicalId, Contact,
    ContactDraft, ContactPatch, EntityKind, EventDraft, EventPatch, ProfilePatch,
    SettingsProfile, UserId,
};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::store::{AlertQuery, ContactQuery, EntityStore, EventQuery};

const CONTACT_COLUMNS: &str = "id, user_id, first_name, last_name, email, phone, mobile_phone, \
     work_phone, company, job_title, address, birthday, notes, website, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, user_id, title, description, location, start_time, end_time, \
     attendees, external_id, created_at, updated_at";

const ALERT_COLUMNS: &str =
    "id, user_id, title, description, priority, status, due_at, created_at, updated_at";

/// Entity store persisted in SQLite.
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Backend(format!("Invalid timestamp: {}", ms)))
}

fn parse_id(raw: &str) -> StoreResult<CanonicalId> {
    Uuid::parse_str(raw)
        .map(CanonicalId)
        .map_err(|e| StoreError::Backend(format!("Invalid UUID: {}", e)))
}

fn row_to_contact(row: &Row<'_>) -> StoreResult<Contact> {
    let id: String = row.get(0)?;
    let birthday: Option<String> = row.get(11)?;
    Ok(Contact {
        id: parse_id(&id)?,
        user_id: UserId(row.get(1)?),
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        mobile_phone: row.get(6)?,
        work_phone: row.get(7)?,
        company: row.get(8)?,
        job_title: row.get(9)?,
        address: row.get(10)?,
        birthday: birthday.and_then(|b| NaiveDate::parse_from_str(&b, "%Y-%m-%d").ok()),
        notes: row.get(12)?,
        website: row.get(13)?,
        created_at: from_millis(row.get(14)?)?,
        updated_at: from_millis(row.get(15)?)?,
    })
}

fn row_to_event(row: &Row<'_>) -> StoreResult<CalendarEvent> {
    let id: String = row.get(0)?;
    let attendees: String = row.get(7)?;
    Ok(CalendarEvent {
        id: parse_id(&id)?,
        user_id: UserId(row.get(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        start_time: from_millis(row.get(5)?)?,
        end_time: from_millis(row.get(6)?)?,
        attendees: serde_json::from_str(&attendees)
            .map_err(|e| StoreError::Backend(format!("Invalid attendees: {}", e)))?,
        external_id: row.get(8)?,
        created_at: from_millis(row.get(9)?)?,
        updated_at: from_millis(row.get(10)?)?,
    })
}

fn row_to_alert(row: &Row<'_>) -> StoreResult<Alert> {
    let id: String = row.get(0)?;
    let status: String = row.get(5)?;
    let due_at: Option<i64> = row.get(6)?;
    Ok(Alert {
        id: parse_id(&id)?,
        user_id: UserId(row.get(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        status: status.parse::<AlertStatus>().map_err(StoreError::Backend)?,
        due_at: due_at.map(from_millis).transpose()?,
        created_at: from_millis(row.get(7)?)?,
        updated_at: from_millis(row.get(8)?)?,
    })
}

fn row_to_profile(row: &Row<'_>) -> StoreResult<SettingsProfile> {
    let notifications: i64 = row.get(5)?;
    Ok(SettingsProfile {
        user_id: UserId(row.get(0)?),
        display_name: row.get(1)?,
        company: row.get(2)?,
        job_title: row.get(3)?,
        timezone: row.get(4)?,
        email_notifications: notifications != 0,
        updated_at: from_millis(row.get(6)?)?,
    })
}

/// Run a prepared query and map every row.
fn collect_rows<T>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
    map: fn(&Row<'_>) -> StoreResult<T>,
) -> StoreResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(map(row)?);
    }
    Ok(out)
}

fn select_one<T>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
    map: fn(&Row<'_>) -> StoreResult<T>,
) -> StoreResult<Option<T>> {
    Ok(collect_rows(conn, sql, params, map)?.into_iter().next())
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn write_contact(conn: &Connection, c: &Contact) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO contacts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            CONTACT_COLUMNS
        ),
        params![
            c.id.to_string(),
            c.user_id.as_str(),
            c.first_name,
            c.last_name,
            c.email,
            c.phone,
            c.mobile_phone,
            c.work_phone,
            c.company,
            c.job_title,
            c.address,
            c.birthday.map(|d| d.format("%Y-%m-%d").to_string()),
            c.notes,
            c.website,
            to_millis(c.created_at),
            to_millis(c.updated_at),
        ],
    )?;
    Ok(())
}

fn write_event(conn: &Connection, e: &CalendarEvent) -> StoreResult<()> {
    let attendees = serde_json::to_string(&e.attendees)
        .map_err(|err| StoreError::Backend(format!("Failed to encode attendees: {}", err)))?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO calendar_events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            EVENT_COLUMNS
        ),
        params![
            e.id.to_string(),
            e.user_id.as_str(),
            e.title,
            e.description,
            e.location,
            to_millis(e.start_time),
            to_millis(e.end_time),
            attendees,
            e.external_id,
            to_millis(e.created_at),
            to_millis(e.updated_at),
        ],
    )?;
    Ok(())
}

fn write_alert(conn: &Connection, a: &Alert) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO alerts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            ALERT_COLUMNS
        ),
        params![
            a.id.to_string(),
            a.user_id.as_str(),
            a.title,
            a.description,
            a.priority,
            a.status.to_string(),
            a.due_at.map(to_millis),
            to_millis(a.created_at),
            to_millis(a.updated_at),
        ],
    )?;
    Ok(())
}

fn delete_row(conn: &Connection, table: &str, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
    let changed = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1 AND user_id = ?2", table),
        params![id.to_string(), user.as_str()],
    )?;
    Ok(changed > 0)
}

fn fetch_contact(conn: &Connection, user: &UserId, id: CanonicalId) -> StoreResult<Option<Contact>> {
    select_one(
        conn,
        &format!("SELECT {} FROM contacts WHERE id = ?1 AND user_id = ?2", CONTACT_COLUMNS),
        &[&id.to_string(), &user.as_str()],
        row_to_contact,
    )
}

fn fetch_event(conn: &Connection, user: &UserId, id: CanonicalId) -> StoreResult<Option<CalendarEvent>> {
    select_one(
        conn,
        &format!("SELECT {} FROM calendar_events WHERE id = ?1 AND user_id = ?2", EVENT_COLUMNS),
        &[&id.to_string(), &user.as_str()],
        row_to_event,
    )
}

fn fetch_alert(conn: &Connection, user: &UserId, id: CanonicalId) -> StoreResult<Option<Alert>> {
    select_one(
        conn,
        &format!("SELECT {} FROM alerts WHERE id = ?1 AND user_id = ?2", ALERT_COLUMNS),
        &[&id.to_string(), &user.as_str()],
        row_to_alert,
    )
}

fn fetch_profile(conn: &Connection, user: &UserId) -> StoreResult<Option<SettingsProfile>> {
    select_one(
        conn,
        "SELECT user_id, display_name, company, job_title, timezone, email_notifications, updated_at
         FROM profiles WHERE user_id = ?1",
        &[&user.as_str()],
        row_to_profile,
    )
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

#[async_trait]
impl EntityStore for SqliteStore {
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
        self.db.with_conn(|conn| write_contact(conn, &contact))?;
        debug!(user = %user, id = %contact.id, "Contact inserted");
        Ok(contact)
    }

    async fn get_contact(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<Contact>> {
        self.db.with_conn(|conn| fetch_contact(conn, user, id))
    }

    async fn find_contacts(&self, user: &UserId, query: &ContactQuery) -> StoreResult<Vec<Contact>> {
        let order = "ORDER BY updated_at DESC, created_at DESC, id ASC";
        self.db.with_conn(|conn| match query {
            ContactQuery::FullName { first, last } => {
                let last = last.as_deref().map(str::trim).unwrap_or("");
                collect_rows(
                    conn,
                    &format!(
                        "SELECT {} FROM contacts
                         WHERE user_id = ?1
                           AND trim(first_name) = ?2 COLLATE NOCASE
                           AND trim(COALESCE(last_name, '')) = ?3 COLLATE NOCASE
                         {}",
                        CONTACT_COLUMNS, order
                    ),
                    &[&user.as_str(), &first.trim(), &last],
                    row_to_contact,
                )
            }
            ContactQuery::Term(term) => {
                if term.trim().is_empty() {
                    return Ok(Vec::new());
                }
                let pattern = like_pattern(term);
                collect_rows(
                    conn,
                    &format!(
                        "SELECT {} FROM contacts
                         WHERE user_id = ?1
                           AND (first_name LIKE ?2 ESCAPE '\\'
                             OR last_name LIKE ?2 ESCAPE '\\'
                             OR email LIKE ?2 ESCAPE '\\'
                             OR company LIKE ?2 ESCAPE '\\'
                             OR phone LIKE ?2 ESCAPE '\\'
                             OR mobile_phone LIKE ?2 ESCAPE '\\'
                             OR work_phone LIKE ?2 ESCAPE '\\')
                         {}",
                        CONTACT_COLUMNS, order
                    ),
                    &[&user.as_str(), &pattern],
                    row_to_contact,
                )
            }
            ContactQuery::Recent { limit } => collect_rows(
                conn,
                &format!(
                    "SELECT {} FROM contacts WHERE user_id = ?1 {} LIMIT ?2",
                    CONTACT_COLUMNS, order
                ),
                &[&user.as_str(), &(*limit as i64)],
                row_to_contact,
            ),
        })
    }

    async fn update_contact(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &ContactPatch,
    ) -> StoreResult<Contact> {
        self.db.with_conn(|conn| {
            let mut contact = fetch_contact(conn, user, id)?.ok_or(StoreError::NotFound {
                kind: EntityKind::Contact,
                id,
            })?;
            patch.apply(&mut contact);
            contact.updated_at = Utc::now();
            write_contact(conn, &contact)?;
            Ok(contact)
        })
    }

    async fn delete_contact(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        self.db.with_conn(|conn| delete_row(conn, "contacts", user, id))
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
        self.db.with_conn(|conn| write_event(conn, &event))?;
        debug!(user = %user, id = %event.id, "Event inserted");
        Ok(event)
    }

    async fn get_event(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<CalendarEvent>> {
        self.db.with_conn(|conn| fetch_event(conn, user, id))
    }

    async fn find_events(&self, user: &UserId, query: &EventQuery) -> StoreResult<Vec<CalendarEvent>> {
        let (range_start, range_end) = match &query.range {
            Some(r) => (to_millis(r.start), to_millis(r.end)),
            None => (i64::MIN, i64::MAX),
        };
        let term = query
            .term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(like_pattern);
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                &format!(
                    "SELECT {} FROM calendar_events
                     WHERE user_id = ?1
                       AND start_time < ?3 AND end_time > ?2
                       AND (?4 IS NULL
                            OR title LIKE ?4 ESCAPE '\\'
                            OR description LIKE ?4 ESCAPE '\\'
                            OR location LIKE ?4 ESCAPE '\\')
                     ORDER BY start_time ASC, id ASC
                     LIMIT ?5",
                    EVENT_COLUMNS
                ),
                &[&user.as_str(), &range_start, &range_end, &term, &limit],
                row_to_event,
            )
        })
    }

    async fn update_event(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &EventPatch,
    ) -> StoreResult<CalendarEvent> {
        self.db.with_conn(|conn| {
            let mut event = fetch_event(conn, user, id)?.ok_or(StoreError::NotFound {
                kind: EntityKind::CalendarEvent,
                id,
            })?;
            patch.apply(&mut event);
            event.updated_at = Utc::now();
            write_event(conn, &event)?;
            Ok(event)
        })
    }

    async fn delete_event(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        self.db
            .with_conn(|conn| delete_row(conn, "calendar_events", user, id))
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
        self.db.with_conn(|conn| write_alert(conn, &alert))?;
        Ok(alert)
    }

    async fn get_alert(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<Alert>> {
        self.db.with_conn(|conn| fetch_alert(conn, user, id))
    }

    async fn find_alerts(&self, user: &UserId, query: &AlertQuery) -> StoreResult<Vec<Alert>> {
        let status = query.status.map(|s| s.to_string());
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        self.db.with_conn(|conn| {
            collect_rows(
                conn,
                &format!(
                    "SELECT {} FROM alerts
                     WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY priority DESC, due_at IS NULL, due_at ASC, created_at ASC
                     LIMIT ?3",
                    ALERT_COLUMNS
                ),
                &[&user.as_str(), &status, &limit],
                row_to_alert,
            )
        })
    }

    async fn update_alert(
        &self,
        user: &UserId,
        id: CanonicalId,
        patch: &AlertPatch,
    ) -> StoreResult<Alert> {
        self.db.with_conn(|conn| {
            let mut alert = fetch_alert(conn, user, id)?.ok_or(StoreError::NotFound {
                kind: EntityKind::Alert,
                id,
            })?;
            patch.apply(&mut alert);
            alert.updated_at = Utc::now();
            write_alert(conn, &alert)?;
            Ok(alert)
        })
    }

    async fn delete_alert(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        self.db.with_conn(|conn| delete_row(conn, "alerts", user, id))
    }

    async fn get_profile(&self, user: &UserId) -> StoreResult<Option<SettingsProfile>> {
        self.db.with_conn(|conn| fetch_profile(conn, user))
    }

    async fn upsert_profile(&self, user: &UserId, patch: &ProfilePatch) -> StoreResult<SettingsProfile> {
        let now = Utc::now();
        self.db.with_conn(|conn| {
            let mut profile = fetch_profile(conn, user)?
                .unwrap_or_else(|| SettingsProfile::empty(user.clone(), now));
            patch.apply(&mut profile);
            profile.updated_at = now;
            conn.execute(
                "INSERT OR REPLACE INTO profiles
                    (user_id, display_name, company, job_title, timezone, email_notifications, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    profile.user_id.as_str(),
                    profile.display_name,
                    profile.company,
                    profile.job_title,
                    profile.timezone,
                    profile.email_notifications as i64,
                    to_millis(profile.updated_at),
                ],
            )?;
            Ok(profile)
        })
    }
}
