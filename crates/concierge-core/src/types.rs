use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::CanonicalId;

// =============================================================================
// Identity
// =============================================================================

/// Identifier of an already-authenticated user. Every storage call is
/// scoped by one of these.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// The entity tables owned by the data store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    CalendarEvent,
    Alert,
    Settings,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Contact => write!(f, "contact"),
            EntityKind::CalendarEvent => write!(f, "calendar_event"),
            EntityKind::Alert => write!(f, "alert"),
            EntityKind::Settings => write!(f, "settings"),
        }
    }
}

/// Alert priority. Stored as its ordinal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl AlertPriority {
    /// Fixed ordinal written to storage.
    pub fn ordinal(self) -> i32 {
        match self {
            AlertPriority::Low => 1,
            AlertPriority::Medium => 2,
            AlertPriority::High => 3,
        }
    }

    pub fn from_ordinal(value: i32) -> Self {
        match value {
            i32::MIN..=1 => AlertPriority::Low,
            2 => AlertPriority::Medium,
            _ => AlertPriority::High,
        }
    }
}

impl std::str::FromStr for AlertPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(AlertPriority::Low),
            "medium" | "normal" => Ok(AlertPriority::Medium),
            "high" | "urgent" => Ok(AlertPriority::High),
            other => Err(format!("Unknown alert priority: {}", other)),
        }
    }
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertPriority::Low => write!(f, "low"),
            AlertPriority::Medium => write!(f, "medium"),
            AlertPriority::High => write!(f, "high"),
        }
    }
}

/// Alert lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    Pending,
    Completed,
    Dismissed,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Pending => write!(f, "pending"),
            AlertStatus::Completed => write!(f, "completed"),
            AlertStatus::Dismissed => write!(f, "dismissed"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(AlertStatus::Pending),
            "completed" | "done" => Ok(AlertStatus::Completed),
            "dismissed" => Ok(AlertStatus::Dismissed),
            other => Err(format!("Unknown alert status: {}", other)),
        }
    }
}

// =============================================================================
// Contacts
// =============================================================================

/// A contact record as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: CanonicalId,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub work_phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub address: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub notes: Option<String>,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    /// Read a field by its column name, as text. Blank values read as `None`.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "id" => Some(self.id.to_string()),
            "first_name" => Some(self.first_name.clone()),
            "last_name" => self.last_name.clone(),
            "email" => self.email.clone(),
            "phone" => self.phone.clone(),
            "mobile_phone" => self.mobile_phone.clone(),
            "work_phone" => self.work_phone.clone(),
            "company" => self.company.clone(),
            "job_title" => self.job_title.clone(),
            "address" => self.address.clone(),
            "birthday" => self.birthday.map(|d| d.to_string()),
            "notes" => self.notes.clone(),
            "website" => self.website.clone(),
            _ => None,
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// Fields accepted when creating a contact.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactDraft {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub work_phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub address: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub notes: Option<String>,
    pub website: Option<String>,
}

/// Sparse changes to an existing contact. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub work_phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub address: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub notes: Option<String>,
    pub website: Option<String>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        self == &ContactPatch::default()
    }

    pub fn apply(&self, contact: &mut Contact) {
        if let Some(v) = &self.first_name {
            contact.first_name = v.clone();
        }
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = &self.$field {
                    contact.$field = Some(v.clone());
                })*
            };
        }
        set!(
            last_name, email, phone, mobile_phone, work_phone, company, job_title, address,
            notes, website
        );
        if let Some(b) = self.birthday {
            contact.birthday = Some(b);
        }
    }
}

// =============================================================================
// Calendar
// =============================================================================

/// A calendar event as stored. Times are UTC.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: CanonicalId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub attendees: Vec<String>,
    /// Identifier assigned by a third-party provider (meeting id). Never a
    /// valid target for update/delete.
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attendees: Vec<String>,
}

/// Sparse changes to an event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub attendees: Option<Vec<String>>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self == &EventPatch::default()
    }

    pub fn apply(&self, event: &mut CalendarEvent) {
        if let Some(v) = &self.title {
            event.title = v.clone();
        }
        if let Some(v) = &self.description {
            event.description = Some(v.clone());
        }
        if let Some(v) = &self.location {
            event.location = Some(v.clone());
        }
        if let Some(v) = self.start_time {
            event.start_time = v;
        }
        if let Some(v) = self.end_time {
            event.end_time = v;
        }
        if let Some(v) = &self.attendees {
            event.attendees = v.clone();
        }
    }
}

/// Half-open UTC interval `[start, end)` used for event queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

// =============================================================================
// Alerts
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: CanonicalId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    /// Ordinal of [`AlertPriority`].
    pub priority: i32,
    pub status: AlertStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub title: String,
    pub description: Option<String>,
    pub priority: i32,
    pub status: AlertStatus,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i32>,
    pub status: Option<AlertStatus>,
    pub due_at: Option<DateTime<Utc>>,
}

impl AlertPatch {
    pub fn is_empty(&self) -> bool {
        self == &AlertPatch::default()
    }

    pub fn apply(&self, alert: &mut Alert) {
        if let Some(v) = &self.title {
            alert.title = v.clone();
        }
        if let Some(v) = &self.description {
            alert.description = Some(v.clone());
        }
        if let Some(v) = self.priority {
            alert.priority = v;
        }
        if let Some(v) = self.status {
            alert.status = v;
        }
        if let Some(v) = self.due_at {
            alert.due_at = Some(v);
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Per-user profile and preferences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettingsProfile {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub timezone: Option<String>,
    pub email_notifications: bool,
    pub updated_at: DateTime<Utc>,
}

impl SettingsProfile {
    pub fn empty(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            display_name: None,
            company: None,
            job_title: None,
            timezone: None,
            email_notifications: true,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub timezone: Option<String>,
    pub email_notifications: Option<bool>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self == &ProfilePatch::default()
    }

    pub fn apply(&self, profile: &mut SettingsProfile) {
        if let Some(v) = &self.display_name {
            profile.display_name = Some(v.clone());
        }
        if let Some(v) = &self.company {
            profile.company = Some(v.clone());
        }
        if let Some(v) = &self.job_title {
            profile.job_title = Some(v.clone());
        }
        if let Some(v) = &self.timezone {
            profile.timezone = Some(v.clone());
        }
        if let Some(v) = self.email_notifications {
            profile.email_notifications = v;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        let now = Utc::now();
        Contact {
            id: CanonicalId::new_v4(),
            user_id: UserId::from("u1"),
            first_name: "Jane".to_string(),
            last_name: Some("Doe".to_string()),
            email: Some("jane@example.com".to_string()),
            phone: Some("   ".to_string()),
            mobile_phone: None,
            work_phone: None,
            company: None,
            job_title: None,
            address: None,
            birthday: NaiveDate::from_ymd_opt(1990, 4, 1),
            notes: None,
            website: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_alert_priority_ordinals() {
        assert_eq!(AlertPriority::Low.ordinal(), 1);
        assert_eq!(AlertPriority::Medium.ordinal(), 2);
        assert_eq!(AlertPriority::High.ordinal(), 3);
        assert_eq!(AlertPriority::from_ordinal(3), AlertPriority::High);
        assert_eq!(AlertPriority::from_ordinal(0), AlertPriority::Low);
    }

    #[test]
    fn test_alert_priority_from_str() {
        assert_eq!("HIGH".parse::<AlertPriority>().unwrap(), AlertPriority::High);
        assert_eq!("low".parse::<AlertPriority>().unwrap(), AlertPriority::Low);
        assert!("critical".parse::<AlertPriority>().is_err());
    }

    #[test]
    fn test_alert_status_from_str() {
        assert_eq!("done".parse::<AlertStatus>().unwrap(), AlertStatus::Completed);
        assert_eq!(AlertStatus::default(), AlertStatus::Pending);
        assert!("archived".parse::<AlertStatus>().is_err());
    }

    #[test]
    fn test_contact_full_name() {
        let mut c = contact();
        assert_eq!(c.full_name(), "Jane Doe");
        c.last_name = None;
        assert_eq!(c.full_name(), "Jane");
    }

    #[test]
    fn test_contact_field_blank_reads_none() {
        let c = contact();
        assert_eq!(c.field("email").as_deref(), Some("jane@example.com"));
        assert_eq!(c.field("phone"), None);
        assert_eq!(c.field("birthday").as_deref(), Some("1990-04-01"));
        assert_eq!(c.field("unknown_column"), None);
    }

    #[test]
    fn test_contact_patch_apply() {
        let mut c = contact();
        let patch = ContactPatch {
            company: Some("Acme".to_string()),
            email: Some("jane@acme.test".to_string()),
            ..ContactPatch::default()
        };
        assert!(!patch.is_empty());
        patch.apply(&mut c);
        assert_eq!(c.company.as_deref(), Some("Acme"));
        assert_eq!(c.email.as_deref(), Some("jane@acme.test"));
        assert_eq!(c.first_name, "Jane");
    }

    #[test]
    fn test_date_range_half_open() {
        let start = Utc::now();
        let end = start + chrono::Duration::hours(1);
        let range = DateRange { start, end };
        assert!(range.contains(start));
        assert!(!range.contains(end));
        assert!(range.overlaps(start - chrono::Duration::minutes(30), start + chrono::Duration::minutes(1)));
        assert!(!range.overlaps(end, end + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Contact.to_string(), "contact");
        assert_eq!(EntityKind::CalendarEvent.to_string(), "calendar_event");
    }
}
