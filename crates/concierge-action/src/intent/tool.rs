//! The model-facing tool declaration and its translation into [`Intent`].
//!
//! The model sees a single `crm_operation` tool whose arguments are
//! `{operation_type, action, entity_data, search_criteria}`. Everything
//! past [`RawIntent::into_intent`] works on typed values only.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use concierge_core::{ContactDraft, ContactPatch, DateRange, EventDraft, EventPatch, ProfilePatch};

use crate::error::IntentError;
use crate::intent::{
    AlertCriteria, AlertFields, AlertOp, CalendarOp, ContactCriteria, ContactOp, DuplicateOp,
    EventCriteria, Intent, Operation, SettingsOp,
};
use crate::temporal::{parse_datetime, parse_range_end};
use crate::types::{ActionKind, OperationType};

pub const CRM_TOOL_NAME: &str = "crm_operation";

/// A callable operation declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// Tools offered to the model on every turn.
pub fn tool_definitions() -> Vec<ToolSpec> {
    vec![ToolSpec {
        name: CRM_TOOL_NAME.to_string(),
        description: "Read or change the user's CRM data: contacts, calendar events, alerts, \
                      profile settings, and duplicate contacts. Call once per operation; calls \
                      run in order, so later calls may use ids returned by earlier ones. \
                      Targeted updates and deletes need the record's 36-character id."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "operation_type": {
                    "type": "string",
                    "enum": ["contact", "calendar", "alert", "settings", "duplicate_management", "general"]
                },
                "action": {
                    "type": "string",
                    "enum": ["create", "read", "update", "delete", "list", "search", "analyze", "help"]
                },
                "entity_data": {
                    "type": ["object", "null"],
                    "description": "Fields to write. Contacts: first_name, last_name, email, phone, \
                                    mobile_phone, work_phone, company, job_title, address, birthday \
                                    (YYYY-MM-DD), notes, website. Events: title, description, location, \
                                    start_time, end_time (ISO 8601), attendees. Alerts: title, \
                                    description, priority (low|medium|high), status, due_date. \
                                    Settings: display_name, company, job_title, timezone, \
                                    email_notifications."
                },
                "search_criteria": {
                    "type": ["object", "null"],
                    "description": "How to find existing records: id, first_name, last_name, \
                                    search_term, start_date, end_date, status, limit. For \
                                    duplicate_management/delete pass ids from the latest analysis."
                }
            },
            "required": ["operation_type", "action"]
        }),
    }]
}

/// Tool arguments exactly as the model produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawIntent {
    pub operation_type: String,
    pub action: String,
    #[serde(default)]
    pub entity_data: Option<Map<String, Value>>,
    #[serde(default)]
    pub search_criteria: Option<Map<String, Value>>,
}

impl RawIntent {
    /// Parse the JSON argument string of a tool call.
    pub fn from_arguments(arguments: &str) -> Result<Self, IntentError> {
        serde_json::from_str(arguments)
            .map_err(|e| IntentError::InvalidArguments(format!("malformed tool arguments: {}", e)))
    }

    /// Translate into a typed intent. Naive timestamps are read in `tz`.
    pub fn into_intent(self, raw_text: &str, tz: Tz) -> Result<Intent, IntentError> {
        let operation_type: OperationType = self
            .operation_type
            .parse()
            .map_err(|_| IntentError::UnknownOperation(self.operation_type.clone()))?;
        let action: ActionKind = self
            .action
            .parse()
            .map_err(|_| IntentError::UnknownAction(self.action.clone()))?;
        let data = Fields::new(self.entity_data);
        let criteria = Fields::new(self.search_criteria);
        let unsupported = || IntentError::UnsupportedAction {
            operation: operation_type.to_string(),
            action: action.to_string(),
        };

        let operation = match operation_type {
            OperationType::Contact => Operation::Contact(match action {
                ActionKind::Create => ContactOp::Create(contact_draft(&data)?),
                ActionKind::Read => ContactOp::Read(contact_criteria(&criteria, &data)),
                ActionKind::Search => ContactOp::Search(contact_criteria(&criteria, &data)),
                ActionKind::Update => ContactOp::Update {
                    target: contact_criteria(&criteria, &Fields::default()),
                    patch: contact_patch(&data)?,
                },
                ActionKind::Delete => ContactOp::Delete(contact_criteria(&criteria, &data)),
                ActionKind::List => ContactOp::List {
                    limit: criteria.usize("limit"),
                },
                _ => return Err(unsupported()),
            }),
            OperationType::Calendar => Operation::Calendar(match action {
                ActionKind::Create => CalendarOp::Create(event_draft(&data, tz)?),
                ActionKind::Read => CalendarOp::Read(event_criteria(&criteria, tz)?),
                ActionKind::Search => CalendarOp::Search(event_criteria(&criteria, tz)?),
                ActionKind::Update => CalendarOp::Update {
                    target: event_criteria(&criteria, tz)?,
                    patch: event_patch(&data, tz)?,
                },
                ActionKind::Delete => CalendarOp::Delete(event_criteria(&criteria, tz)?),
                ActionKind::List => CalendarOp::List {
                    limit: criteria.usize("limit"),
                },
                _ => return Err(unsupported()),
            }),
            OperationType::Alert => Operation::Alert(match action {
                ActionKind::Create => AlertOp::Create(alert_fields(&data, tz)?),
                ActionKind::Read => AlertOp::Read(alert_criteria(&criteria)),
                ActionKind::Search => AlertOp::Search(alert_criteria(&criteria)),
                ActionKind::List => AlertOp::List(alert_criteria(&criteria)),
                ActionKind::Update => AlertOp::Update {
                    id: criteria.text(ID_KEYS).or_else(|| data.text(ID_KEYS)),
                    fields: alert_fields(&data, tz)?,
                },
                ActionKind::Delete => AlertOp::Delete {
                    id: criteria.text(ID_KEYS).or_else(|| data.text(ID_KEYS)),
                },
                _ => return Err(unsupported()),
            }),
            OperationType::Settings => Operation::Settings(match action {
                ActionKind::Read | ActionKind::List => SettingsOp::Read,
                ActionKind::Update => SettingsOp::Update(profile_patch(&data)),
                _ => return Err(unsupported()),
            }),
            OperationType::DuplicateManagement => Operation::Duplicates(match action {
                ActionKind::Analyze | ActionKind::Search | ActionKind::Read => {
                    let c = contact_criteria(&criteria, &data);
                    DuplicateOp::Analyze((!c.is_empty()).then_some(c))
                }
                ActionKind::List => DuplicateOp::List,
                ActionKind::Delete => {
                    let mut ids = criteria.strings("ids");
                    if ids.is_empty() {
                        ids = criteria.strings("consider_deleting");
                    }
                    if ids.is_empty() {
                        ids.extend(criteria.text(ID_KEYS));
                    }
                    DuplicateOp::Delete { ids }
                }
                _ => return Err(unsupported()),
            }),
            OperationType::General => Operation::General,
        };

        Ok(Intent::new(operation, raw_text))
    }
}

const ID_KEYS: &[&str] = &["id", "contact_id", "event_id", "alert_id"];

/// Sparse argument map with cleaning accessors. Null values, blank strings
/// and the literals "null"/"undefined" read as absent.
#[derive(Default)]
struct Fields(Map<String, Value>);

impl Fields {
    fn new(map: Option<Map<String, Value>>) -> Self {
        Self(map.unwrap_or_default())
    }

    fn text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| match self.0.get(*k)? {
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("undefined") {
                    None
                } else {
                    Some(s.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    fn one(&self, key: &str) -> Option<String> {
        self.text(&[key])
    }

    fn usize(&self, key: &str) -> Option<usize> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64().map(|v| v as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Some(true),
                "false" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn strings(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn datetime(&self, keys: &[&str], tz: Tz) -> Result<Option<DateTime<Utc>>, IntentError> {
        match self.text(keys) {
            None => Ok(None),
            Some(raw) => parse_datetime(&raw, tz)
                .map(Some)
                .ok_or_else(|| IntentError::InvalidArguments(format!("'{}' is not a date or time", raw))),
        }
    }

    fn date(&self, key: &str) -> Result<Option<NaiveDate>, IntentError> {
        match self.one(key) {
            None => Ok(None),
            Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| IntentError::InvalidArguments(format!("{} '{}' must be YYYY-MM-DD", key, raw))),
        }
    }
}

fn split_full_name(full: &str) -> (String, Option<String>) {
    let mut parts = full.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let rest = parts.collect::<Vec<_>>().join(" ");
    (first, (!rest.is_empty()).then_some(rest))
}

fn contact_draft(data: &Fields) -> Result<ContactDraft, IntentError> {
    let (mut first_name, mut last_name) = (data.one("first_name"), data.one("last_name"));
    if first_name.is_none() {
        if let Some(full) = data.text(&["name", "full_name"]) {
            let (f, l) = split_full_name(&full);
            first_name = Some(f);
            last_name = last_name.or(l);
        }
    }
    Ok(ContactDraft {
        first_name: first_name.unwrap_or_default(),
        last_name,
        email: data.one("email"),
        phone: data.one("phone"),
        mobile_phone: data.one("mobile_phone"),
        work_phone: data.one("work_phone"),
        company: data.one("company"),
        job_title: data.text(&["job_title", "title"]),
        address: data.one("address"),
        birthday: data.date("birthday")?,
        notes: data.one("notes"),
        website: data.one("website"),
    })
}

fn contact_patch(data: &Fields) -> Result<ContactPatch, IntentError> {
    Ok(ContactPatch {
        first_name: data.one("first_name"),
        last_name: data.one("last_name"),
        email: data.one("email"),
        phone: data.one("phone"),
        mobile_phone: data.one("mobile_phone"),
        work_phone: data.one("work_phone"),
        company: data.one("company"),
        job_title: data.text(&["job_title", "title"]),
        address: data.one("address"),
        birthday: data.date("birthday")?,
        notes: data.one("notes"),
        website: data.one("website"),
    })
}

/// Criteria come from `search_criteria`; identifying fields in
/// `entity_data` are accepted as a fallback since models misplace them.
fn contact_criteria(criteria: &Fields, data: &Fields) -> ContactCriteria {
    let pick = |keys: &[&str]| criteria.text(keys).or_else(|| data.text(keys));
    ContactCriteria {
        id: pick(ID_KEYS),
        first_name: pick(&["first_name"]),
        last_name: pick(&["last_name"]),
        search_term: pick(&["search_term", "name", "full_name", "query", "email"]),
    }
}

fn event_draft(data: &Fields, tz: Tz) -> Result<EventDraft, IntentError> {
    let start_time = data
        .datetime(&["start_time", "start", "start_date"], tz)?
        .ok_or_else(|| IntentError::InvalidArguments("calendar create needs a start_time".to_string()))?;
    Ok(EventDraft {
        title: data.one("title").unwrap_or_default(),
        description: data.one("description"),
        location: data.one("location"),
        start_time,
        end_time: data.datetime(&["end_time", "end", "end_date"], tz)?,
        attendees: data.strings("attendees"),
    })
}

fn event_patch(data: &Fields, tz: Tz) -> Result<EventPatch, IntentError> {
    let attendees = data.strings("attendees");
    Ok(EventPatch {
        title: data.one("title"),
        description: data.one("description"),
        location: data.one("location"),
        start_time: data.datetime(&["start_time", "start"], tz)?,
        end_time: data.datetime(&["end_time", "end"], tz)?,
        attendees: (!attendees.is_empty()).then_some(attendees),
    })
}

fn event_criteria(criteria: &Fields, tz: Tz) -> Result<EventCriteria, IntentError> {
    let start = criteria.datetime(&["start_date", "start_time", "from"], tz)?;
    let end = match criteria.text(&["end_date", "end_time", "to"]) {
        None => None,
        Some(raw) => Some(parse_range_end(&raw, tz).ok_or_else(|| {
            IntentError::InvalidArguments(format!("'{}' is not a date or time", raw))
        })?),
    };
    let range = match (start, end) {
        (Some(start), Some(end)) => Some(DateRange { start, end }),
        (Some(start), None) => Some(DateRange {
            start,
            end: start + chrono::Duration::days(1),
        }),
        (None, Some(end)) => Some(DateRange {
            start: end - chrono::Duration::days(1),
            end,
        }),
        (None, None) => None,
    };
    Ok(EventCriteria {
        id: criteria.text(ID_KEYS),
        search_term: criteria.text(&["search_term", "title", "query"]),
        range,
        limit: criteria.usize("limit"),
    })
}

fn alert_fields(data: &Fields, tz: Tz) -> Result<AlertFields, IntentError> {
    Ok(AlertFields {
        title: data.one("title"),
        description: data.one("description"),
        priority: data.one("priority"),
        status: data.one("status"),
        due_at: data.datetime(&["due_date", "due_at", "due"], tz)?,
    })
}

fn alert_criteria(criteria: &Fields) -> AlertCriteria {
    AlertCriteria {
        id: criteria.text(ID_KEYS),
        search_term: criteria.text(&["search_term", "title", "query"]),
        status: criteria.one("status"),
        limit: criteria.usize("limit"),
    }
}

fn profile_patch(data: &Fields) -> ProfilePatch {
    ProfilePatch {
        display_name: data.text(&["display_name", "name"]),
        company: data.one("company"),
        job_title: data.one("job_title"),
        timezone: data.one("timezone"),
        email_notifications: data.bool("email_notifications"),
    }
}
