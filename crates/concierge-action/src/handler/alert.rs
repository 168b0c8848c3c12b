use serde_json::json;

use concierge_core::{Alert, AlertDraft, AlertPatch, AlertPriority, AlertStatus, CanonicalId, RequestContext};
use concierge_storage::AlertQuery;

use super::{clean, to_data};
use crate::error::OperationError;
use crate::intent::{AlertCriteria, AlertFields, AlertOp};
use crate::router::{OperationRouter, Outcome};

const ALERT_LIMIT: usize = 50;

impl OperationRouter {
    pub(crate) async fn alert(&self, op: AlertOp, ctx: &RequestContext) -> Result<Outcome, OperationError> {
        let user = &ctx.user_id;
        match op {
            AlertOp::Create(fields) => {
                let title = clean(fields.title.clone()).ok_or_else(|| {
                    OperationError::Validation("An alert needs a title.".to_string())
                })?;
                let draft = AlertDraft {
                    title,
                    description: clean(fields.description.clone()),
                    priority: parse_priority(fields.priority.as_deref())?
                        .unwrap_or_default()
                        .ordinal(),
                    status: parse_status(fields.status.as_deref())?.unwrap_or_default(),
                    due_at: fields.due_at,
                };
                let alert = self.store.insert_alert(user, draft).await?;
                Ok(Outcome::write(
                    format!("Created {} priority alert \"{}\".", priority_name(&alert), alert.title),
                    to_data(&alert)?,
                ))
            }
            AlertOp::Read(criteria) => {
                if let Some(raw) = criteria.id.as_deref().filter(|s| !s.trim().is_empty()) {
                    let id = CanonicalId::parse_field(raw, "an alert id")?;
                    let alert = self
                        .store
                        .get_alert(user, id)
                        .await?
                        .ok_or_else(|| OperationError::NotFound(format!("No alert with id {} exists.", id)))?;
                    return Ok(Outcome::read(format!("Alert \"{}\".", alert.title), to_data(&alert)?));
                }
                self.list_alerts(criteria, ctx).await
            }
            AlertOp::List(criteria) | AlertOp::Search(criteria) => self.list_alerts(criteria, ctx).await,
            AlertOp::Update { id, fields } => {
                let id = require_id(id.as_deref())?;
                let patch = to_patch(fields)?;
                if patch.is_empty() {
                    return Err(OperationError::Validation(
                        "No changes were given for the alert.".to_string(),
                    ));
                }
                let alert = self.store.update_alert(user, id, &patch).await?;
                Ok(Outcome::write(
                    format!("Updated alert \"{}\" ({}).", alert.title, alert.status),
                    to_data(&alert)?,
                ))
            }
            AlertOp::Delete { id } => {
                let id = require_id(id.as_deref())?;
                let alert = self
                    .store
                    .get_alert(user, id)
                    .await?
                    .ok_or_else(|| OperationError::NotFound(format!("No alert with id {} exists.", id)))?;
                if !self.store.delete_alert(user, id).await? {
                    return Err(OperationError::NotFound(format!("No alert with id {} exists.", id)));
                }
                Ok(Outcome::write(
                    format!("Deleted alert \"{}\".", alert.title),
                    json!({ "deleted_id": id }),
                ))
            }
        }
    }

    async fn list_alerts(&self, criteria: AlertCriteria, ctx: &RequestContext) -> Result<Outcome, OperationError> {
        let status = parse_status(criteria.status.as_deref())?.unwrap_or(AlertStatus::Pending);
        let term = clean(criteria.search_term).map(|t| t.to_lowercase());
        let query = AlertQuery {
            status: Some(status),
            limit: if term.is_some() { None } else { Some(criteria.limit.unwrap_or(ALERT_LIMIT)) },
        };
        let mut alerts = self.store.find_alerts(&ctx.user_id, &query).await?;
        if let Some(term) = &term {
            alerts.retain(|a| matches_term(a, term));
            alerts.truncate(criteria.limit.unwrap_or(ALERT_LIMIT));
        }
        let message = if alerts.is_empty() {
            format!("You have no {} alerts.", status)
        } else {
            format!("You have {} {} alert(s).", alerts.len(), status)
        };
        Ok(Outcome::read(message, json!({ "alerts": alerts, "count": alerts.len() })))
    }
}

fn matches_term(alert: &Alert, needle: &str) -> bool {
    alert.title.to_lowercase().contains(needle)
        || alert
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(needle))
}

fn require_id(raw: Option<&str>) -> Result<CanonicalId, OperationError> {
    let raw = raw.unwrap_or("");
    Ok(CanonicalId::parse_field(raw, "an alert id")?)
}

fn parse_priority(raw: Option<&str>) -> Result<Option<AlertPriority>, OperationError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(text) => text.parse().map(Some).map_err(OperationError::Validation),
    }
}

fn parse_status(raw: Option<&str>) -> Result<Option<AlertStatus>, OperationError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(text) => text.parse().map(Some).map_err(OperationError::Validation),
    }
}

fn to_patch(fields: AlertFields) -> Result<AlertPatch, OperationError> {
    let title = fields.title.map(|t| t.trim().to_string());
    if title.as_deref() == Some("") {
        return Err(OperationError::Validation(
            "An alert's title cannot be blank.".to_string(),
        ));
    }
    Ok(AlertPatch {
        title,
        description: clean(fields.description),
        priority: parse_priority(fields.priority.as_deref())?.map(AlertPriority::ordinal),
        status: parse_status(fields.status.as_deref())?,
        due_at: fields.due_at,
    })
}

fn priority_name(alert: &Alert) -> AlertPriority {
    AlertPriority::from_ordinal(alert.priority)
}
