use serde_json::{json, Value};
use tracing::info;

use concierge_core::{Contact, RequestContext, UserId};
use concierge_storage::ContactQuery;

use crate::duplicates::{self, DuplicateAnalysis, CONTACT_IMPORTANT_FIELDS};
use crate::error::OperationError;
use crate::intent::{ContactCriteria, DuplicateOp};
use crate::router::{OperationRouter, Outcome};

/// Most contacts read when looking for duplicate groups across the book.
pub const SCAN_LIMIT: usize = 5000;

impl OperationRouter {
    pub(crate) async fn duplicates(&self, op: DuplicateOp, ctx: &RequestContext) -> Result<Outcome, OperationError> {
        match op {
            DuplicateOp::Analyze(Some(criteria)) if !criteria.is_empty() => {
                self.analyze_named(&criteria, &ctx.user_id).await
            }
            DuplicateOp::Analyze(_) => self.analyze_all(&ctx.user_id).await,
            DuplicateOp::List => {
                let groups = self.duplicate_groups(&ctx.user_id).await?;
                let message = if groups.is_empty() {
                    "No duplicate contacts were found.".to_string()
                } else {
                    format!("Found {} group(s) of contacts sharing a name.", groups.len())
                };
                let data: Vec<Value> = groups
                    .iter()
                    .map(|group| {
                        json!({
                            "name": group[0].full_name(),
                            "ids": group.iter().map(|c| c.id).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                Ok(Outcome::read(message, json!({ "groups": data })))
            }
            DuplicateOp::Delete { ids } => self.delete_duplicates(ids, &ctx.user_id).await,
        }
    }

    async fn analyze_named(&self, criteria: &ContactCriteria, user: &UserId) -> Result<Outcome, OperationError> {
        let found = self.resolve_contacts(criteria, user).await?;
        let analysis = duplicates::analyze(found, CONTACT_IMPORTANT_FIELDS);
        let mut outcome = Outcome::read(analysis_message(&analysis), analysis_data(&analysis));
        outcome.duplicate_echo.extend(analysis.echo());
        Ok(outcome)
    }

    async fn analyze_all(&self, user: &UserId) -> Result<Outcome, OperationError> {
        let groups = self.duplicate_groups(user).await?;
        if groups.is_empty() {
            return Ok(Outcome::read(
                "No duplicate contacts were found.",
                json!({ "analyses": [] }),
            ));
        }
        let mut messages = Vec::with_capacity(groups.len());
        let mut data = Vec::with_capacity(groups.len());
        let mut echoes = Vec::new();
        for group in groups {
            let analysis = duplicates::analyze(group, CONTACT_IMPORTANT_FIELDS);
            messages.push(analysis_message(&analysis));
            data.push(analysis_data(&analysis));
            echoes.extend(analysis.echo());
        }
        Ok(Outcome {
            message: messages.join("\n"),
            data: Some(json!({ "analyses": data })),
            wrote: false,
            duplicate_echo: echoes,
        })
    }

    async fn duplicate_groups(&self, user: &UserId) -> Result<Vec<Vec<Contact>>, OperationError> {
        let all = self
            .store
            .find_contacts(user, &ContactQuery::Recent { limit: SCAN_LIMIT })
            .await?;
        Ok(duplicates::group_by_name(all))
    }

    async fn delete_duplicates(&self, ids: Vec<String>, user: &UserId) -> Result<Outcome, OperationError> {
        if ids.iter().all(|id| id.trim().is_empty()) {
            return Err(OperationError::Validation(
                "Name the duplicate record ids to delete.".to_string(),
            ));
        }
        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for raw in ids.iter().filter(|id| !id.trim().is_empty()) {
            match duplicates::delete_candidate(self.store.as_ref(), user, raw).await {
                Ok(contact) => deleted.push(contact),
                Err(e) => failed.push((raw.trim().to_string(), e)),
            }
        }
        if deleted.is_empty() && !failed.is_empty() {
            return Err(failed.swap_remove(0).1);
        }
        self.invalidate_contacts(user).await;
        info!(user_id = %user, deleted = deleted.len(), failed = failed.len(), "Duplicate delete finished");

        let mut message = format!(
            "Deleted {} duplicate record(s): {}.",
            deleted.len(),
            deleted
                .iter()
                .map(|c| format!("{} ({})", c.full_name(), c.id))
                .collect::<Vec<_>>()
                .join(", ")
        );
        for (id, err) in &failed {
            message.push_str(&format!(" Could not delete {}: {}", id, err.user_message()));
        }
        Ok(Outcome::write(
            message,
            json!({
                "deleted_ids": deleted.iter().map(|c| c.id).collect::<Vec<_>>(),
                "failed": failed
                    .iter()
                    .map(|(id, e)| json!({ "id": id, "kind": e.kind(), "message": e.user_message() }))
                    .collect::<Vec<_>>(),
            }),
        ))
    }
}

fn analysis_message(analysis: &DuplicateAnalysis<Contact>) -> String {
    match analysis.echo() {
        Some(echo) => format!("{}\n{}", analysis.rationale, echo),
        None => analysis.rationale.clone(),
    }
}

fn analysis_data(analysis: &DuplicateAnalysis<Contact>) -> Value {
    json!({
        "rationale": analysis.rationale,
        "keep": analysis.keep().map(|c| c.record.id),
        "consider_deleting": analysis
            .consider_deleting()
            .iter()
            .map(|c| c.record.id)
            .collect::<Vec<_>>(),
        "candidates": analysis
            .candidates
            .iter()
            .map(|c| json!({
                "id": c.record.id,
                "name": c.record.full_name(),
                "filled_count": c.filled_count,
                "filled_fields": c.filled_fields,
            }))
            .collect::<Vec<_>>(),
    })
}
