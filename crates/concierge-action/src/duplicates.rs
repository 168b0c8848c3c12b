//! Duplicate resolution engine.
//!
//! Ranks records that appear to describe the same person by how complete
//! they are. The engine is stateless: it never decides on its own that a
//! delete is allowed. Callers must only delete ids that came out of an
//! earlier [`analyze`] the user has seen, which is what [`DuplicateEcho`]
//! carries across turns.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use concierge_core::{CanonicalId, Contact, UserId};
use concierge_storage::EntityStore;

use crate::error::OperationError;

/// Fields that make a contact record worth keeping.
pub const CONTACT_IMPORTANT_FIELDS: &[&str] = &[
    "email",
    "phone",
    "mobile_phone",
    "work_phone",
    "company",
    "job_title",
    "address",
    "birthday",
    "notes",
    "website",
];

/// A record the engine can score.
pub trait FieldRecord {
    fn record_id(&self) -> CanonicalId;
    /// Text value of a named field; blank counts as absent.
    fn field_text(&self, name: &str) -> Option<String>;
    fn label(&self) -> String;
}

impl FieldRecord for Contact {
    fn record_id(&self) -> CanonicalId {
        self.id
    }

    fn field_text(&self, name: &str) -> Option<String> {
        self.field(name)
    }

    fn label(&self) -> String {
        self.full_name()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate<R> {
    pub record: R,
    pub filled_count: usize,
    pub filled_fields: Vec<String>,
}

/// Outcome of one analysis. `candidates` is ranked best-first; it is empty
/// when fewer than two records were supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateAnalysis<R> {
    pub candidates: Vec<ScoredCandidate<R>>,
    pub rationale: String,
}

impl<R: FieldRecord> DuplicateAnalysis<R> {
    pub fn keep(&self) -> Option<&ScoredCandidate<R>> {
        self.candidates.first()
    }

    pub fn consider_deleting(&self) -> &[ScoredCandidate<R>] {
        self.candidates.get(1..).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The machine-readable summary echoed into the reply.
    pub fn echo(&self) -> Option<DuplicateEcho> {
        let keep = self.keep()?;
        Some(DuplicateEcho {
            keep: keep.record.record_id(),
            consider_deleting: self
                .consider_deleting()
                .iter()
                .map(|c| c.record.record_id())
                .collect(),
        })
    }
}

/// Rank candidates by how many important fields they fill.
///
/// The input order is the tie-breaker (callers pass most recently updated
/// first) since the sort is stable.
pub fn analyze<R: FieldRecord>(candidates: Vec<R>, important_fields: &[&str]) -> DuplicateAnalysis<R> {
    match candidates.len() {
        0 => {
            return DuplicateAnalysis {
                candidates: Vec::new(),
                rationale: "No matching records were found, so there is nothing to compare."
                    .to_string(),
            }
        }
        1 => {
            return DuplicateAnalysis {
                candidates: Vec::new(),
                rationale: format!(
                    "Only one record matches ({}), so there are no duplicates to resolve.",
                    candidates[0].label()
                ),
            }
        }
        _ => {}
    }

    let mut scored: Vec<ScoredCandidate<R>> = candidates
        .into_iter()
        .map(|record| {
            let filled_fields: Vec<String> = important_fields
                .iter()
                .filter(|f| record.field_text(f).is_some())
                .map(|f| f.to_string())
                .collect();
            ScoredCandidate {
                filled_count: filled_fields.len(),
                filled_fields,
                record,
            }
        })
        .collect();
    scored.sort_by(|a, b| b.filled_count.cmp(&a.filled_count));

    let keep = &scored[0];
    let rationale = format!(
        "Keep {} ({}) because it has the most complete details ({} of {} key fields{}). \
         The other {} record(s) have the same or fewer details filled in.",
        keep.record.label(),
        keep.record.record_id(),
        keep.filled_count,
        important_fields.len(),
        if keep.filled_fields.is_empty() {
            String::new()
        } else {
            format!(": {}", keep.filled_fields.join(", "))
        },
        scored.len() - 1,
    );
    debug!(candidates = scored.len(), keep = %keep.record.record_id(), "Duplicate analysis ranked");

    DuplicateAnalysis {
        candidates: scored,
        rationale,
    }
}

// =============================================================================
// Echo line
// =============================================================================

const ECHO_PREFIX: &str = "Duplicate analysis: keep";

static ECHO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duplicate analysis: keep ([0-9a-fA-F-]{36}); consider deleting: ([0-9a-fA-F, -]*)")
        .expect("Invalid duplicate echo regex")
});

/// The part of an analysis that must survive into the next turn: it is
/// written into the reply and read back out of the client's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateEcho {
    pub keep: CanonicalId,
    pub consider_deleting: Vec<CanonicalId>,
}

impl fmt::Display for DuplicateEcho {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = self
            .consider_deleting
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} {}; consider deleting: {}", ECHO_PREFIX, self.keep, ids)
    }
}

impl DuplicateEcho {
    /// Every echo line in a block of text, in order.
    pub fn parse_all(text: &str) -> Vec<DuplicateEcho> {
        ECHO_RE
            .captures_iter(text)
            .filter_map(|caps| {
                let keep = CanonicalId::parse(caps.get(1)?.as_str()).ok()?;
                let consider_deleting = CanonicalId::find_all(caps.get(2)?.as_str());
                Some(DuplicateEcho {
                    keep,
                    consider_deleting,
                })
            })
            .collect()
    }
}

// =============================================================================
// Grouping and deletion
// =============================================================================

/// Normalized full name used to group same-person records.
pub fn name_key(contact: &Contact) -> String {
    contact
        .full_name()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Group contacts sharing a normalized full name, keeping only groups with
/// at least two members. Group order and member order follow the input.
pub fn group_by_name(contacts: Vec<Contact>) -> Vec<Vec<Contact>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, Vec<Contact>> = BTreeMap::new();
    for contact in contacts {
        let key = name_key(&contact);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(contact);
    }
    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .filter(|g| g.len() >= 2)
        .collect()
}

/// Delete one analyzed candidate.
///
/// The id must be canonical and must belong to `user`; ownership is
/// checked before the delete. A missing record is a `NotFound` error, not a
/// silent success.
pub async fn delete_candidate(
    store: &dyn EntityStore,
    user: &UserId,
    raw_id: &str,
) -> Result<Contact, OperationError> {
    let id = CanonicalId::parse_field(raw_id, "a duplicate candidate id")?;
    let contact = store
        .get_contact(user, id)
        .await?
        .ok_or_else(|| OperationError::NotFound(format!("No contact with id {} exists; it may already have been deleted.", id)))?;
    if !store.delete_contact(user, id).await? {
        return Err(OperationError::NotFound(format!(
            "No contact with id {} exists; it may already have been deleted.",
            id
        )));
    }
    info!(user_id = %user, id = %id, "Duplicate candidate deleted");
    Ok(contact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use concierge_core::ContactDraft;
    use concierge_storage::MemoryStore;

    fn contact(first: &str, last: &str, fields: &[(&str, &str)], age_minutes: i64) -> Contact {
        let at = Utc::now() - Duration::minutes(age_minutes);
        let mut c = Contact {
            id: CanonicalId::new_v4(),
            user_id: UserId::from("u1"),
            first_name: first.to_string(),
            last_name: Some(last.to_string()),
            email: None,
            phone: None,
            mobile_phone: None,
            work_phone: None,
            company: None,
            job_title: None,
            address: None,
            birthday: None,
            notes: None,
            website: None,
            created_at: at,
            updated_at: at,
        };
        for (k, v) in fields {
            let v = Some(v.to_string());
            match *k {
                "email" => c.email = v,
                "phone" => c.phone = v,
                "company" => c.company = v,
                "notes" => c.notes = v,
                _ => unreachable!(),
            }
        }
        c
    }

    #[test]
    fn test_zero_and_one_candidates_are_empty() {
        let empty: DuplicateAnalysis<Contact> = analyze(Vec::new(), CONTACT_IMPORTANT_FIELDS);
        assert!(empty.is_empty());
        assert!(empty.consider_deleting().is_empty());
        assert!(empty.echo().is_none());

        let one = analyze(vec![contact("Jane", "Doe", &[], 0)], CONTACT_IMPORTANT_FIELDS);
        assert!(one.is_empty());
        assert!(one.consider_deleting().is_empty());
        assert!(one.rationale.contains("Only one record"));
    }

    #[test]
    fn test_keep_has_most_fields() {
        let sparse = contact("Jane", "Doe", &[("email", "j@x.com")], 0);
        let rich = contact(
            "Jane",
            "Doe",
            &[("email", "j@x.com"), ("phone", "555"), ("company", "Acme")],
            10,
        );
        let blank = contact("Jane", "Doe", &[("notes", "  ")], 20);
        let rich_id = rich.id;

        let analysis = analyze(vec![sparse, rich, blank], CONTACT_IMPORTANT_FIELDS);
        let keep = analysis.keep().unwrap();
        assert_eq!(keep.record.id, rich_id);
        assert_eq!(keep.filled_count, 3);
        assert_eq!(keep.filled_fields, vec!["email", "phone", "company"]);
        assert_eq!(analysis.consider_deleting().len(), 2);
        for other in analysis.consider_deleting() {
            assert!(keep.filled_count >= other.filled_count);
        }
        assert_eq!(analysis.consider_deleting()[1].filled_count, 0);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let newer = contact("Jane", "Doe", &[("email", "a@x.com")], 0);
        let older = contact("Jane", "Doe", &[("phone", "555")], 60);
        let newer_id = newer.id;
        let analysis = analyze(vec![newer, older], CONTACT_IMPORTANT_FIELDS);
        assert_eq!(analysis.keep().unwrap().record.id, newer_id);
    }

    #[test]
    fn test_echo_round_trip_through_text() {
        let a = contact("Jane", "Doe", &[("email", "a@x.com")], 0);
        let b = contact("Jane", "Doe", &[], 5);
        let c = contact("Jane", "Doe", &[], 10);
        let analysis = analyze(vec![a, b, c], CONTACT_IMPORTANT_FIELDS);
        let echo = analysis.echo().unwrap();
        let reply = format!("I found three Jane Does.\n\n{}\n\nShall I delete them?", echo);

        let parsed = DuplicateEcho::parse_all(&reply);
        assert_eq!(parsed, vec![echo.clone()]);
        assert_eq!(parsed[0].consider_deleting.len(), 2);
    }

    #[test]
    fn test_parse_all_ignores_unrelated_text() {
        assert!(DuplicateEcho::parse_all("keep: nothing; consider deleting: nothing").is_empty());
    }

    #[test]
    fn test_group_by_name() {
        let groups = group_by_name(vec![
            contact("Jane", "Doe", &[], 0),
            contact("Bob", "Smith", &[], 1),
            contact("jane", "DOE", &[], 2),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[tokio::test]
    async fn test_delete_candidate_checks_format_and_ownership() {
        let store = MemoryStore::new();
        let owner = UserId::from("owner");
        let other = UserId::from("other");
        let c = store
            .insert_contact(
                &owner,
                ContactDraft {
                    first_name: "Jane".to_string(),
                    ..ContactDraft::default()
                },
            )
            .await
            .unwrap();

        let err = delete_candidate(&store, &owner, "jane@example.com").await.unwrap_err();
        assert!(matches!(err, OperationError::Validation(_)));

        let err = delete_candidate(&store, &other, &c.id.to_string()).await.unwrap_err();
        assert!(matches!(err, OperationError::NotFound(_)));
        assert!(store.get_contact(&owner, c.id).await.unwrap().is_some());

        let deleted = delete_candidate(&store, &owner, &c.id.to_string()).await.unwrap();
        assert_eq!(deleted.id, c.id);

        let err = delete_candidate(&store, &owner, &c.id.to_string()).await.unwrap_err();
        assert!(matches!(err, OperationError::NotFound(_)));
    }
}
