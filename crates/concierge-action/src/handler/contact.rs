use serde_json::json;
use tracing::{debug, warn};

use concierge_core::{CanonicalId, Contact, ContactDraft, ContactPatch, RequestContext, UserId};
use concierge_storage::{search_key, ContactQuery};

use super::{clean, to_data};
use crate::error::OperationError;
use crate::intent::{ContactCriteria, ContactOp};
use crate::router::{OperationRouter, Outcome};
use crate::types::CandidateSummary;

impl OperationRouter {
    pub(crate) async fn contact(&self, op: ContactOp, ctx: &RequestContext) -> Result<Outcome, OperationError> {
        match op {
            ContactOp::Create(draft) => self.create_contact(draft, &ctx.user_id).await,
            ContactOp::Read(criteria) => {
                let found = self.resolve_contacts(&criteria, &ctx.user_id).await?;
                match found.len() {
                    0 => Err(OperationError::NotFound(format!(
                        "No contact matches {}.",
                        describe(&criteria)
                    ))),
                    1 => {
                        let contact = &found[0];
                        Ok(Outcome::read(
                            format!("Found {}.", contact.full_name()),
                            to_data(contact)?,
                        ))
                    }
                    n => Ok(Outcome::read(
                        format!("Found {} contacts matching {}.", n, describe(&criteria)),
                        json!({ "contacts": found, "count": n }),
                    )),
                }
            }
            ContactOp::Search(criteria) => {
                let found = self.resolve_contacts(&criteria, &ctx.user_id).await?;
                let message = if found.is_empty() {
                    format!("No contacts match {}.", describe(&criteria))
                } else {
                    format!("Found {} contact(s) matching {}.", found.len(), describe(&criteria))
                };
                Ok(Outcome::read(message, json!({ "contacts": found, "count": found.len() })))
            }
            ContactOp::Update { target, patch } => self.update_contact(target, patch, &ctx.user_id).await,
            ContactOp::Delete(criteria) => {
                let contact = self.resolve_one_contact(&criteria, &ctx.user_id).await?;
                if !self.store.delete_contact(&ctx.user_id, contact.id).await? {
                    return Err(OperationError::NotFound(format!(
                        "Contact {} no longer exists.",
                        contact.id
                    )));
                }
                self.invalidate_contacts(&ctx.user_id).await;
                Ok(Outcome::write(
                    format!("Deleted contact {}.", contact.full_name()),
                    json!({ "deleted_id": contact.id }),
                ))
            }
            ContactOp::List { limit } => {
                let limit = limit.unwrap_or(self.settings.contact_list_limit);
                let found = self
                    .store
                    .find_contacts(&ctx.user_id, &ContactQuery::Recent { limit })
                    .await?;
                let message = if found.is_empty() {
                    "You have no contacts yet.".to_string()
                } else {
                    format!("Showing {} contact(s), most recently updated first.", found.len())
                };
                Ok(Outcome::read(message, json!({ "contacts": found, "count": found.len() })))
            }
        }
    }

    async fn create_contact(&self, draft: ContactDraft, user: &UserId) -> Result<Outcome, OperationError> {
        let draft = normalize_draft(draft);
        if draft.first_name.is_empty() {
            return Err(OperationError::Validation(
                "A first name is required to create a contact.".to_string(),
            ));
        }

        let same_name = self
            .store
            .find_contacts(
                user,
                &ContactQuery::FullName {
                    first: draft.first_name.clone(),
                    last: draft.last_name.clone(),
                },
            )
            .await?;
        if let Some(existing) = same_name.iter().find(|c| is_exact_duplicate(&draft, c)) {
            return Err(OperationError::Conflict {
                message: format!(
                    "{} already exists with the same contact details; nothing was created.",
                    existing.full_name()
                ),
                existing_id: existing.id,
            });
        }

        let contact = self.store.insert_contact(user, draft).await?;
        self.invalidate_contacts(user).await;
        Ok(Outcome::write(
            format!("Created contact {}.", contact.full_name()),
            to_data(&contact)?,
        ))
    }

    async fn update_contact(
        &self,
        target: ContactCriteria,
        patch: ContactPatch,
        user: &UserId,
    ) -> Result<Outcome, OperationError> {
        let patch = normalize_patch(patch);
        if patch.is_empty() {
            return Err(OperationError::Validation(
                "No changes were given for the contact.".to_string(),
            ));
        }
        if patch.first_name.as_deref() == Some("") {
            return Err(OperationError::Validation(
                "A contact's first name cannot be blank.".to_string(),
            ));
        }
        let contact = self.resolve_one_contact(&target, user).await?;
        let updated = self.store.update_contact(user, contact.id, &patch).await?;
        self.invalidate_contacts(user).await;
        Ok(Outcome::write(
            format!("Updated contact {}.", updated.full_name()),
            to_data(&updated)?,
        ))
    }

    /// Resolve criteria to exactly one contact.
    pub(crate) async fn resolve_one_contact(
        &self,
        criteria: &ContactCriteria,
        user: &UserId,
    ) -> Result<Contact, OperationError> {
        let mut found = self.resolve_contacts(criteria, user).await?;
        match found.len() {
            0 => Err(OperationError::NotFound(format!(
                "No contact matches {}.",
                describe(criteria)
            ))),
            1 => Ok(found.remove(0)),
            n => Err(OperationError::AmbiguousTarget {
                message: format!(
                    "{} contacts match {}. Which one did you mean?",
                    n,
                    describe(criteria)
                ),
                candidates: found.iter().map(candidate).collect(),
            }),
        }
    }

    /// Resolve criteria to every matching contact.
    ///
    /// Order: canonical id, explicit names, then a free-text term. A term of
    /// two or three words is first tried as "first last", then reversed,
    /// before falling back to substring search.
    pub(crate) async fn resolve_contacts(
        &self,
        criteria: &ContactCriteria,
        user: &UserId,
    ) -> Result<Vec<Contact>, OperationError> {
        if let Some(raw) = criteria.id.as_deref().filter(|s| !s.trim().is_empty()) {
            let id = CanonicalId::parse_field(raw, "a contact id")?;
            return Ok(self.store.get_contact(user, id).await?.into_iter().collect());
        }

        let first = clean(criteria.first_name.clone());
        let last = clean(criteria.last_name.clone());
        match (first, last) {
            (Some(first), last) => {
                return self.cached_find(user, ContactQuery::FullName { first, last }).await;
            }
            (None, Some(last)) => {
                return self.cached_find(user, ContactQuery::Term(last)).await;
            }
            (None, None) => {}
        }

        let Some(term) = clean(criteria.search_term.clone()) else {
            return Err(OperationError::Validation(
                "Tell me which contact you mean: a name, an email address or a record id."
                    .to_string(),
            ));
        };

        let words: Vec<&str> = term.split_whitespace().collect();
        if (2..=3).contains(&words.len()) && words.iter().all(|w| is_name_word(w)) {
            let forward = ContactQuery::FullName {
                first: words[0].to_string(),
                last: Some(words[1..].join(" ")),
            };
            let found = self.cached_find(user, forward).await?;
            if !found.is_empty() {
                return Ok(found);
            }
            let n = words.len();
            let reversed = ContactQuery::FullName {
                first: words[n - 1].to_string(),
                last: Some(words[..n - 1].join(" ")),
            };
            let found = self.cached_find(user, reversed).await?;
            if !found.is_empty() {
                debug!(user_id = %user, "Contact matched with reversed name order");
                return Ok(found);
            }
        }
        self.cached_find(user, ContactQuery::Term(term)).await
    }

    async fn cached_find(&self, user: &UserId, query: ContactQuery) -> Result<Vec<Contact>, OperationError> {
        let key = cache_key(&query);
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            match cache.get(user, key).await {
                Ok(Some(hit)) => {
                    debug!(user_id = %user, key = %key, "Contact search cache hit");
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => warn!(user_id = %user, error = %e, "Search cache read failed"),
            }
        }

        // Taken before the read so a clear during the read voids the put.
        let ticket = match (&self.cache, &key) {
            (Some(cache), Some(_)) => match cache.generation(user).await {
                Ok(ticket) => Some(ticket),
                Err(e) => {
                    warn!(user_id = %user, error = %e, "Search cache unavailable");
                    None
                }
            },
            _ => None,
        };

        let found = self.store.find_contacts(user, &query).await?;

        if let (Some(cache), Some(key), Some(ticket)) = (&self.cache, &key, ticket) {
            match cache.put(user, key, found.clone(), ticket).await {
                Ok(true) => {}
                Ok(false) => debug!(user_id = %user, key = %key, "Contacts changed during search, result not cached"),
                Err(e) => warn!(user_id = %user, error = %e, "Search cache write failed"),
            }
        }
        Ok(found)
    }
}

fn cache_key(query: &ContactQuery) -> Option<String> {
    match query {
        ContactQuery::FullName { first, last } => Some(format!(
            "name:{}|{}",
            search_key(first),
            search_key(last.as_deref().unwrap_or(""))
        )),
        ContactQuery::Term(term) => Some(format!("term:{}", search_key(term))),
        ContactQuery::Recent { .. } => None,
    }
}

fn is_name_word(word: &str) -> bool {
    word.chars().all(|c| c.is_alphabetic() || c == '-' || c == '\'')
}

/// Two records are exact duplicates when they share a name and the same
/// email, or the same phone when no email is given. With neither given,
/// a same-name record that also has neither counts.
fn is_exact_duplicate(draft: &ContactDraft, existing: &Contact) -> bool {
    if let Some(email) = draft.email.as_deref() {
        return existing
            .email
            .as_deref()
            .is_some_and(|e| e.trim().eq_ignore_ascii_case(email));
    }
    let wanted = draft_phones(draft);
    if !wanted.is_empty() {
        return contact_phones(existing).iter().any(|p| wanted.contains(p));
    }
    existing.field("email").is_none() && contact_phones(existing).is_empty()
}

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn draft_phones(draft: &ContactDraft) -> Vec<String> {
    [&draft.phone, &draft.mobile_phone, &draft.work_phone]
        .into_iter()
        .flatten()
        .map(|p| digits(p))
        .filter(|d| !d.is_empty())
        .collect()
}

fn contact_phones(contact: &Contact) -> Vec<String> {
    [&contact.phone, &contact.mobile_phone, &contact.work_phone]
        .into_iter()
        .flatten()
        .map(|p| digits(p))
        .filter(|d| !d.is_empty())
        .collect()
}

fn normalize_draft(draft: ContactDraft) -> ContactDraft {
    ContactDraft {
        first_name: draft.first_name.trim().to_string(),
        last_name: clean(draft.last_name),
        email: clean(draft.email),
        phone: clean(draft.phone),
        mobile_phone: clean(draft.mobile_phone),
        work_phone: clean(draft.work_phone),
        company: clean(draft.company),
        job_title: clean(draft.job_title),
        address: clean(draft.address),
        birthday: draft.birthday,
        notes: clean(draft.notes),
        website: clean(draft.website),
    }
}

/// Trim patch values. A blank first name is kept as `Some("")` so the
/// caller can reject it; other blanks are dropped.
fn normalize_patch(patch: ContactPatch) -> ContactPatch {
    ContactPatch {
        first_name: patch.first_name.map(|v| v.trim().to_string()),
        last_name: clean(patch.last_name),
        email: clean(patch.email),
        phone: clean(patch.phone),
        mobile_phone: clean(patch.mobile_phone),
        work_phone: clean(patch.work_phone),
        company: clean(patch.company),
        job_title: clean(patch.job_title),
        address: clean(patch.address),
        birthday: patch.birthday,
        notes: clean(patch.notes),
        website: clean(patch.website),
    }
}

fn describe(criteria: &ContactCriteria) -> String {
    if let Some(id) = criteria.id.as_deref().filter(|s| !s.trim().is_empty()) {
        return format!("id {}", id.trim());
    }
    let name = [criteria.first_name.as_deref(), criteria.last_name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !name.is_empty() {
        return format!("\"{}\"", name);
    }
    match criteria.search_term.as_deref().map(str::trim) {
        Some(term) if !term.is_empty() => format!("\"{}\"", term),
        _ => "that description".to_string(),
    }
}

fn candidate(contact: &Contact) -> CandidateSummary {
    let detail = contact
        .field("email")
        .or_else(|| contact.field("company"))
        .or_else(|| contact.field("phone"));
    let label = match detail {
        Some(d) => format!("{}, {}", contact.full_name(), d),
        None => contact.full_name(),
    };
    CandidateSummary {
        id: contact.id,
        label,
    }
}
