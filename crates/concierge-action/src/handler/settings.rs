use chrono_tz::Tz;

use concierge_core::{ProfilePatch, RequestContext, SettingsProfile};

use super::{clean, to_data};
use crate::error::OperationError;
use crate::intent::SettingsOp;
use crate::router::{OperationRouter, Outcome};

impl OperationRouter {
    pub(crate) async fn settings(&self, op: SettingsOp, ctx: &RequestContext) -> Result<Outcome, OperationError> {
        match op {
            SettingsOp::Read => {
                let profile = self
                    .store
                    .get_profile(&ctx.user_id)
                    .await?
                    .unwrap_or_else(|| SettingsProfile::empty(ctx.user_id.clone(), ctx.now));
                Ok(Outcome::read("Here are your profile settings.", to_data(&profile)?))
            }
            SettingsOp::Update(patch) => {
                let patch = ProfilePatch {
                    display_name: clean(patch.display_name),
                    company: clean(patch.company),
                    job_title: clean(patch.job_title),
                    timezone: clean(patch.timezone),
                    email_notifications: patch.email_notifications,
                };
                if patch.is_empty() {
                    return Err(OperationError::Validation(
                        "No settings changes were given.".to_string(),
                    ));
                }
                if let Some(tz) = patch.timezone.as_deref() {
                    if tz.parse::<Tz>().is_err() {
                        return Err(OperationError::Validation(format!(
                            "'{}' is not a known timezone; use a name like America/New_York.",
                            tz
                        )));
                    }
                }
                let profile = self.store.upsert_profile(&ctx.user_id, &patch).await?;
                Ok(Outcome::write("Your settings were updated.", to_data(&profile)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use concierge_core::UserId;
    use concierge_storage::MemoryStore;

    use crate::intent::{Intent, Operation};
    use crate::router::RouterSettings;

    use super::*;

    fn setup() -> (OperationRouter, RequestContext) {
        let router = OperationRouter::new(Arc::new(MemoryStore::new()), RouterSettings::default());
        (router, RequestContext::new(UserId::from("u1"), None))
    }

    #[tokio::test]
    async fn test_read_without_profile_returns_defaults() {
        let (router, ctx) = setup();
        let result = router
            .execute(Intent::new(Operation::Settings(SettingsOp::Read), "my settings"), &ctx)
            .await;
        assert!(result.success);
        assert!(!result.wrote);
        assert_eq!(result.data.unwrap()["email_notifications"], true);
    }

    #[tokio::test]
    async fn test_update_then_read() {
        let (router, ctx) = setup();
        let patch = ProfilePatch {
            company: Some("Initech".to_string()),
            email_notifications: Some(false),
            ..ProfilePatch::default()
        };
        let result = router
            .execute(Intent::new(Operation::Settings(SettingsOp::Update(patch)), "update"), &ctx)
            .await;
        assert!(result.success);
        assert!(result.wrote);

        let read = router
            .execute(Intent::new(Operation::Settings(SettingsOp::Read), "read"), &ctx)
            .await;
        let data = read.data.unwrap();
        assert_eq!(data["company"], "Initech");
        assert_eq!(data["email_notifications"], false);
    }

    #[tokio::test]
    async fn test_update_bad_timezone_rejected() {
        let (router, ctx) = setup();
        let patch = ProfilePatch {
            timezone: Some("Mars/Olympus".to_string()),
            ..ProfilePatch::default()
        };
        let result = router
            .execute(Intent::new(Operation::Settings(SettingsOp::Update(patch)), "tz"), &ctx)
            .await;
        assert_eq!(result.error.unwrap().kind, "validation");
    }
}
