//! Turn entry point: validation, conversation state, fast path, model.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use concierge_action::{OperationRouter, SmartRouter};
use concierge_core::{RequestContext, UserId};

use crate::error::{ChatError, LlmError};
use crate::llm::CompletionService;
use crate::orchestrator::Orchestrator;
use crate::state::ConversationTracker;
use crate::types::{ChatMessage, ChatReply, Role, TurnMetadata, TurnPath};

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub max_message_chars: usize,
    pub fast_path_enabled: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_chars: 8000,
            fast_path_enabled: true,
        }
    }
}

/// Processes chat turns for every user.
pub struct ChatService {
    router: Arc<OperationRouter>,
    smart: SmartRouter,
    tracker: ConversationTracker,
    orchestrator: Option<Orchestrator>,
    settings: ChatSettings,
}

impl ChatService {
    /// `llm` may be absent; turns that miss the fast path then fail with
    /// [`LlmError::NotConfigured`].
    pub fn new(
        router: Arc<OperationRouter>,
        smart: SmartRouter,
        tracker: ConversationTracker,
        llm: Option<Arc<dyn CompletionService>>,
        settings: ChatSettings,
    ) -> Self {
        let orchestrator = llm.map(|llm| Orchestrator::new(router.clone(), llm));
        Self {
            router,
            smart,
            tracker,
            orchestrator,
            settings,
        }
    }

    pub fn tracker(&self) -> &ConversationTracker {
        &self.tracker
    }

    /// Process one turn of the client transcript at the current instant.
    pub async fn process_turn(
        &self,
        messages: &[ChatMessage],
        user: UserId,
        timezone: Option<&str>,
    ) -> Result<ChatReply, ChatError> {
        self.process_turn_at(messages, RequestContext::new(user, timezone)).await
    }

    /// Process one turn with an explicit request context.
    pub async fn process_turn_at(&self, messages: &[ChatMessage], ctx: RequestContext) -> Result<ChatReply, ChatError> {
        let text = self.validate(messages)?;
        info!(user_id = %ctx.user_id, messages = messages.len(), "Turn started");

        // A reset or expired state comes back fresh, without a response id.
        let previous_response_id = match self.tracker.begin_turn(&ctx.user_id, messages.len(), ctx.now).await {
            Ok(state) => {
                debug!(
                    user_id = %ctx.user_id,
                    tracked = state.message_count,
                    resumed = state.last_response_id.is_some(),
                    "Conversation state loaded"
                );
                state.last_response_id
            }
            Err(e) => {
                warn!(user_id = %ctx.user_id, error = %e, "Conversation state unavailable");
                None
            }
        };

        if let Some(reply) = self.try_fast_path(text, &ctx).await {
            self.finish(&ctx, None).await;
            return Ok(reply);
        }

        let orchestrator = self.orchestrator.as_ref().ok_or_else(|| {
            ChatError::Llm(LlmError::NotConfigured(
                "this request needs the language model, which is not configured".to_string(),
            ))
        })?;
        let reply = orchestrator
            .run_turn(messages, &ctx, previous_response_id.as_deref())
            .await?;
        self.finish(&ctx, reply.metadata.response_id.clone()).await;
        info!(
            user_id = %ctx.user_id,
            path = "model",
            wrote = reply.metadata.wrote,
            tool_calls = reply.metadata.tool_calls,
            "Turn finished"
        );
        Ok(reply)
    }

    /// Drop the user's conversation state.
    pub async fn reset(&self, user: &UserId) -> Result<bool, ChatError> {
        self.tracker.reset(user).await
    }

    /// Evict idle conversation state.
    pub async fn sweep(&self) -> Result<usize, ChatError> {
        self.tracker.sweep(Utc::now()).await
    }

    fn validate<'a>(&self, messages: &'a [ChatMessage]) -> Result<&'a str, ChatError> {
        let latest = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim())
            .filter(|text| !text.is_empty())
            .ok_or(ChatError::EmptyConversation)?;
        if latest.chars().count() > self.settings.max_message_chars {
            return Err(ChatError::MessageTooLong(self.settings.max_message_chars));
        }
        Ok(latest)
    }

    /// Execute a fast action if the request has one. A failed fast action
    /// yields `None` so the model gets the request instead.
    async fn try_fast_path(&self, text: &str, ctx: &RequestContext) -> Option<ChatReply> {
        if !self.settings.fast_path_enabled {
            return None;
        }
        let action = self.smart.fast_action(text, ctx)?;
        let name = action.name();
        let result = self.router.execute(action.into_intent(text), ctx).await;
        if !result.success {
            info!(
                user_id = %ctx.user_id,
                action = name,
                kind = result.error.as_ref().map(|e| e.kind.as_str()).unwrap_or("unknown"),
                "Fast path failed, falling back to model"
            );
            return None;
        }
        info!(user_id = %ctx.user_id, path = "fast", action = name, "Turn finished");
        let mut metadata = TurnMetadata::new(TurnPath::Fast);
        metadata.record(&result);
        Some(ChatReply {
            reply: result.message,
            metadata,
        })
    }

    async fn finish(&self, ctx: &RequestContext, response_id: Option<String>) {
        if let Err(e) = self.tracker.touch(&ctx.user_id, response_id, ctx.now).await {
            warn!(user_id = %ctx.user_id, error = %e, "Conversation state not updated");
        }
    }
}
