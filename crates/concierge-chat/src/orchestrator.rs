//! Model-driven turns.
//!
//! One turn is two model calls around a tool loop: the first call may emit
//! any number of tool calls, each is routed in order, and the second call
//! turns the results into the reply. If the second call fails the reply is
//! assembled locally from the results.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use concierge_action::intent::tool::ToolSpec;
use concierge_action::intent::{DuplicateOp, Operation};
use concierge_action::router::CAPABILITIES;
use concierge_action::temporal::current_week;
use concierge_action::{
    tool_definitions, ActionKind, DuplicateEcho, OperationError, OperationResult, OperationRouter,
    OperationType, RawIntent, CRM_TOOL_NAME,
};
use concierge_core::{CanonicalId, RequestContext};

use crate::error::ChatError;
use crate::llm::{CompletionService, ModelMessage, ToolCall};
use crate::types::{ChatMessage, ChatReply, Role, TurnMetadata, TurnPath};

const NO_REPLY: &str = "I couldn't work out what to do with that. Could you rephrase it?";

pub struct Orchestrator {
    router: Arc<OperationRouter>,
    llm: Arc<dyn CompletionService>,
    tools: Vec<ToolSpec>,
}

impl Orchestrator {
    pub fn new(router: Arc<OperationRouter>, llm: Arc<dyn CompletionService>) -> Self {
        Self {
            router,
            llm,
            tools: tool_definitions(),
        }
    }

    /// Run one model-driven turn over the client transcript.
    ///
    /// `previous_response_id` is the last model response of this
    /// conversation, if the tracked state is still live. Only a failure of
    /// the first model call is an error; tool failures and a failed reply
    /// pass still produce a reply.
    pub async fn run_turn(
        &self,
        messages: &[ChatMessage],
        ctx: &RequestContext,
        previous_response_id: Option<&str>,
    ) -> Result<ChatReply, ChatError> {
        let raw_text = latest_user_text(messages).ok_or(ChatError::EmptyConversation)?;
        let system = system_prompt(ctx);
        let mut convo: Vec<ModelMessage> = messages.iter().map(to_model_message).collect();
        let mut metadata = TurnMetadata::new(TurnPath::Model);

        let first = self
            .llm
            .complete(&system, &convo, &self.tools, previous_response_id)
            .await?;
        metadata.usage.add(first.usage);
        metadata.response_id = first.response_id.clone();

        if first.tool_calls.is_empty() {
            debug!(user_id = %ctx.user_id, "Model answered without tools");
            return Ok(ChatReply {
                reply: first.text.unwrap_or_else(|| NO_REPLY.to_string()),
                metadata,
            });
        }

        let mut guard = DeletionGuard::from_history(messages);
        let mut results = Vec::with_capacity(first.tool_calls.len());
        for call in &first.tool_calls {
            let result = self.run_tool(call, raw_text, ctx, &guard).await;
            guard.absorb(&result.duplicate_echo);
            metadata.record(&result);
            results.push(result);
        }
        info!(
            user_id = %ctx.user_id,
            tool_calls = metadata.tool_calls,
            failed = metadata.failed_tool_calls,
            wrote = metadata.wrote,
            "Tool calls finished"
        );

        convo.push(ModelMessage::Assistant {
            content: first.text.clone(),
            tool_calls: first.tool_calls.clone(),
        });
        for (call, result) in first.tool_calls.iter().zip(&results) {
            convo.push(ModelMessage::Tool {
                call_id: call.id.clone(),
                content: serde_json::to_string(result).unwrap_or_else(|_| result.message.clone()),
            });
        }

        let resume = first.response_id.as_deref().or(previous_response_id);
        let mut reply = match self.llm.complete(&system, &convo, &[], resume).await {
            Ok(second) => {
                metadata.usage.add(second.usage);
                if second.response_id.is_some() {
                    metadata.response_id = second.response_id;
                }
                second.text.unwrap_or_else(|| assemble_reply(&results))
            }
            Err(e) => {
                warn!(user_id = %ctx.user_id, error = %e, "Reply pass failed, assembling locally");
                assemble_reply(&results)
            }
        };
        append_echoes(&mut reply, &results);

        Ok(ChatReply { reply, metadata })
    }

    async fn run_tool(
        &self,
        call: &ToolCall,
        raw_text: &str,
        ctx: &RequestContext,
        guard: &DeletionGuard,
    ) -> OperationResult {
        if call.name != CRM_TOOL_NAME {
            return refused(
                OperationType::General,
                ActionKind::Help,
                format!("There is no tool named {}.", call.name),
            );
        }
        let raw = match RawIntent::from_arguments(&call.arguments) {
            Ok(raw) => raw,
            Err(e) => return refused(OperationType::General, ActionKind::Help, e.to_string()),
        };
        let operation = raw.operation_type.parse().unwrap_or(OperationType::General);
        let action = raw.action.parse().unwrap_or(ActionKind::Help);
        let intent = match raw.into_intent(raw_text, ctx.timezone) {
            Ok(intent) => intent,
            Err(e) => return refused(operation, action, e.to_string()),
        };

        if let Operation::Duplicates(DuplicateOp::Delete { ids }) = &intent.operation {
            if let Err(err) = guard.check(ids) {
                info!(user_id = %ctx.user_id, "Duplicate delete blocked by guard");
                return OperationResult::failure(operation, action, &err);
            }
        }

        debug!(
            user_id = %ctx.user_id,
            operation = %operation,
            action = %action,
            "Routing tool call"
        );
        self.router.execute(intent, ctx).await
    }
}

fn refused(operation: OperationType, action: ActionKind, message: String) -> OperationResult {
    OperationResult::failure(operation, action, &OperationError::Validation(message))
}

/// Identifiers a duplicate delete may target: the `consider_deleting` ids
/// of analyses echoed earlier in the dialogue or run earlier in this turn.
#[derive(Debug, Default)]
pub struct DeletionGuard {
    allowed: HashSet<CanonicalId>,
}

impl DeletionGuard {
    pub fn from_history(messages: &[ChatMessage]) -> Self {
        let mut guard = Self::default();
        for msg in messages.iter().filter(|m| m.role == Role::Assistant) {
            guard.absorb(&DuplicateEcho::parse_all(&msg.content));
        }
        guard
    }

    pub fn absorb(&mut self, echoes: &[DuplicateEcho]) {
        for echo in echoes {
            self.allowed.extend(echo.consider_deleting.iter().copied());
        }
    }

    /// Every id must come from a prior analysis, or nothing is deleted.
    pub fn check(&self, ids: &[String]) -> Result<(), OperationError> {
        if self.allowed.is_empty() {
            return Err(OperationError::Validation(
                "Duplicates can only be deleted after a duplicate analysis. Ask me to find \
                 duplicates first."
                    .to_string(),
            ));
        }
        let rejected: Vec<&str> = ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .filter(|id| CanonicalId::parse(id).map_or(true, |parsed| !self.allowed.contains(&parsed)))
            .collect();
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(OperationError::Validation(format!(
                "These ids were not proposed by a duplicate analysis, so nothing was deleted: {}. \
                 Run the analysis again and delete from its list.",
                rejected.join(", ")
            )))
        }
    }
}

fn latest_user_text(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

fn to_model_message(msg: &ChatMessage) -> ModelMessage {
    match msg.role {
        Role::User => ModelMessage::User(msg.content.clone()),
        Role::Assistant => ModelMessage::Assistant {
            content: Some(msg.content.clone()),
            tool_calls: Vec::new(),
        },
    }
}

/// System prompt carrying the caller's clock and week.
pub fn system_prompt(ctx: &RequestContext) -> String {
    let now = ctx.local_now();
    let week = current_week(ctx);
    let week_start = week.start.with_timezone(&ctx.timezone);
    let week_end = week.end.with_timezone(&ctx.timezone);
    format!(
        "You are a CRM assistant. {capabilities}\n\n\
         Current date and time: {now} ({tz}).\n\
         This week runs from {start} to {end}.\n\
         Interpret relative dates against this clock and send times in the user's timezone.\n\n\
         Rules:\n\
         - Use the {tool} tool for every read or change; never invent records.\n\
         - Updates and deletes by id need the 36-character id shown in earlier results, never an \
         email, phone number or meeting link.\n\
         - When a search matches several records, list them and ask which one.\n\
         - Only delete duplicates after an analysis, and only the ids it listed under \
         \"consider deleting\".\n\
         - If an operation fails, tell the user what went wrong and what would fix it.",
        capabilities = CAPABILITIES,
        now = now.format("%A, %B %-d, %Y %H:%M"),
        tz = ctx.timezone,
        start = week_start.format("%A %B %-d"),
        end = week_end.format("%A %B %-d"),
        tool = CRM_TOOL_NAME,
    )
}

/// Reply built from tool results when the reply pass is unavailable.
pub fn assemble_reply(results: &[OperationResult]) -> String {
    results
        .iter()
        .map(|r| {
            if r.success {
                r.message.clone()
            } else {
                format!("Could not {} {}: {}", r.action, r.operation, r.message)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Make sure every analysis of this turn is visible in the reply, so a
/// later "delete the duplicates" can find its ids in the history.
fn append_echoes(reply: &mut String, results: &[OperationResult]) {
    for echo in results.iter().flat_map(|r| &r.duplicate_echo) {
        let line = echo.to_string();
        if !reply.contains(&line) {
            reply.push_str("\n\n");
            reply.push_str(&line);
        }
    }
}
