//! Request and reply shapes of a chat turn.

use serde::{Deserialize, Serialize};

use concierge_core::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the client-held transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting summed over every model call of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPath {
    /// Executed by the smart router without a model call.
    Fast,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub path: TurnPath,
    pub wrote: bool,
    /// Entity tables written during the turn, first write first.
    pub entities_written: Vec<EntityKind>,
    pub tool_calls: usize,
    pub failed_tool_calls: usize,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl TurnMetadata {
    pub fn new(path: TurnPath) -> Self {
        Self {
            path,
            wrote: false,
            entities_written: Vec::new(),
            tool_calls: 0,
            failed_tool_calls: 0,
            usage: Usage::default(),
            response_id: None,
        }
    }

    /// Account for one routed operation.
    pub fn record(&mut self, result: &concierge_action::OperationResult) {
        self.tool_calls += 1;
        if !result.success {
            self.failed_tool_calls += 1;
        }
        if let Some(kind) = result.entity_written() {
            self.wrote = true;
            if !self.entities_written.contains(&kind) {
                self.entities_written.push(kind);
            }
        }
    }
}

/// What a turn hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub metadata: TurnMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serde_shape() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(msg, ChatMessage::user("hi"));
        assert!(serde_json::from_str::<ChatMessage>(r#"{"role":"tool","content":"x"}"#).is_err());
    }

    #[test]
    fn test_usage_add() {
        let mut total = Usage::default();
        total.add(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.add(Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.prompt_tokens, 11);
    }

    #[test]
    fn test_metadata_path_serializes_lowercase() {
        let meta = TurnMetadata::new(TurnPath::Fast);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["path"], "fast");
        assert!(json.get("response_id").is_none());
    }
}
