//! Error types for the conversational layer.

use concierge_core::error::ConciergeError;

/// Failures talking to the language-model service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("model service unreachable: {0}")]
    Transport(String),
    #[error("model service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed model response: {0}")]
    Decode(String),
    #[error("model service not configured: {0}")]
    NotConfigured(String),
}

/// Errors from the chat engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("conversation has no user message")]
    EmptyConversation,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("conversation state error: {0}")]
    StateStore(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl ChatError {
    /// Whether the caller sent something unusable, as opposed to a server
    /// side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::EmptyConversation | ChatError::MessageTooLong(_))
    }
}

impl From<ChatError> for ConciergeError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyConversation | ChatError::MessageTooLong(_) => {
                ConciergeError::Validation(err.to_string())
            }
            ChatError::StateStore(msg) => ConciergeError::Storage(msg),
            ChatError::Llm(e) => ConciergeError::Llm(e.to_string()),
        }
    }
}
