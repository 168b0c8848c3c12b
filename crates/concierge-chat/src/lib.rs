//! Conversational layer for Concierge.
//!
//! Tracks per-user conversation state, talks to the language model, runs
//! the tool loop of a turn and assembles replies. [`ChatService`] is the
//! single turn entry point.

pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod service;
pub mod state;
pub mod types;

pub use error::{ChatError, LlmError};
pub use llm::{Completion, CompletionService, ModelMessage, OpenAiClient, ToolCall};
pub use orchestrator::{DeletionGuard, Orchestrator};
pub use service::{ChatService, ChatSettings};
pub use state::{ConversationState, ConversationStore, ConversationTracker, MemoryConversationStore};
pub use types::{ChatMessage, ChatReply, Role, TurnMetadata, TurnPath, Usage};
