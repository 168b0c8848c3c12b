//! Conversation state: per-user dialogue bookkeeping.
//!
//! The state is advisory. Clients send the whole transcript on every
//! request, so losing an entry (restart, eviction, a lost update from a
//! double submit) only means the next turn starts a fresh record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use concierge_core::UserId;

use crate::error::ChatError;

/// Inbound conversations shorter than this may signal a new session.
const RESET_MAX_INBOUND: usize = 3;
/// Tracked history longer than this makes a short inbound look like a reset.
const RESET_MIN_TRACKED: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub user_id: UserId,
    pub message_count: u32,
    /// Id of the last model response in this conversation.
    pub last_response_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn fresh(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            message_count: 0,
            last_response_id: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> bool {
        now - self.updated_at > max_idle
    }
}

/// Key-value storage for conversation state.
///
/// The in-process map serves single-instance deployments and tests; a
/// shared store can implement this for multi-instance setups.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, user: &UserId) -> Result<Option<ConversationState>, ChatError>;
    async fn put(&self, state: ConversationState) -> Result<(), ChatError>;
    /// Returns whether an entry existed.
    async fn delete(&self, user: &UserId) -> Result<bool, ChatError>;
    /// Remove entries last updated before `cutoff`. Returns how many went.
    async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, ChatError>;
}

#[derive(Default)]
pub struct MemoryConversationStore {
    states: Mutex<HashMap<UserId, ConversationState>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<UserId, ConversationState>>, ChatError> {
        self.states
            .lock()
            .map_err(|e| ChatError::StateStore(format!("state lock poisoned: {}", e)))
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get(&self, user: &UserId) -> Result<Option<ConversationState>, ChatError> {
        Ok(self.lock()?.get(user).cloned())
    }

    async fn put(&self, state: ConversationState) -> Result<(), ChatError> {
        self.lock()?.insert(state.user_id.clone(), state);
        Ok(())
    }

    async fn delete(&self, user: &UserId) -> Result<bool, ChatError> {
        Ok(self.lock()?.remove(user).is_some())
    }

    async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, ChatError> {
        let mut states = self.lock()?;
        let before = states.len();
        states.retain(|_, s| s.updated_at >= cutoff);
        Ok(before - states.len())
    }
}

/// Lifecycle rules on top of a [`ConversationStore`].
#[derive(Clone)]
pub struct ConversationTracker {
    store: Arc<dyn ConversationStore>,
    idle_timeout: Duration,
}

impl ConversationTracker {
    pub fn new(store: Arc<dyn ConversationStore>, idle_timeout_minutes: u32) -> Self {
        Self {
            store,
            idle_timeout: Duration::minutes(i64::from(idle_timeout_minutes)),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// The user's state, creating it if absent. An entry idle past the
    /// timeout is replaced.
    pub async fn get_or_create(&self, user: &UserId, now: DateTime<Utc>) -> Result<ConversationState, ChatError> {
        if let Some(state) = self.store.get(user).await? {
            if !state.is_idle(now, self.idle_timeout) {
                return Ok(state);
            }
            debug!(user_id = %user, "Conversation state expired");
        }
        let state = ConversationState::fresh(user.clone(), now);
        self.store.put(state.clone()).await?;
        Ok(state)
    }

    /// Load state for a turn carrying `inbound_messages` messages.
    ///
    /// A short inbound conversation against a longer tracked one means the
    /// client started over, so the tracked state is dropped first.
    pub async fn begin_turn(
        &self,
        user: &UserId,
        inbound_messages: usize,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, ChatError> {
        let state = self.get_or_create(user, now).await?;
        if inbound_messages < RESET_MAX_INBOUND && state.message_count > RESET_MIN_TRACKED {
            info!(
                user_id = %user,
                inbound = inbound_messages,
                tracked = state.message_count,
                "Client started a new conversation, resetting state"
            );
            self.reset(user).await?;
            return self.get_or_create(user, now).await;
        }
        Ok(state)
    }

    /// Count one more message and record the latest response id.
    pub async fn touch(
        &self,
        user: &UserId,
        response_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ConversationState, ChatError> {
        let mut state = self.get_or_create(user, now).await?;
        state.message_count += 1;
        if response_id.is_some() {
            state.last_response_id = response_id;
        }
        state.updated_at = now;
        self.store.put(state.clone()).await?;
        Ok(state)
    }

    pub async fn reset(&self, user: &UserId) -> Result<bool, ChatError> {
        self.store.delete(user).await
    }

    /// Drop every state idle longer than the timeout.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ChatError> {
        let removed = self.store.sweep(now - self.idle_timeout).await?;
        if removed > 0 {
            debug!(removed, "Swept idle conversations");
        }
        Ok(removed)
    }
}
