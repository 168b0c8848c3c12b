//! Contact search-result cache.
//!
//! Results are keyed by user and a normalized query string. Any write to a
//! user's contacts clears that user's entries. Cache failures are reported
//! to the caller, which is expected to log them and carry on uncached.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use concierge_core::{Contact, UserId};

use crate::error::CacheError;

#[async_trait]
pub trait SearchCache: Send + Sync {
    async fn get(&self, user: &UserId, key: &str) -> Result<Option<Vec<Contact>>, CacheError>;

    /// Ticket to take before reading the store for a later [`put`](Self::put).
    async fn generation(&self, user: &UserId) -> Result<u64, CacheError>;

    /// Store results read under `generation`. Returns `false` when the user
    /// was cleared since then and the results were dropped.
    async fn put(
        &self,
        user: &UserId,
        key: &str,
        results: Vec<Contact>,
        generation: u64,
    ) -> Result<bool, CacheError>;

    async fn clear_user_cache(&self, user: &UserId) -> Result<(), CacheError>;
}

/// Build the cache key for a search term.
pub fn search_key(term: &str) -> String {
    term.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

struct Entry {
    results: Vec<Contact>,
    stored_at: Instant,
}

struct UserEntries {
    entries: HashMap<String, Entry>,
    /// Clock value of the user's last clear.
    cleared: u64,
}

struct Inner {
    users: HashMap<UserId, UserEntries>,
    clock: u64,
    /// Highest clear mark of any pruned user. Users without a record are
    /// treated as cleared at this point.
    floor: u64,
    last_prune: Instant,
}

impl Inner {
    fn drop_user(&mut self, user: &UserId) {
        if let Some(record) = self.users.remove(user) {
            self.floor = self.floor.max(record.cleared);
        }
    }

    fn prune_user(&mut self, user: &UserId, ttl: Duration) {
        let empty = match self.users.get_mut(user) {
            Some(record) => {
                record.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
                record.entries.is_empty()
            }
            None => false,
        };
        if empty {
            self.drop_user(user);
        }
    }

    fn prune_all(&mut self, ttl: Duration) {
        let mut emptied = Vec::new();
        for (user, record) in self.users.iter_mut() {
            record.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
            if record.entries.is_empty() {
                emptied.push(user.clone());
            }
        }
        for user in &emptied {
            self.drop_user(user);
        }
        self.last_prune = Instant::now();
    }
}

/// Process-local cache with a fixed time-to-live.
///
/// Expired entries are pruned on write: the writing user's entries every
/// time, everyone's at most once per TTL.
pub struct MemorySearchCache {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl MemorySearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                users: HashMap::new(),
                clock: 0,
                floor: 0,
                last_prune: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CacheError> {
        self.inner
            .lock()
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    /// Number of entries held, expired or not.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|inner| inner.users.values().map(|r| r.entries.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchCache for MemorySearchCache {
    async fn get(&self, user: &UserId, key: &str) -> Result<Option<Vec<Contact>>, CacheError> {
        let mut inner = self.lock()?;
        let Some(record) = inner.users.get_mut(user) else {
            return Ok(None);
        };
        match record.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Ok(Some(entry.results.clone())),
            Some(_) => {
                record.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn generation(&self, _user: &UserId) -> Result<u64, CacheError> {
        Ok(self.lock()?.clock)
    }

    async fn put(
        &self,
        user: &UserId,
        key: &str,
        results: Vec<Contact>,
        generation: u64,
    ) -> Result<bool, CacheError> {
        let mut inner = self.lock()?;
        let cleared = inner.users.get(user).map_or(inner.floor, |r| r.cleared);
        if cleared > generation {
            debug!(user_id = %user, key = %key, "Search results predate a clear, not cached");
            return Ok(false);
        }

        if inner.last_prune.elapsed() >= self.ttl {
            inner.prune_all(self.ttl);
        } else {
            inner.prune_user(user, self.ttl);
        }
        let floor = inner.floor;
        inner
            .users
            .entry(user.clone())
            .or_insert_with(|| UserEntries {
                entries: HashMap::new(),
                cleared: floor,
            })
            .entries
            .insert(
                key.to_string(),
                Entry {
                    results,
                    stored_at: Instant::now(),
                },
            );
        Ok(true)
    }

    async fn clear_user_cache(&self, user: &UserId) -> Result<(), CacheError> {
        let mut inner = self.lock()?;
        inner.clock += 1;
        let clock = inner.clock;
        let record = inner.users.entry(user.clone()).or_insert_with(|| UserEntries {
            entries: HashMap::new(),
            cleared: 0,
        });
        record.entries.clear();
        record.cleared = clock;
        Ok(())
    }
}
