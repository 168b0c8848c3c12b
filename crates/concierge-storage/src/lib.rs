//! Concierge storage crate - the user-scoped entity store and the contact
//! search cache.
//!
//! Provides the [`EntityStore`] boundary with an in-memory backend and a
//! WAL-mode SQLite backend, plus a TTL [`SearchCache`].

pub mod cache;
pub mod db;
pub mod error;
pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod store;

pub use cache::{search_key, MemorySearchCache, SearchCache};
pub use db::Database;
pub use error::{CacheError, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{AlertQuery, ContactQuery, EntityStore, EventQuery};
