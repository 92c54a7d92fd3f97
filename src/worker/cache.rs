//! Per-worker outcome cache.
//!
//! Each worker owns one of these; nothing else reads or writes it. A caller
//! that wants a result has to find the worker holding it, which is why
//! lookups are broadcast.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;

use crate::protocol::Outcome;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: String,
    pub outcome: Outcome,
    pub inserted_at: DateTime<Utc>,
}

/// Outcomes keyed by call id, each living for a fixed TTL from insertion.
///
/// Expiry is checked on read, so an entry past its TTL is never returned
/// even if it has not been swept yet.
#[derive(Clone)]
pub struct ResultCache {
    cache: Cache<String, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    pub fn insert(&self, id: &str, outcome: Outcome) {
        self.cache.insert(
            id.to_string(),
            CacheEntry {
                id: id.to_string(),
                outcome,
                inserted_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<CacheEntry> {
        self.cache.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cache.contains_key(id)
    }

    /// Live entries, after flushing pending evictions.
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
