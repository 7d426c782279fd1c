//! Idempotency cache for action results
//!
//! Key→result store bounded by a TTL and by entry count. Entries keyed with
//! the `idem:` prefix (explicit client idempotency keys) never count toward
//! the size bound; only raw action-id entries are trimmed, oldest first.
//! Stale entries are evicted before every insert.

use crate::sync::actions::ActionResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Prefix for explicit idempotency-key entries, exempt from size trimming
pub const IDEMPOTENCY_PREFIX: &str = "idem:";

/// Default time-to-live for cached results
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default bound on non-prefixed entries
pub const DEFAULT_MAX_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ActionResult,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    // Insertion order, for oldest-first trimming.
    order: Vec<String>,
}

/// TTL + size bounded key→result store
#[derive(Debug)]
pub struct IdempotencyCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    max_size: usize,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_SIZE)
    }
}

impl IdempotencyCache {
    /// Create a cache with explicit bounds
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self { state: Mutex::new(CacheState::default()), ttl, max_size }
    }

    /// Look up a cached result; expired entries miss
    pub fn get(&self, key: &str) -> Option<ActionResult> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.result.clone())
    }

    /// Insert a result, evicting expired entries first and then trimming
    /// the oldest non-`idem:` entries down to the size bound
    pub fn set(&self, key: impl Into<String>, result: ActionResult) {
        let key = key.into();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Drop everything past its TTL before admitting the new entry.
        let ttl = self.ttl;
        state.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        let entries = &state.entries;
        state.order.retain(|k| entries.contains_key(k));

        if state.entries.insert(key.clone(), CacheEntry { result, stored_at: Instant::now() }).is_none()
        {
            state.order.push(key);
        }

        // Trim oldest plain entries until within bound.
        let mut plain = state
            .order
            .iter()
            .filter(|k| !k.starts_with(IDEMPOTENCY_PREFIX))
            .count();
        while plain > self.max_size {
            let Some(pos) = state
                .order
                .iter()
                .position(|k| !k.starts_with(IDEMPOTENCY_PREFIX))
            else {
                break;
            };
            let evicted = state.order.remove(pos);
            state.entries.remove(&evicted);
            plain -= 1;
        }
    }

    /// Number of live entries (including expired-but-unswept ones)
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
