//! Counter store abstraction and the in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::counter::{Clock, CounterRecord, SystemClock};
use crate::error::Result;

/// Key/value store holding counter records with a time-to-live.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the record stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<CounterRecord>>;

    /// Store `record` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, record: CounterRecord, ttl: Duration) -> Result<()>;
}

/// A counter store that can advance a fixed window as one atomic operation.
#[async_trait]
pub trait AtomicCounterStore: CounterStore {
    /// Count one request under `key` and return the resulting record.
    ///
    /// If no record exists, or the stored window started `window` or more
    /// before `now`, a fresh window `{count: 1, window_start: now}` is
    /// stored. Otherwise the count is incremented. Either way the entry's
    /// time-to-live is reset to `window`.
    async fn increment(&self, key: &str, now: i64, window: Duration) -> Result<CounterRecord>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    record: CounterRecord,
    expires_at: i64,
}

/// In-process counter store backed by a concurrent hash map.
///
/// Expiry is measured with the injected clock, so tests can drive it
/// with a [`ManualClock`](super::counter::ManualClock).
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    /// Create a store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before.saturating_sub(self.entries.len());
        trace!(purged = purged, "Purged expired counters");
        purged
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn expiry(now: i64, ttl: Duration) -> i64 {
        now.saturating_add(ttl.as_secs().min(i64::MAX as u64) as i64)
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<CounterRecord>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.record))
    }

    async fn set(&self, key: &str, record: CounterRecord, ttl: Duration) -> Result<()> {
        let expires_at = Self::expiry(self.clock.now(), ttl);
        self.entries
            .insert(key.to_string(), Entry { record, expires_at });
        Ok(())
    }
}

#[async_trait]
impl AtomicCounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, now: i64, window: Duration) -> Result<CounterRecord> {
        let expires_at = Self::expiry(self.clock.now(), window);
        let window_secs = window.as_secs() as i64;

        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(Entry {
                record: CounterRecord { count: 0, window_start: now },
                expires_at,
            });

        let current = entry.record;
        let live = entry.expires_at > self.clock.now()
            && current.count > 0
            && now - current.window_start < window_secs;
        let next = if live {
            CounterRecord {
                count: current.count + 1,
                window_start: current.window_start,
            }
        } else {
            CounterRecord::fresh(now)
        };
        entry.record = next;
        entry.expires_at = expires_at;

        Ok(entry.record)
    }
}
