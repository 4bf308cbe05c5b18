//! In-process cache back-end
//!
//! TTL semantics match the remote back-end: entries expire lazily on read.
//! The clock is injectable so TTL math can be tested deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;

use super::KvStore;
use crate::Result;

enum Clock {
    System,
    Fixed(AtomicU64),
}

struct Entry {
    value: Vec<u8>,
    expires_at: u64,
}

/// In-memory [`KvStore`] backed by a `DashMap`.
///
/// Intended for tests and single-process development; values are stored
/// unencrypted (the [`super::KvCache`] facade only attaches a cipher for the
/// remote back-end).
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Clock,
}

impl MemoryStore {
    /// Create a store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            clock: Clock::System,
        }
    }

    /// Create a store with a fixed clock starting at `now` (Unix seconds).
    #[must_use]
    pub fn with_clock(now: u64) -> Self {
        Self {
            entries: DashMap::new(),
            clock: Clock::Fixed(AtomicU64::new(now)),
        }
    }

    /// Advance a fixed clock by `secs`. No-op under the system clock.
    pub fn advance(&self, secs: u64) {
        if let Clock::Fixed(now) = &self.clock {
            now.fetch_add(secs, Ordering::SeqCst);
        }
    }

    /// TTL remaining for `key`, if present and live. Test hook.
    #[must_use]
    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        let entry = self.entries.get(key)?;
        let now = self.now();
        (entry.expires_at > now).then(|| entry.expires_at - now)
    }

    fn is_live(&self, entry: &Entry) -> bool {
        entry.expires_at > self.now()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: self.now() + ttl.as_secs(),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if !self.is_live(&entry) {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some((_, entry)) = self.entries.remove(key) else {
            return Ok(None);
        };
        Ok(self.is_live(&entry).then_some(entry.value))
    }

    fn now(&self) -> u64 {
        match &self.clock {
            Clock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            Clock::Fixed(now) => now.load(Ordering::SeqCst),
        }
    }
}
