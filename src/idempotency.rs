//! Idempotency support for mutating tool calls
//!
//! Clients retrying a mutating call (timeout, crash, duplicated delivery)
//! supply an idempotency key; the coordinator guarantees at-most-once
//! externally visible effect by replaying the stored result for a repeated
//! key instead of re-running the handler.
//!
//! Keys are scoped to `(tenant, user, tool, caller key)` so keys never
//! collide across tenants, users, or tools. Failed handlers are not cached;
//! the next retry may attempt the call again.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::{IdempotencyEntry, KvCache, SessionRecord};
use crate::Result;

/// Wraps mutating tool handlers with replay semantics.
pub struct IdempotencyCoordinator {
    cache: Arc<KvCache>,
    ttl: Duration,
}

impl IdempotencyCoordinator {
    /// Create a coordinator storing results for `ttl`.
    #[must_use]
    pub fn new(cache: Arc<KvCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Canonical cache key: `tenant:user:tool:key`.
    #[must_use]
    pub fn cache_key(session: &SessionRecord, tool_name: &str, key: &str) -> String {
        format!(
            "{}:{}:{tool_name}:{key}",
            session.tenant_id, session.user_id
        )
    }

    /// Run `handler` at most once per `(session, tool, key)`.
    ///
    /// With no key the handler runs unconditionally. With a key, a stored
    /// result is replayed without invoking the handler; otherwise the handler
    /// runs and its result is stored on success.
    ///
    /// # Errors
    ///
    /// Propagates cache failures and whatever the handler returns. Handler
    /// errors leave no entry behind.
    pub async fn wrap<F, Fut>(
        &self,
        session: &SessionRecord,
        tool_name: &str,
        key: Option<&str>,
        handler: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return handler().await;
        };

        let cache_key = Self::cache_key(session, tool_name, key);
        if let Some(entry) = self.cache.get_idempotency(&cache_key).await? {
            debug!(tool = tool_name, "Replaying stored idempotent result");
            return Ok(entry.result);
        }

        let result = handler().await?;
        let entry = IdempotencyEntry {
            hash: result_hash(&result),
            result: result.clone(),
        };
        self.cache.put_idempotency(&cache_key, &entry, self.ttl).await?;
        Ok(result)
    }
}

/// SHA-256 hex digest of the canonical JSON encoding of `result`.
///
/// serde_json maps are ordered, so serialisation is canonical: keys sorted
/// ascending, no extra whitespace, UTF-8.
#[must_use]
pub fn result_hash(result: &Value) -> String {
    let canonical = serde_json::to_string(result).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut acc, byte| {
            use std::fmt::Write as _;
            let _ = write!(acc, "{byte:02x}");
            acc
        })
}
