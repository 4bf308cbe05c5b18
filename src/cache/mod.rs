//! Encrypted TTL'd key/value store
//!
//! The cache exclusively owns all persisted gateway state: PKCE transactions,
//! session records, refresh-token records, access-token entries, idempotency
//! entries, and advisory rate counters. Two back-ends implement the
//! [`KvStore`] capability set (in-memory for tests, Redis for production);
//! the [`KvCache`] facade layers encryption, JSON encoding, namespace
//! prefixes, and TTL computation on top.
//!
//! Keys are plaintext namespace-prefixed strings (`pkce:`, `session:`,
//! `access:`, `refresh:`, `idempotency:`, `rate:`); values are encrypted at
//! rest when a cipher is attached (required for the remote back-end).

mod crypto;
mod memory;
mod redis;

pub use crypto::CacheCipher;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// TTL for PKCE transactions (10 minutes).
pub const PKCE_TTL: Duration = Duration::from_secs(600);

/// Floor applied to every absolute-expiry TTL (seconds).
const MIN_TTL_SECONDS: u64 = 30;

/// Capability set a cache back-end must provide.
///
/// Implementations are interchangeable behind this contract; the facade never
/// assumes more than whole-record overwrites (last-writer-wins is acceptable
/// for token rotation and idempotency).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key` with the given TTL, overwriting any entry.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Read the value under `key`. A missing or expired key is `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read and remove `key` in one step where the back-end supports it.
    ///
    /// Callers must tolerate the race where two concurrent takes both see the
    /// value; downstream consumers (the AS token endpoint) resolve it.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Current Unix time in seconds, per this back-end's clock.
    fn now(&self) -> u64;
}

// ── Record types ──────────────────────────────────────────────────────────────

/// One in-flight PKCE authorization, keyed by `state`.
///
/// Created by `begin_pkce`, consumed exactly once by `complete_pkce`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceTransaction {
    /// PKCE code verifier (base64url, 32 random bytes)
    pub verifier: String,
    /// Normalised scopes requested at begin time
    pub scopes: Vec<String>,
    /// Redirect URI the authorize URL was built with
    pub redirect_uri: String,
}

/// A delegated end-user session, keyed by the opaque session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session id; injected on read, not persisted inside the value
    #[serde(default, skip_serializing)]
    pub session_id: String,
    /// Tenant of the authenticated user (`tid` claim)
    pub tenant_id: String,
    /// Resource-API object id of the authenticated user
    pub user_id: String,
    /// OAuth client the tokens were issued to
    pub client_id: String,
    /// Scopes granted by the authorization server
    pub scopes: Vec<String>,
    /// Expected usability horizon (Unix seconds)
    pub expires_at: u64,
}

/// Refresh-token material for a session. Rotated on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// The refresh token itself; never logged or returned to callers
    pub refresh_token: String,
    /// Scopes to request on refresh
    pub scopes: Vec<String>,
    /// Expected usability horizon (Unix seconds)
    pub expires_at: u64,
}

/// Cached result of a mutating tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    /// The result returned to the first caller
    pub result: Value,
    /// SHA-256 of the canonical result JSON; advisory, for observability
    pub hash: String,
}

#[derive(Serialize, Deserialize)]
struct AccessTokenEntry {
    token: String,
}

#[derive(Serialize, Deserialize)]
struct RateEntry {
    tokens: i64,
}

// ── Facade ────────────────────────────────────────────────────────────────────

/// Typed cache facade over a [`KvStore`] back-end.
pub struct KvCache {
    store: Arc<dyn KvStore>,
    cipher: Option<CacheCipher>,
    skew: u64,
}

impl KvCache {
    /// Wrap `store`, encrypting values with `cipher` when present.
    ///
    /// `skew` is subtracted from absolute expiries when deriving TTLs so
    /// records drop out of cache before the upstream tokens actually lapse.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, cipher: Option<CacheCipher>, skew: u64) -> Self {
        Self {
            store,
            cipher,
            skew,
        }
    }

    /// Current Unix time per the back-end clock.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.store.now()
    }

    /// TTL for a record expiring at the absolute time `expires_at`:
    /// `max(expires_at − now − skew, 30)`.
    #[must_use]
    pub fn ttl_for_expiry(&self, expires_at: u64) -> Duration {
        let remaining = expires_at
            .saturating_sub(self.now())
            .saturating_sub(self.skew);
        Duration::from_secs(remaining.max(MIN_TTL_SECONDS))
    }

    fn seal(&self, plain: Vec<u8>) -> Result<Vec<u8>> {
        match &self.cipher {
            Some(cipher) => cipher.seal(&plain),
            None => Ok(plain),
        }
    }

    fn open(&self, blob: Vec<u8>) -> Result<Vec<u8>> {
        match &self.cipher {
            Some(cipher) => cipher.open(&blob),
            None => Ok(blob),
        }
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let plain = serde_json::to_vec(value)
            .map_err(|e| Error::Internal(format!("cache encode failed: {e}")))?;
        self.store.put(key, self.seal(plain)?, ttl).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(blob) = self.store.get(key).await? else {
            return Ok(None);
        };
        let plain = self.open(blob)?;
        serde_json::from_slice(&plain)
            .map(Some)
            .map_err(|e| Error::Internal(format!("cache decode failed: {e}")))
    }

    // ── PKCE transactions ─────────────────────────────────────────────────────

    /// Persist a PKCE transaction under its `state` for 10 minutes.
    pub async fn put_pkce(&self, state: &str, txn: &PkceTransaction) -> Result<()> {
        self.put_json(&format!("pkce:{state}"), txn, PKCE_TTL).await
    }

    /// Consume the PKCE transaction for `state`.
    ///
    /// Read-then-delete: a second pop for the same state observes a missing
    /// record. Where the back-end cannot delete atomically, a concurrent pop
    /// may also see the verifier; the token endpoint rejects the second
    /// exchange.
    pub async fn pop_pkce(&self, state: &str) -> Result<Option<PkceTransaction>> {
        let Some(blob) = self.store.take(&format!("pkce:{state}")).await? else {
            return Ok(None);
        };
        let plain = self.open(blob)?;
        serde_json::from_slice(&plain)
            .map(Some)
            .map_err(|e| Error::Internal(format!("cache decode failed: {e}")))
    }

    // ── Session records ───────────────────────────────────────────────────────

    /// Persist a session record; TTL derived from its `expires_at`.
    pub async fn put_session(&self, session_id: &str, record: &SessionRecord) -> Result<()> {
        let ttl = self.ttl_for_expiry(record.expires_at);
        self.put_json(&format!("session:{session_id}"), record, ttl)
            .await
    }

    /// Read a session record, injecting `session_id` into the result.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let record: Option<SessionRecord> =
            self.get_json(&format!("session:{session_id}")).await?;
        Ok(record.map(|mut r| {
            r.session_id = session_id.to_string();
            r
        }))
    }

    /// Remove a session record (logout).
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.store.delete(&format!("session:{session_id}")).await
    }

    // ── Refresh-token records ─────────────────────────────────────────────────

    /// Persist refresh-token material; lifetime equals the session record's.
    pub async fn put_refresh_token(
        &self,
        session_id: &str,
        record: &RefreshTokenRecord,
    ) -> Result<()> {
        let ttl = self.ttl_for_expiry(record.expires_at);
        self.put_json(&format!("refresh:{session_id}"), record, ttl)
            .await
    }

    /// Read refresh-token material for a session.
    pub async fn get_refresh_token(&self, session_id: &str) -> Result<Option<RefreshTokenRecord>> {
        self.get_json(&format!("refresh:{session_id}")).await
    }

    /// Remove refresh-token material (logout).
    pub async fn delete_refresh_token(&self, session_id: &str) -> Result<()> {
        self.store.delete(&format!("refresh:{session_id}")).await
    }

    // ── Access-token entries ──────────────────────────────────────────────────

    /// Cache an access token for `expires_in − skew` seconds (floored at 30).
    pub async fn put_access_token(
        &self,
        session_id: &str,
        token: &str,
        expires_in: u64,
    ) -> Result<()> {
        let ttl = Duration::from_secs(expires_in.saturating_sub(self.skew).max(MIN_TTL_SECONDS));
        let entry = AccessTokenEntry {
            token: token.to_string(),
        };
        self.put_json(&format!("access:{session_id}"), &entry, ttl)
            .await
    }

    /// Read the cached access token for a session, if still live.
    pub async fn get_access_token(&self, session_id: &str) -> Result<Option<String>> {
        let entry: Option<AccessTokenEntry> =
            self.get_json(&format!("access:{session_id}")).await?;
        Ok(entry.map(|e| e.token))
    }

    // ── Idempotency entries ───────────────────────────────────────────────────

    /// Store the result of a completed mutating call under its canonical key.
    pub async fn put_idempotency(
        &self,
        key: &str,
        entry: &IdempotencyEntry,
        ttl: Duration,
    ) -> Result<()> {
        self.put_json(&format!("idempotency:{key}"), entry, ttl)
            .await
    }

    /// Read a previously stored mutating-call result.
    pub async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyEntry>> {
        self.get_json(&format!("idempotency:{key}")).await
    }

    // ── Advisory rate counters ────────────────────────────────────────────────

    /// Record a token-bucket counter. Advisory only.
    pub async fn put_rate(&self, key: &str, tokens: i64, ttl: Duration) -> Result<()> {
        self.put_json(&format!("rate:{key}"), &RateEntry { tokens }, ttl)
            .await
    }

    /// Read a token-bucket counter. Advisory only.
    pub async fn get_rate(&self, key: &str) -> Result<Option<i64>> {
        let entry: Option<RateEntry> = self.get_json(&format!("rate:{key}")).await?;
        Ok(entry.map(|e| e.tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_at(now: u64, skew: u64) -> (Arc<MemoryStore>, KvCache) {
        let store = Arc::new(MemoryStore::with_clock(now));
        let cache = KvCache::new(Arc::clone(&store) as Arc<dyn KvStore>, None, skew);
        (store, cache)
    }

    fn encrypted_cache_at(now: u64) -> (Arc<MemoryStore>, KvCache) {
        let store = Arc::new(MemoryStore::with_clock(now));
        let cipher = CacheCipher::new(&[9u8; 32]).unwrap();
        let cache = KvCache::new(Arc::clone(&store) as Arc<dyn KvStore>, Some(cipher), 60);
        (store, cache)
    }

    fn session_record(expires_at: u64) -> SessionRecord {
        SessionRecord {
            session_id: String::new(),
            tenant_id: "tenant-1".to_string(),
            user_id: "user-123".to_string(),
            client_id: "client-1".to_string(),
            scopes: vec!["Mail.Read".to_string()],
            expires_at,
        }
    }

    // ── TTL math ──────────────────────────────────────────────────────────────

    #[test]
    fn ttl_for_expiry_subtracts_now_and_skew() {
        let (_, cache) = cache_at(1_000, 60);
        assert_eq!(
            cache.ttl_for_expiry(1_000 + 3_600),
            Duration::from_secs(3_600 - 60)
        );
    }

    #[test]
    fn ttl_for_expiry_floors_at_30_seconds() {
        let (_, cache) = cache_at(1_000, 60);
        assert_eq!(cache.ttl_for_expiry(1_010), Duration::from_secs(30));
        assert_eq!(cache.ttl_for_expiry(500), Duration::from_secs(30));
    }

    // ── PKCE ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pkce_pop_consumes_the_record() {
        let (_, cache) = cache_at(0, 60);
        let txn = PkceTransaction {
            verifier: "v".to_string(),
            scopes: vec!["Mail.Read".to_string()],
            redirect_uri: "http://cb".to_string(),
        };
        cache.put_pkce("state-1", &txn).await.unwrap();

        let popped = cache.pop_pkce("state-1").await.unwrap().unwrap();
        assert_eq!(popped.verifier, "v");
        assert_eq!(popped.redirect_uri, "http://cb");

        // Second pop with the same state returns missing
        assert!(cache.pop_pkce("state-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pkce_records_carry_a_bounded_ttl() {
        let (store, cache) = cache_at(0, 60);
        let txn = PkceTransaction {
            verifier: "v".to_string(),
            scopes: vec![],
            redirect_uri: "http://cb".to_string(),
        };
        cache.put_pkce("s", &txn).await.unwrap();
        assert!(store.ttl_of("pkce:s").unwrap() <= 600);
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn session_roundtrip_injects_session_id() {
        let (_, cache) = cache_at(1_000, 60);
        cache
            .put_session("sid-1", &session_record(1_000 + 3_600))
            .await
            .unwrap();

        let record = cache.get_session("sid-1").await.unwrap().unwrap();
        assert_eq!(record.session_id, "sid-1");
        assert_eq!(record.user_id, "user-123");
        assert_eq!(record.tenant_id, "tenant-1");
    }

    #[tokio::test]
    async fn session_ttl_is_expiry_minus_skew() {
        let (store, cache) = cache_at(1_000, 60);
        cache
            .put_session("sid-1", &session_record(1_000 + 3_600))
            .await
            .unwrap();
        assert_eq!(store.ttl_of("session:sid-1"), Some(3_600 - 60));
    }

    #[tokio::test]
    async fn deleted_session_is_gone() {
        let (_, cache) = cache_at(1_000, 60);
        cache
            .put_session("sid-1", &session_record(10_000))
            .await
            .unwrap();
        cache.delete_session("sid-1").await.unwrap();
        assert!(cache.get_session("sid-1").await.unwrap().is_none());
    }

    // ── Access tokens ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn access_token_ttl_subtracts_skew() {
        let (store, cache) = cache_at(0, 300);
        cache
            .put_access_token("sid-1", "token-abc", 3_600)
            .await
            .unwrap();
        assert_eq!(store.ttl_of("access:sid-1"), Some(3_600 - 300));
        assert_eq!(
            cache.get_access_token("sid-1").await.unwrap(),
            Some("token-abc".to_string())
        );
    }

    #[tokio::test]
    async fn short_lived_access_token_keeps_min_ttl() {
        let (store, cache) = cache_at(0, 300);
        cache.put_access_token("sid-1", "t", 120).await.unwrap();
        assert_eq!(store.ttl_of("access:sid-1"), Some(30));
    }

    // ── Refresh tokens ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn refresh_token_roundtrip() {
        let (_, cache) = cache_at(0, 60);
        let record = RefreshTokenRecord {
            refresh_token: "rt".to_string(),
            scopes: vec!["Mail.Read".to_string()],
            expires_at: 3_600,
        };
        cache.put_refresh_token("sid-1", &record).await.unwrap();

        let loaded = cache.get_refresh_token("sid-1").await.unwrap().unwrap();
        assert_eq!(loaded.refresh_token, "rt");
        assert_eq!(loaded.scopes, vec!["Mail.Read".to_string()]);

        cache.delete_refresh_token("sid-1").await.unwrap();
        assert!(cache.get_refresh_token("sid-1").await.unwrap().is_none());
    }

    // ── Encryption at the facade ──────────────────────────────────────────────

    #[tokio::test]
    async fn encrypted_values_are_not_plaintext_in_the_store() {
        let (store, cache) = encrypted_cache_at(0);
        let record = RefreshTokenRecord {
            refresh_token: "super-secret-refresh".to_string(),
            scopes: vec![],
            expires_at: 3_600,
        };
        cache.put_refresh_token("sid-1", &record).await.unwrap();

        let raw = store.get("refresh:sid-1").await.unwrap().unwrap();
        let raw_str = String::from_utf8_lossy(&raw);
        assert!(!raw_str.contains("super-secret-refresh"));

        // But the facade still decrypts transparently
        let loaded = cache.get_refresh_token("sid-1").await.unwrap().unwrap();
        assert_eq!(loaded.refresh_token, "super-secret-refresh");
    }

    // ── Idempotency and rate helpers ──────────────────────────────────────────

    #[tokio::test]
    async fn idempotency_roundtrip() {
        let (_, cache) = cache_at(0, 60);
        let entry = IdempotencyEntry {
            result: serde_json::json!({"id": "d1"}),
            hash: "abc".to_string(),
        };
        cache
            .put_idempotency("t:u:tool:k1", &entry, Duration::from_secs(1_800))
            .await
            .unwrap();

        let loaded = cache.get_idempotency("t:u:tool:k1").await.unwrap().unwrap();
        assert_eq!(loaded.result, serde_json::json!({"id": "d1"}));
        assert!(cache.get_idempotency("t:u:tool:k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rate_counter_roundtrip() {
        let (_, cache) = cache_at(0, 60);
        cache
            .put_rate("tenant-1", 42, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get_rate("tenant-1").await.unwrap(), Some(42));
        assert_eq!(cache.get_rate("other").await.unwrap(), None);
    }
}
