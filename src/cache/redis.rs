//! Remote cache back-end (Redis protocol)
//!
//! Values are written with `SET ... EX` so the server owns TTL expiry, and
//! [`KvStore::take`] maps to `GETDEL` for atomic read-then-delete semantics.
//! Transient back-end failures surface as `UPSTREAM_ERROR`; a missing key is
//! never an error.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::KvStore;
use crate::{Error, Result};

/// Redis-backed [`KvStore`].
///
/// The [`ConnectionManager`] multiplexes one connection and reconnects
/// transparently, so the store is cheap to clone and share.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `endpoint` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the endpoint does not parse and
    /// [`Error::Upstream`] when the initial connection fails.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let url = format!("redis://{endpoint}");
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid cache endpoint: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::upstream(format!("cache connection failed: {e}")))?;
        debug!(endpoint = %endpoint, "Connected to remote cache");
        Ok(Self { conn })
    }

    fn backend_error(e: &redis::RedisError) -> Error {
        Error::upstream(format!("cache backend error: {e}"))
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Self::backend_error(&e))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::backend_error(&e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Self::backend_error(&e))
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::backend_error(&e))
    }

    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
