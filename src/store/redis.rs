//! Redis-backed store for multi-instance deployments.
//!
//! Windowed increments and the token-bucket step run as Lua scripts so the
//! read-modify-write happens inside Redis; nonce claims use `SET NX PX`.
//! Several gateway processes pointed at the same Redis therefore share one
//! coherent set of counters and claims.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;

use super::SharedStore;
use crate::{Error, Result};

/// INCR that applies the TTL only when the key is created, so a window
/// expires relative to its first hit.
const INCR_SCRIPT: &str = r"
local v = redis.call('INCR', KEYS[1])
if v == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return v
";

/// Refill-then-take executed server-side. Uses Redis server time so
/// instances with skewed clocks still agree on refill progress.
const BUCKET_SCRIPT: &str = r"
local cap = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
local t = redis.call('TIME')
local now = t[1] * 1000 + math.floor(t[2] / 1000)
local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
local last = tonumber(redis.call('HGET', KEYS[1], 'last_ms'))
if tokens == nil then
  tokens = cap
  last = now
end
local elapsed = now - last
if elapsed < 0 then
  elapsed = 0
end
tokens = math.min(cap, tokens + elapsed * rate / 1000.0)
local allowed = 0
if tokens >= 1.0 then
  tokens = tokens - 1.0
  allowed = 1
end
redis.call('HSET', KEYS[1], 'tokens', tokens, 'last_ms', now)
redis.call('PEXPIRE', KEYS[1], ttl)
return allowed
";

/// Redis-backed [`SharedStore`] implementation.
///
/// Holds a [`ConnectionManager`], which multiplexes one connection and
/// reconnects on failure; clones are cheap handles onto the same manager.
pub struct RedisStore {
    conn: ConnectionManager,
    incr_script: Script,
    bucket_script: Script,
}

impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the URL is invalid or the initial
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = client.get_connection_manager().await.map_err(store_err)?;
        debug!("Connected to Redis shared store");
        Ok(Self {
            conn,
            incr_script: Script::new(INCR_SCRIPT),
            bucket_script: Script::new(BUCKET_SCRIPT),
        })
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::Store(e.to_string())
}

#[allow(clippy::cast_possible_truncation)]
fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().min(u128::from(u64::MAX)) as u64
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .incr_script
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(count)
    }

    async fn read_counter(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(value.unwrap_or(0))
    }

    async fn read_counters(&self, keys: &[String]) -> Result<Vec<u64>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let values: Vec<Option<u64>> =
            cmd.query_async(&mut conn).await.map_err(store_err)?;
        Ok(values.into_iter().map(Option::unwrap_or_default).collect())
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        // SET NX PX is atomic server-side; None means somebody holds the key.
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(outcome.is_some())
    }

    async fn take_token(
        &self,
        key: &str,
        capacity: u32,
        refill_per_sec: f64,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let allowed: i64 = self
            .bucket_script
            .key(key)
            .arg(capacity)
            .arg(refill_per_sec)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(allowed == 1)
    }
}
