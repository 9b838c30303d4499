//! Redis key-value store (feature-gated).

use std::{collections::VecDeque, time::Duration};

use agent_state_core::traits::{KeyValueStore, StoreError};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use redis::{AsyncCommands, RedisError, aio::ConnectionManager};
use tokio::sync::RwLock;

/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH: usize = 100;

const DELETE_IF_EQUALS: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const EXPIRE_IF_EQUALS: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
";

fn store_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.is_connection_dropped()
    {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

/// Whole seconds for `EX`, never below one.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Escape glob metacharacters so a prefix matches literally.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

struct ScanState {
    pattern: String,
    cursor: u64,
    started: bool,
    buffer: VecDeque<String>,
}

/// Redis storage implementation.
///
/// A single multiplexed connection is opened on first use and shared by
/// all callers. `close` drops it; the next operation reconnects.
pub struct RedisStore {
    client: redis::Client,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Create a store for a `redis://` URL without connecting yet.
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        Ok(Self {
            client,
            conn: RwLock::new(None),
        })
    }

    /// Create a store and open its connection eagerly.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let store = Self::new(url)?;
        store.connection().await?;
        Ok(store)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(conn.clone());
        }
        let mut slot = self.conn.write().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(store_error)?;
        tracing::debug!("Opened Redis connection");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn scan_step(
        &self,
        mut state: ScanState,
    ) -> Result<Option<(String, ScanState)>, StoreError> {
        loop {
            if let Some(key) = state.buffer.pop_front() {
                return Ok(Some((key, state)));
            }
            if state.started && state.cursor == 0 {
                return Ok(None);
            }
            let mut conn = self.connection().await?;
            let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(state.cursor)
                .arg("MATCH")
                .arg(&state.pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            state.started = true;
            state.cursor = cursor;
            state.buffer.extend(keys);
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(store_error)?;
        Ok(value)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let (): () = conn
            .set_ex(key, value, ttl_secs(ttl))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.del(key).await.map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::Script::new(DELETE_IF_EQUALS)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let renewed: bool = conn.expire(key, secs).await.map_err(store_error)?;
        Ok(renewed)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let renewed: i64 = redis::Script::new(EXPIRE_IF_EQUALS)
            .key(key)
            .arg(expected)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(renewed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let found: bool = conn.exists(key).await.map_err(store_error)?;
        Ok(found)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let added: i64 = conn.sadd(key, member).await.map_err(store_error)?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.srem(key, member).await.map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.smembers(key).await.map_err(store_error)?;
        Ok(members)
    }

    fn scan_prefix<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<String, StoreError>> {
        let state = ScanState {
            pattern: glob_escape(prefix),
            cursor: 0,
            started: false,
            buffer: VecDeque::new(),
        };
        futures::stream::try_unfold(state, move |state| self.scan_step(state)).boxed()
    }

    async fn close(&self) -> Result<(), StoreError> {
        if self.conn.write().await.take().is_some() {
            tracing::debug!("Closed Redis connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_matched_literally() {
        assert_eq!(glob_escape("user_sessions:"), "user_sessions:*");
        assert_eq!(glob_escape("user_sessions:a*b"), "user_sessions:a\\*b*");
        assert_eq!(glob_escape("x[1]?"), "x\\[1\\]\\?*");
    }

    #[test]
    fn ttl_rounds_to_at_least_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(300)), 300);
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RedisStore::new("not a url").is_err());
    }
}
