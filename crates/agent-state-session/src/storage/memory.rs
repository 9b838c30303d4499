//! In-memory key-value store.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use agent_state_core::traits::{KeyValueStore, StoreError};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use tokio::time::Instant;

enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory store implementation.
///
/// Useful for development, tests and single-process deployments.
/// Data is lost on restart. Expiry follows the tokio clock, so tests can
/// drive it with `tokio::time::pause` / `advance`.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    let now = Instant::now();
    entries.get(key).filter(|e| e.is_live(now))
}

/// Drop the entry under `key` if it has expired.
fn purge(entries: &mut HashMap<String, Entry>, key: &str) {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
}

fn bytes_entry(value: &[u8], ttl: Duration) -> Entry {
    Entry {
        value: Value::Bytes(value.to_vec()),
        expires_at: Some(Instant::now() + ttl),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match live(&*self.read()?, key).map(|e| &e.value) {
            Some(Value::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(Value::Set(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.write()?.insert(key.to_string(), bytes_entry(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        purge(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), bytes_entry(value, ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        purge(&mut entries, key);
        Ok(entries.remove(key).is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        purge(&mut entries, key);
        let matches = matches!(
            entries.get(key).map(|e| &e.value),
            Some(Value::Bytes(bytes)) if bytes.as_slice() == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        purge(&mut entries, key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(true)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        purge(&mut entries, key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };
        if !matches!(&entry.value, Value::Bytes(bytes) if bytes.as_slice() == expected) {
            return Ok(false);
        }
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(live(&*self.read()?, key).is_some())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        purge(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(members) => Ok(members.insert(member.to_string())),
            Value::Bytes(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        purge(&mut entries, key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };
        let (removed, now_empty) = match &mut entry.value {
            Value::Set(members) => (members.remove(member), members.is_empty()),
            Value::Bytes(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        // Empty sets vanish, as they do in Redis.
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match live(&*self.read()?, key).map(|e| &e.value) {
            Some(Value::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(Value::Bytes(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    fn scan_prefix<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<String, StoreError>> {
        let keys = self.read().map(|entries| {
            let now = Instant::now();
            let mut keys: Vec<String> = entries
                .iter()
                .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
                .map(|(k, _)| k.clone())
                .collect();
            keys.sort();
            keys
        });
        match keys {
            Ok(keys) => futures::stream::iter(keys.into_iter().map(Ok)).boxed(),
            Err(e) => futures::stream::iter([Err(e)]).boxed(),
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn bytes_round_trip_and_delete() {
        let store = MemoryStore::new();
        assert_ok!(store.set_with_ttl("k", b"v1", MINUTE).await);
        assert_eq!(assert_ok!(store.get("k").await), Some(b"v1".to_vec()));
        assert!(assert_ok!(store.exists("k").await));
        assert!(assert_ok!(store.delete("k").await));
        assert!(!assert_ok!(store.delete("k").await));
        assert_eq!(assert_ok!(store.get("k").await), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_and_rewrites_renew() {
        let store = MemoryStore::new();
        assert_ok!(store.set_with_ttl("k", b"v", MINUTE).await);
        tokio::time::advance(Duration::from_secs(45)).await;
        assert_ok!(store.set_with_ttl("k", b"v", MINUTE).await);
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(assert_ok!(store.exists("k").await));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!assert_ok!(store.exists("k").await));
        assert!(!assert_ok!(store.delete("k").await));
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_honours_expiry() {
        let store = MemoryStore::new();
        assert!(assert_ok!(store.set_if_absent("lease", b"a", MINUTE).await));
        assert!(!assert_ok!(store.set_if_absent("lease", b"b", MINUTE).await));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(assert_ok!(store.set_if_absent("lease", b"b", MINUTE).await));
        assert!(!assert_ok!(store.delete_if_equals("lease", b"a").await));
        assert!(assert_ok!(store.delete_if_equals("lease", b"b").await));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_extended_only_for_the_owner() {
        let store = MemoryStore::new();
        assert!(assert_ok!(store.set_if_absent("lease", b"a", MINUTE).await));
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(!assert_ok!(store.expire_if_equals("lease", b"b", MINUTE).await));
        assert!(assert_ok!(store.expire_if_equals("lease", b"a", MINUTE).await));
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(assert_ok!(store.exists("lease").await));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!assert_ok!(store.expire_if_equals("lease", b"a", MINUTE).await));

        assert!(!assert_ok!(store.expire("missing", MINUTE).await));
        assert_ok!(store.set_with_ttl("k", b"v", MINUTE).await);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(assert_ok!(store.expire("k", MINUTE).await));
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(assert_ok!(store.get("k").await), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn sets_track_membership() {
        let store = MemoryStore::new();
        assert!(assert_ok!(store.set_add("s", "b").await));
        assert!(assert_ok!(store.set_add("s", "a").await));
        assert!(!assert_ok!(store.set_add("s", "a").await));
        assert_eq!(assert_ok!(store.set_members("s").await), vec!["a", "b"]);
        assert!(assert_ok!(store.set_remove("s", "a").await));
        assert!(assert_ok!(store.set_remove("s", "b").await));
        assert!(!assert_ok!(store.exists("s").await));
        assert!(assert_ok!(store.set_members("missing").await).is_empty());
    }

    #[tokio::test]
    async fn wrong_kind_is_an_error() {
        let store = MemoryStore::new();
        assert_ok!(store.set_with_ttl("k", b"v", MINUTE).await);
        assert_err!(store.set_add("k", "m").await);
        assert_ok!(store.set_add("s", "m").await);
        assert_err!(store.get("s").await);
    }

    #[tokio::test]
    async fn scan_filters_by_prefix() {
        let store = MemoryStore::new();
        assert_ok!(store.set_add("user_sessions:u2", "s").await);
        assert_ok!(store.set_add("user_sessions:u1", "s").await);
        assert_ok!(store.set_with_ttl("session:u1:s", b"{}", MINUTE).await);
        let keys: Vec<String> = assert_ok!(store.scan_prefix("user_sessions:").try_collect().await);
        assert_eq!(keys, vec!["user_sessions:u1", "user_sessions:u2"]);
    }
}
