//! Session registry over a key-value store.
//!
//! Records live under `session:{user_id}:{session_id}` with a sliding TTL;
//! `user_sessions:{user_id}` indexes them per user. The index can outlive
//! expired records, so every read that trusts it reconciles first.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use agent_state_core::{
    AgentResponse, SessionRecord, TaskStatus,
    codec::{self, CodecError},
    keys,
    traits::{KeyValueStore, StoreError},
};
use futures::TryStreamExt;
use thiserror::Error;
use uuid::Uuid;

/// Registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Partial update of a session record. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<TaskStatus>,
    pub task_id: Option<String>,
    pub last_query: Option<String>,
    pub last_response: Option<AgentResponse>,
    pub last_updated: Option<f64>,
    pub ttl: Option<Duration>,
}

impl SessionUpdate {
    /// Update carrying a new status.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Stamp the update with a timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: f64) -> Self {
        self.last_updated = Some(timestamp);
        self
    }

    /// Record the query that started the step.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.last_query = Some(query.into());
        self
    }

    /// Embed the step's response.
    #[must_use]
    pub fn response(mut self, response: AgentResponse) -> Self {
        self.last_response = Some(response);
        self
    }

    /// Scope the record to a task, when one is given.
    #[must_use]
    pub fn task(mut self, task_id: Option<&str>) -> Self {
        if let Some(task_id) = task_id {
            self.task_id = Some(task_id.to_string());
        }
        self
    }

    fn apply(self, record: &mut SessionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(task_id) = self.task_id {
            record.task_id = Some(task_id);
        }
        if let Some(query) = self.last_query {
            record.last_query = Some(query);
        }
        if let Some(response) = self.last_response {
            record.last_response = Some(response);
        }
        // Never move a session's clock backwards.
        record.last_updated = match (record.last_updated, self.last_updated) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => new.or(old),
        };
        if let Some(ttl) = self.ttl {
            record.ttl = ttl.as_secs();
        }
    }
}

/// Session records plus the per-user membership index.
pub struct SessionRegistry<S: KeyValueStore> {
    store: Arc<S>,
    default_ttl: Duration,
}

impl<S: KeyValueStore> SessionRegistry<S> {
    /// Create a registry writing records with `default_ttl`.
    #[must_use]
    pub const fn new(store: Arc<S>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create (or overwrite) a session record and index it.
    ///
    /// Generates a session id when none is given and returns the id used.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn create(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        task_id: Option<&str>,
        status: TaskStatus,
        ttl: Option<Duration>,
    ) -> Result<String, RegistryError> {
        let session_id = session_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
        let ttl = ttl.unwrap_or(self.default_ttl).as_secs();
        let record = SessionRecord::new(
            user_id,
            session_id.as_str(),
            task_id.map(str::to_owned),
            status,
            ttl,
        );

        self.write(user_id, &session_id, &record).await?;
        self.store
            .set_add(&keys::user_sessions(user_id), &session_id)
            .await?;
        tracing::debug!(user_id, session_id = %session_id, %status, "Created session");
        Ok(session_id)
    }

    /// Fetch a session record.
    ///
    /// # Errors
    /// Returns error if the store fails or the stored document is not a record.
    pub async fn get(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionRecord>, RegistryError> {
        let Some(bytes) = self.store.get(&keys::session(user_id, session_id)).await? else {
            return Ok(None);
        };
        let record = codec::decode(&bytes, user_id, session_id, self.default_ttl.as_secs())?;
        Ok(Some(record))
    }

    /// Merge `update` into an existing record and renew its TTL.
    ///
    /// Returns `false` if the record does not exist.
    ///
    /// # Errors
    /// Returns error if the store fails or the record cannot be encoded.
    pub async fn update(
        &self,
        user_id: &str,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<bool, RegistryError> {
        let Some(mut record) = self.get(user_id, session_id).await? else {
            return Ok(false);
        };
        update.apply(&mut record);
        self.write(user_id, session_id, &record).await?;
        Ok(true)
    }

    /// Restart a record's expiry window without changing its contents.
    ///
    /// Returns `false` if the record does not exist.
    ///
    /// # Errors
    /// Returns error if the store fails or the stored document is not a record.
    pub async fn touch(&self, user_id: &str, session_id: &str) -> Result<bool, RegistryError> {
        let Some(record) = self.get(user_id, session_id).await? else {
            return Ok(false);
        };
        let renewed = self
            .store
            .expire(
                &keys::session(user_id, session_id),
                Duration::from_secs(record.ttl),
            )
            .await?;
        Ok(renewed)
    }

    /// Delete a record and its index entry.
    ///
    /// Returns `true` if either removal had an effect.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn delete(&self, user_id: &str, session_id: &str) -> Result<bool, RegistryError> {
        let unindexed = self
            .store
            .set_remove(&keys::user_sessions(user_id), session_id)
            .await?;
        let deleted = self.store.delete(&keys::session(user_id, session_id)).await?;
        Ok(unindexed || deleted)
    }

    /// Session ids of a user, reconciled against live records.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn list(&self, user_id: &str) -> Result<Vec<String>, RegistryError> {
        self.reconcile(user_id).await?;
        Ok(self.store.set_members(&keys::user_sessions(user_id)).await?)
    }

    /// Whether a user has a live session with this id.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn exists(&self, user_id: &str, session_id: &str) -> Result<bool, RegistryError> {
        Ok(self.list(user_id).await?.iter().any(|id| id == session_id))
    }

    /// Whether a user has any live session.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn user_exists(&self, user_id: &str) -> Result<bool, RegistryError> {
        Ok(!self.list(user_id).await?.is_empty())
    }

    /// All live records of a user.
    ///
    /// # Errors
    /// Returns error if the store fails or a stored document is not a record.
    pub async fn records(&self, user_id: &str) -> Result<Vec<SessionRecord>, RegistryError> {
        let mut records = Vec::new();
        for session_id in self.list(user_id).await? {
            if let Some(record) = self.get(user_id, &session_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// The session with the greatest `last_updated`.
    ///
    /// Ties keep the first session seen. Records without a numeric timestamp
    /// or that fail to decode are skipped.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn most_recently_updated(
        &self,
        user_id: &str,
    ) -> Result<Option<String>, RegistryError> {
        let mut latest: Option<(f64, String)> = None;
        for session_id in self.list(user_id).await? {
            let record = match self.get(user_id, &session_id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(RegistryError::Codec(e)) => {
                    tracing::warn!(
                        user_id,
                        session_id = %session_id,
                        "Skipping unreadable session: {e}"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(updated) = record.last_updated else {
                continue;
            };
            if latest.as_ref().is_none_or(|(best, _)| updated > *best) {
                latest = Some((updated, session_id));
            }
        }
        Ok(latest.map(|(_, session_id)| session_id))
    }

    /// Total number of live sessions across all users.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn count_all(&self) -> Result<usize, RegistryError> {
        Ok(self.all_users_sessions().await?.values().map(Vec::len).sum())
    }

    /// Live session ids of every user that has any.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn all_users_sessions(
        &self,
    ) -> Result<BTreeMap<String, Vec<String>>, RegistryError> {
        let mut all = BTreeMap::new();
        for user_id in self.indexed_users().await? {
            let sessions = self.list(&user_id).await?;
            if !sessions.is_empty() {
                all.insert(user_id, sessions);
            }
        }
        Ok(all)
    }

    /// Drop index members whose record no longer exists.
    ///
    /// Returns the number of members removed.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn reconcile(&self, user_id: &str) -> Result<usize, RegistryError> {
        let index = keys::user_sessions(user_id);
        let mut removed = 0;
        for session_id in self.store.set_members(&index).await? {
            if !self.store.exists(&keys::session(user_id, &session_id)).await?
                && self.store.set_remove(&index, &session_id).await?
            {
                tracing::debug!(user_id, session_id = %session_id, "Dropped stale index entry");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Reconcile every user's index.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn reconcile_all(&self) -> Result<usize, RegistryError> {
        let mut removed = 0;
        for user_id in self.indexed_users().await? {
            removed += self.reconcile(&user_id).await?;
        }
        Ok(removed)
    }

    async fn indexed_users(&self) -> Result<Vec<String>, RegistryError> {
        let index_keys: Vec<String> = self
            .store
            .scan_prefix(keys::USER_SESSIONS_PREFIX)
            .try_collect()
            .await?;
        Ok(index_keys
            .iter()
            .filter_map(|key| keys::user_from_sessions_key(key))
            .map(str::to_owned)
            .collect())
    }

    async fn write(
        &self,
        user_id: &str,
        session_id: &str,
        record: &SessionRecord,
    ) -> Result<(), RegistryError> {
        let bytes = codec::encode(record)?;
        self.store
            .set_with_ttl(
                &keys::session(user_id, session_id),
                &bytes,
                Duration::from_secs(record.ttl),
            )
            .await?;
        Ok(())
    }
}
