//! Per-user long-term memory.
//!
//! Memory is best effort: store faults are logged and reported as an absent
//! memory or a failed write, never as an error.

use std::{sync::Arc, time::Duration};

use agent_state_core::{keys, traits::KeyValueStore};

/// Default retention of a memory blob.
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Long-term memory blobs keyed by user.
pub struct LongTermMemory<S: KeyValueStore> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: KeyValueStore> LongTermMemory<S> {
    #[must_use]
    pub const fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Read a user's memory. Unreadable memory counts as absent.
    pub async fn get(&self, user_id: &str) -> Option<String> {
        match self.store.get(&keys::long_term_memory(user_id)).await {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(user_id, "Long-term memory is not UTF-8: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(user_id, "Failed to read long-term memory: {e}");
                None
            }
        }
    }

    /// Replace a user's memory with the default retention.
    pub async fn put(&self, user_id: &str, text: &str) -> bool {
        self.put_with_ttl(user_id, text, self.ttl).await
    }

    /// Replace a user's memory. Returns whether the write succeeded.
    pub async fn put_with_ttl(&self, user_id: &str, text: &str, ttl: Duration) -> bool {
        match self
            .store
            .set_with_ttl(&keys::long_term_memory(user_id), text.as_bytes(), ttl)
            .await
        {
            Ok(()) => {
                tracing::info!(user_id, "Stored long-term memory");
                true
            }
            Err(e) => {
                tracing::error!(user_id, "Failed to write long-term memory: {e}");
                false
            }
        }
    }
}
