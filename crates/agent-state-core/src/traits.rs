//! Core traits for storage and execution.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::PromptMessage;

/// Key-value store error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store unreachable: {0}")]
    Connection(String),
    /// The store answered with an error.
    #[error("Store error: {0}")]
    Backend(String),
    /// The key holds a value of another kind (bytes vs. set).
    #[error("Wrong value kind for key: {0}")]
    WrongType(String),
}

/// Trait for networked key-value backends.
///
/// Every operation is independently failable; implementations surface
/// connectivity faults instead of retrying them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value and (re)start its expiry window.
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration)
    -> Result<(), StoreError>;

    /// Write a value only if the key is absent. Returns whether it was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete a key only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError>;

    /// Restart the expiry window of an existing key. Returns whether it existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Restart the expiry window of a key only while it still holds `expected`.
    async fn expire_if_equals(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Add a member to a set. Returns whether it was newly added.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove a member from a set. Returns whether it was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// All members of a set; empty when the key is absent.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Lazily enumerate keys starting with `prefix`.
    fn scan_prefix<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<String, StoreError>>;

    /// Release the connection. Later operations reconnect on demand.
    async fn close(&self) -> Result<(), StoreError>;
}

/// How an interrupted execution should continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResumeCommand {
    /// Run the gated tool call as requested.
    Accept,
    /// Run the gated tool call with substituted arguments.
    Edit { args: Value },
    /// Skip the gated tool call and feed this text back instead.
    Respond { text: String },
    /// Skip the gated tool call and tell the agent it was denied.
    Reject,
}

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Context construction failed: {0}")]
    ContextBuild(String),
    #[error("Execution failed: {0}")]
    Execution(String),
    #[error("Nothing to resume: {0}")]
    NothingToResume(String),
}

/// A per-session execution handle backed by a durable checkpoint.
///
/// Results are raw engine payloads; classification into an
/// `AgentResponse` happens in the coordinator.
#[async_trait]
pub trait AgentContext: Send + Sync {
    /// Start a new turn with the given messages.
    async fn invoke(&self, messages: Vec<PromptMessage>) -> Result<Value, ExecutorError>;

    /// Continue a turn that stopped at a tool-approval gate.
    async fn resume(&self, command: ResumeCommand) -> Result<Value, ExecutorError>;
}

/// Trait for agent executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Build the execution context for a session. Expensive; callers cache it.
    async fn build_context(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Arc<dyn AgentContext>, ExecutorError>;
}
