//! Execution coordinator for agent sessions.
//!
//! One invoke or resume may be in flight per session. The claim is taken in
//! two places: an in-process lock per session, and a lease key in the store
//! so that other replicas see the session as busy too.

use std::{
    collections::{BTreeMap, HashMap},
    panic::AssertUnwindSafe,
    pin::pin,
    sync::Arc,
};

use agent_state_core::{
    AgentContext, AgentResponse, Executor, InterruptDirective, PromptMessage, ResumeCommand,
    SessionRecord, TaskStatus,
    codec::CodecError,
    keys,
    record::unix_now,
    traits::{ExecutorError, KeyValueStore, StoreError},
};
use agent_state_executor::{DispositionError, PromptBuilder, resume_command};
use futures::FutureExt;
use serde::Serialize;
use tokio::{
    sync::{Mutex, OwnedMutexGuard, RwLock},
    time::{self, Instant, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
    config::CoordinatorConfig,
    long_term::LongTermMemory,
    registry::{RegistryError, SessionRegistry, SessionUpdate},
    state_machine::{self, TransitionError},
};

/// Coordinator error.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Unreadable session record: {0}")]
    Decode(#[from] CodecError),
    #[error("Session not found: {user_id}/{session_id}")]
    NotFound { user_id: String, session_id: String },
    #[error("Cannot {action} session {session_id} while {status}")]
    InvalidState {
        session_id: String,
        status: TaskStatus,
        action: &'static str,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Session already running: {0}")]
    AlreadyRunning(String),
}

impl From<RegistryError> for CoordinatorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Store(e) => Self::Store(e),
            RegistryError::Codec(e) => Self::Decode(e),
        }
    }
}

impl From<DispositionError> for CoordinatorError {
    fn from(err: DispositionError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl CoordinatorError {
    fn not_found(user_id: &str, session_id: &str) -> Self {
        Self::NotFound {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    fn invalid_state(session_id: &str, err: TransitionError, action: &'static str) -> Self {
        Self::InvalidState {
            session_id: session_id.to_string(),
            status: err.from,
            action,
        }
    }
}

/// Request to start a new turn.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub user_id: String,
    /// Generated when absent.
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub query: String,
    /// Overrides the configured system message.
    pub system_message: Option<String>,
}

impl InvokeRequest {
    /// Create a request for a new session.
    #[must_use]
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
            task_id: None,
            query: query.into(),
            system_message: None,
        }
    }

    /// Target an existing (or caller-named) session.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Scope the turn to a task.
    #[must_use]
    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Override the system message.
    #[must_use]
    pub fn system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }
}

/// Status as reported upward, including the non-persisted `not_found`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    NotFound,
    Idle,
    Running,
    Interrupted,
    Completed,
    Error,
}

impl From<TaskStatus> for ReportedStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Idle => Self::Idle,
            TaskStatus::Running => Self::Running,
            TaskStatus::Interrupted => Self::Interrupted,
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Error => Self::Error,
        }
    }
}

/// Snapshot of one session for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub user_id: String,
    pub session_id: String,
    pub task_id: Option<String>,
    pub status: ReportedStatus,
    pub message: Option<String>,
    pub last_query: Option<String>,
    pub last_updated: Option<f64>,
    pub last_response: Option<AgentResponse>,
}

impl StatusReport {
    fn not_found(user_id: &str, session_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            task_id: None,
            status: ReportedStatus::NotFound,
            message: Some(format!("Session {session_id} does not exist for user {user_id}")),
            last_query: None,
            last_updated: None,
            last_response: None,
        }
    }

    fn from_record(record: SessionRecord) -> Self {
        Self {
            message: record
                .last_response
                .as_ref()
                .and_then(|r| r.message.clone()),
            user_id: record.user_id,
            session_id: record.session_id,
            task_id: record.task_id,
            status: record.status.into(),
            last_query: record.last_query,
            last_updated: record.last_updated,
            last_response: record.last_response,
        }
    }
}

/// Session totals across all users.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub session_count: usize,
    pub sessions_by_user: BTreeMap<String, Vec<String>>,
}

/// Exclusive right to execute one session.
struct Claim {
    lock_key: String,
    lease_key: String,
    token: String,
    guard: OwnedMutexGuard<()>,
}

enum Step {
    Invoke(Vec<PromptMessage>),
    Resume(ResumeCommand),
}

/// Coordinator for invoke/resume over persisted session state.
///
/// Constructed once at startup around a shared store and executor, and torn
/// down with [`Coordinator::cleanup`].
pub struct Coordinator<S, E>
where
    S: KeyValueStore,
    E: Executor,
{
    registry: SessionRegistry<S>,
    memory: LongTermMemory<S>,
    executor: E,
    config: CoordinatorConfig,
    contexts: RwLock<HashMap<String, Arc<dyn AgentContext>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S, E> Coordinator<S, E>
where
    S: KeyValueStore,
    E: Executor,
{
    /// Create a new coordinator.
    #[must_use]
    pub fn new(store: Arc<S>, executor: E, config: CoordinatorConfig) -> Self {
        Self {
            registry: SessionRegistry::new(Arc::clone(&store), config.session_ttl()),
            memory: LongTermMemory::new(store, config.memory_ttl()),
            executor,
            config,
            contexts: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The session registry.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry<S> {
        &self.registry
    }

    /// The long-term memory store.
    #[must_use]
    pub const fn memory(&self) -> &LongTermMemory<S> {
        &self.memory
    }

    /// Run a new turn, creating the session if needed.
    ///
    /// Engine failures come back as `error` responses; only store faults and
    /// concurrency conflicts are returned as errors.
    ///
    /// # Errors
    /// Returns `AlreadyRunning` if the session is executing elsewhere, or a
    /// store error if state could not be read or persisted.
    pub async fn invoke(&self, request: InvokeRequest) -> Result<AgentResponse, CoordinatorError> {
        let InvokeRequest {
            user_id,
            session_id,
            task_id,
            query,
            system_message,
        } = request;
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let claim = self.claim(&user_id, &session_id).await?;
        let result = self
            .invoke_claimed(
                &claim,
                &user_id,
                &session_id,
                task_id.as_deref(),
                &query,
                system_message.as_deref(),
            )
            .await;
        self.release(claim).await;
        result
    }

    async fn invoke_claimed(
        &self,
        claim: &Claim,
        user_id: &str,
        session_id: &str,
        task_id: Option<&str>,
        query: &str,
        system_message: Option<&str>,
    ) -> Result<AgentResponse, CoordinatorError> {
        let current = match self.registry.get(user_id, session_id).await? {
            Some(record) => self.recover_orphan(user_id, session_id, &record).await?,
            None => {
                self.registry
                    .create(user_id, Some(session_id), task_id, TaskStatus::Idle, None)
                    .await?;
                TaskStatus::Idle
            }
        };
        let running = state_machine::begin_invoke(current)
            .map_err(|e| CoordinatorError::invalid_state(session_id, e, "invoke"))?;

        self.persist(
            user_id,
            session_id,
            SessionUpdate::status(running)
                .query(query)
                .task(task_id)
                .at(unix_now()),
        )
        .await?;

        let messages = PromptBuilder::new(self.config.system_message.as_str())
            .override_system(system_message)
            .memory(self.memory.get(user_id).await)
            .build(query);
        self.run(claim, user_id, session_id, task_id, Step::Invoke(messages))
            .await
    }

    /// Continue an interrupted session with a human disposition.
    ///
    /// Nothing is persisted unless the session is interrupted and the
    /// disposition is valid. A session left `running` by a lost worker is
    /// reported as `InvalidState`; the next invoke recovers it.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown sessions, `InvalidState` unless the
    /// session is interrupted, `InvalidArgument` for unknown dispositions,
    /// `AlreadyRunning` on conflicts, or a store error.
    pub async fn resume(
        &self,
        directive: InterruptDirective,
    ) -> Result<AgentResponse, CoordinatorError> {
        let claim = self
            .claim(&directive.user_id, &directive.session_id)
            .await?;
        let result = self.resume_claimed(&claim, &directive).await;
        self.release(claim).await;
        result
    }

    async fn resume_claimed(
        &self,
        claim: &Claim,
        directive: &InterruptDirective,
    ) -> Result<AgentResponse, CoordinatorError> {
        let (user_id, session_id) = (directive.user_id.as_str(), directive.session_id.as_str());
        let record = self
            .registry
            .get(user_id, session_id)
            .await?
            .ok_or_else(|| CoordinatorError::not_found(user_id, session_id))?;
        let running = state_machine::begin_resume(record.status)
            .map_err(|e| CoordinatorError::invalid_state(session_id, e, "resume"))?;
        let command = resume_command(directive)?;

        self.persist(
            user_id,
            session_id,
            SessionUpdate::status(running)
                .task(directive.task_id.as_deref())
                .at(unix_now()),
        )
        .await?;

        tracing::info!(
            user_id,
            session_id,
            disposition = %directive.response_type,
            "Resuming session"
        );
        let task_id = directive.task_id.as_deref().or(record.task_id.as_deref());
        self.run(claim, user_id, session_id, task_id, Step::Resume(command))
            .await
    }

    /// Execute one step and persist its classified outcome.
    ///
    /// The lease and the session record are renewed on every heartbeat while
    /// the step runs, so neither expires under a long execution.
    async fn run(
        &self,
        claim: &Claim,
        user_id: &str,
        session_id: &str,
        task_id: Option<&str>,
        step: Step,
    ) -> Result<AgentResponse, CoordinatorError> {
        let execution = async move {
            let ctx = self.context(user_id, session_id).await?;
            match step {
                Step::Invoke(messages) => ctx.invoke(messages).await,
                Step::Resume(command) => ctx.resume(command).await,
            }
        };
        let mut execution = pin!(AssertUnwindSafe(execution).catch_unwind());

        let period = self.config.heartbeat_interval();
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let outcome = loop {
            tokio::select! {
                finished = &mut execution => {
                    break finished.unwrap_or_else(|_| {
                        Err(ExecutorError::Execution("agent panicked".into()))
                    });
                }
                _ = heartbeat.tick() => self.keep_alive(claim, user_id, session_id).await,
            }
        };

        let response = state_machine::classify(session_id, task_id, outcome);
        let status = state_machine::settle(&response);
        self.persist(
            user_id,
            session_id,
            SessionUpdate::status(status)
                .response(response.clone())
                .at(response.timestamp),
        )
        .await?;
        tracing::info!(user_id, session_id, %status, "Session settled");
        Ok(response)
    }

    /// Renew the lease and the session record of a running step.
    ///
    /// Failures are logged; the step keeps running either way.
    async fn keep_alive(&self, claim: &Claim, user_id: &str, session_id: &str) {
        match self
            .registry
            .store()
            .expire_if_equals(
                &claim.lease_key,
                claim.token.as_bytes(),
                self.config.lease_ttl(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(user_id, session_id, "Lease lost while the step was running");
            }
            Err(e) => tracing::warn!(user_id, session_id, "Failed to renew lease: {e}"),
        }
        match self.registry.touch(user_id, session_id).await {
            Ok(true) => tracing::debug!(user_id, session_id, "Renewed running session"),
            Ok(false) => tracing::warn!(user_id, session_id, "Session record vanished mid-run"),
            Err(e) => tracing::warn!(user_id, session_id, "Failed to renew session record: {e}"),
        }
    }

    /// Mark a `running` record whose lease lapsed as failed.
    ///
    /// Only called while holding the claim, so a `running` status here was
    /// left behind by an owner that never released its lease.
    async fn recover_orphan(
        &self,
        user_id: &str,
        session_id: &str,
        record: &SessionRecord,
    ) -> Result<TaskStatus, CoordinatorError> {
        if record.status != TaskStatus::Running {
            return Ok(record.status);
        }
        tracing::warn!(user_id, session_id, "Recovering session left running by a lost worker");
        let response = AgentResponse::error(
            session_id,
            record.task_id.as_deref(),
            "Execution lease expired before the run finished",
        );
        self.persist(
            user_id,
            session_id,
            SessionUpdate::status(TaskStatus::Error)
                .response(response)
                .at(unix_now()),
        )
        .await?;
        Ok(TaskStatus::Error)
    }

    async fn persist(
        &self,
        user_id: &str,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<(), CoordinatorError> {
        if self.registry.update(user_id, session_id, update).await? {
            Ok(())
        } else {
            Err(CoordinatorError::not_found(user_id, session_id))
        }
    }

    /// Get the cached execution context of a session, building it once.
    async fn context(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Arc<dyn AgentContext>, ExecutorError> {
        let key = keys::session(user_id, session_id);
        if let Some(ctx) = self.contexts.read().await.get(&key) {
            return Ok(Arc::clone(ctx));
        }
        let ctx = self.executor.build_context(user_id, session_id).await?;
        tracing::info!(user_id, session_id, "Created execution context");
        self.contexts.write().await.insert(key, Arc::clone(&ctx));
        Ok(ctx)
    }

    async fn claim(&self, user_id: &str, session_id: &str) -> Result<Claim, CoordinatorError> {
        let lock_key = keys::session(user_id, session_id);
        let slot = Arc::clone(self.locks.lock().await.entry(lock_key.clone()).or_default());
        let Ok(guard) = slot.try_lock_owned() else {
            tracing::debug!(user_id, session_id, "Rejected concurrent call in this process");
            return Err(CoordinatorError::AlreadyRunning(session_id.to_string()));
        };

        let lease_key = keys::session_lease(user_id, session_id);
        let token = Uuid::new_v4().to_string();
        let claimed = self
            .registry
            .store()
            .set_if_absent(&lease_key, token.as_bytes(), self.config.lease_ttl())
            .await;
        let claim = Claim {
            lock_key,
            lease_key,
            token,
            guard,
        };
        match claimed {
            Ok(true) => Ok(claim),
            Ok(false) => {
                tracing::debug!(user_id, session_id, "Lease held by another worker");
                self.forget_lock(claim).await;
                Err(CoordinatorError::AlreadyRunning(session_id.to_string()))
            }
            Err(e) => {
                self.forget_lock(claim).await;
                Err(e.into())
            }
        }
    }

    async fn release(&self, claim: Claim) {
        match self
            .registry
            .store()
            .delete_if_equals(&claim.lease_key, claim.token.as_bytes())
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(lease = %claim.lease_key, "Lease lapsed before release"),
            Err(e) => tracing::warn!(lease = %claim.lease_key, "Failed to release lease: {e}"),
        }
        self.forget_lock(claim).await;
    }

    /// Drop the in-process lock, removing its slot once nobody else holds it.
    async fn forget_lock(&self, claim: Claim) {
        let Claim {
            lock_key, guard, ..
        } = claim;
        drop(guard);
        let mut locks = self.locks.lock().await;
        if locks
            .get(&lock_key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            locks.remove(&lock_key);
        }
    }

    /// Status snapshot of a session; `not_found` when it does not exist.
    ///
    /// # Errors
    /// Returns error if the store fails or the record is not a record.
    pub async fn status(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<StatusReport, CoordinatorError> {
        Ok(self
            .registry
            .get(user_id, session_id)
            .await?
            .map_or_else(
                || StatusReport::not_found(user_id, session_id),
                StatusReport::from_record,
            ))
    }

    /// The user's most recently updated session.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn active_session(&self, user_id: &str) -> Result<Option<String>, CoordinatorError> {
        Ok(self.registry.most_recently_updated(user_id).await?)
    }

    /// All live session ids of a user.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<String>, CoordinatorError> {
        Ok(self.registry.list(user_id).await?)
    }

    /// Delete a session and drop its cached context.
    ///
    /// # Errors
    /// Returns `AlreadyRunning` while the session executes, or a store error.
    pub async fn delete_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<bool, CoordinatorError> {
        let claim = self.claim(user_id, session_id).await?;
        let deleted = self.registry.delete(user_id, session_id).await;
        self.contexts
            .write()
            .await
            .remove(&keys::session(user_id, session_id));
        self.release(claim).await;
        Ok(deleted?)
    }

    /// Replace a user's long-term memory. Returns whether it was stored.
    pub async fn write_memory(&self, user_id: &str, text: &str) -> bool {
        self.memory.put(user_id, text).await
    }

    /// Session totals across all users.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn system_info(&self) -> Result<SystemInfo, CoordinatorError> {
        let sessions_by_user = self.registry.all_users_sessions().await?;
        Ok(SystemInfo {
            session_count: sessions_by_user.values().map(Vec::len).sum(),
            sessions_by_user,
        })
    }

    /// Number of cached execution contexts.
    pub async fn cached_contexts(&self) -> usize {
        self.contexts.read().await.len()
    }

    /// Drop all cached contexts and close the store connection.
    ///
    /// Safe to call more than once; later calls rebuild contexts on demand.
    ///
    /// # Errors
    /// Returns error if the store fails to close.
    pub async fn cleanup(&self) -> Result<(), CoordinatorError> {
        let released = {
            let mut contexts = self.contexts.write().await;
            let count = contexts.len();
            contexts.clear();
            count
        };
        self.registry.store().close().await?;
        tracing::info!(released, "Coordinator resources released");
        Ok(())
    }
}
