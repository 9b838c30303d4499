//! Scripted in-process executor.
//!
//! Replays queued engine payloads instead of running a model. Without a
//! script it echoes the query back as a completed result. Used by the
//! console demo and by the coordinator tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use agent_state_core::{
    AgentContext, Executor, PromptMessage, ResumeCommand, Role, traits::ExecutorError,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify};

/// A call observed by a scripted context.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Invoke {
        session_id: String,
        messages: Vec<PromptMessage>,
    },
    Resume {
        session_id: String,
        command: ResumeCommand,
    },
}

enum Step {
    Reply(Value),
    Fail(String),
}

/// Pauses one call until released.
#[derive(Clone, Default)]
pub struct Hold {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Hold {
    /// Wait until the held call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct Script {
    steps: Mutex<VecDeque<Step>>,
    holds: Mutex<VecDeque<Hold>>,
    calls: Mutex<Vec<Call>>,
    build_failures: Mutex<VecDeque<String>>,
    builds: AtomicUsize,
}

/// Executor whose contexts replay a shared script.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Script>,
}

impl ScriptedExecutor {
    /// Create an executor with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw engine payload for the next call.
    pub async fn push_reply(&self, payload: Value) {
        self.script.steps.lock().await.push_back(Step::Reply(payload));
    }

    /// Queue an interrupt payload for the next call.
    pub async fn push_interrupt(&self, tool: &str, args: Value) {
        self.push_reply(json!({ "interrupt": { "tool": tool, "args": args } }))
            .await;
    }

    /// Queue an execution failure for the next call.
    pub async fn push_failure(&self, message: impl Into<String>) {
        self.script
            .steps
            .lock()
            .await
            .push_back(Step::Fail(message.into()));
    }

    /// Make the next context construction fail.
    pub async fn fail_next_build(&self, message: impl Into<String>) {
        self.script
            .build_failures
            .lock()
            .await
            .push_back(message.into());
    }

    /// Pause the next call until the returned hold is released.
    pub async fn hold_next(&self) -> Hold {
        let hold = Hold::default();
        self.script.holds.lock().await.push_back(hold.clone());
        hold
    }

    /// Calls observed so far, across all sessions.
    pub async fn calls(&self) -> Vec<Call> {
        self.script.calls.lock().await.clone()
    }

    /// Number of contexts built so far.
    #[must_use]
    pub fn builds(&self) -> usize {
        self.script.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn build_context(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Arc<dyn AgentContext>, ExecutorError> {
        if let Some(message) = self.script.build_failures.lock().await.pop_front() {
            return Err(ExecutorError::ContextBuild(message));
        }
        self.script.builds.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(user_id, session_id, "Built scripted context");
        Ok(Arc::new(ScriptedContext {
            session_id: session_id.to_string(),
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedContext {
    session_id: String,
    script: Arc<Script>,
}

impl ScriptedContext {
    async fn step(&self, call: Call, fallback: Value) -> Result<Value, ExecutorError> {
        self.script.calls.lock().await.push(call);

        let hold = self.script.holds.lock().await.pop_front();
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }

        match self.script.steps.lock().await.pop_front() {
            Some(Step::Reply(payload)) => Ok(payload),
            Some(Step::Fail(message)) => Err(ExecutorError::Execution(message)),
            None => Ok(fallback),
        }
    }
}

#[async_trait]
impl AgentContext for ScriptedContext {
    async fn invoke(&self, messages: Vec<PromptMessage>) -> Result<Value, ExecutorError> {
        let query = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let call = Call::Invoke {
            session_id: self.session_id.clone(),
            messages,
        };
        self.step(call, json!({ "output": query })).await
    }

    async fn resume(&self, command: ResumeCommand) -> Result<Value, ExecutorError> {
        let fallback = match &command {
            ResumeCommand::Accept => json!({ "output": "tool call executed" }),
            ResumeCommand::Edit { args } => {
                json!({ "output": "tool call executed with edited args", "args": args })
            }
            ResumeCommand::Respond { text } => json!({ "output": text }),
            ResumeCommand::Reject => json!({ "output": "tool call was rejected" }),
        };
        let call = Call::Resume {
            session_id: self.session_id.clone(),
            command,
        };
        self.step(call, fallback).await
    }
}
