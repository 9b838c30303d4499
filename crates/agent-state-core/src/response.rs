//! Classified outcome of one execution step.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{TaskStatus, record::unix_now};

/// Outcome class of an execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Error,
    Interrupted,
}

impl ResponseStatus {
    /// Task status persisted after a step with this outcome.
    #[must_use]
    pub const fn task_status(self) -> TaskStatus {
        match self {
            Self::Completed => TaskStatus::Completed,
            Self::Error => TaskStatus::Error,
            Self::Interrupted => TaskStatus::Interrupted,
        }
    }
}

/// Response returned to the caller and embedded in the session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub session_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: ResponseStatus,
    /// Unix epoch seconds at which the response was produced.
    pub timestamp: f64,
    /// Error description, set for `error` responses.
    #[serde(default)]
    pub message: Option<String>,
    /// Engine result, set for `completed` responses.
    #[serde(default)]
    pub result: Option<Value>,
    /// Gate description, set for `interrupted` responses.
    #[serde(default, alias = "interrupt_data")]
    pub interrupt: Option<Value>,
}

impl AgentResponse {
    fn base(session_id: &str, task_id: Option<&str>, status: ResponseStatus) -> Self {
        Self {
            session_id: session_id.to_owned(),
            task_id: task_id.map(str::to_owned),
            status,
            timestamp: unix_now(),
            message: None,
            result: None,
            interrupt: None,
        }
    }

    /// A normally finished step.
    #[must_use]
    pub fn completed(session_id: &str, task_id: Option<&str>, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::base(session_id, task_id, ResponseStatus::Completed)
        }
    }

    /// A failed step.
    #[must_use]
    pub fn error(session_id: &str, task_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::base(session_id, task_id, ResponseStatus::Error)
        }
    }

    /// A step that stopped at a tool-approval gate.
    #[must_use]
    pub fn interrupted(session_id: &str, task_id: Option<&str>, interrupt: Value) -> Self {
        Self {
            interrupt: Some(interrupt),
            ..Self::base(session_id, task_id, ResponseStatus::Interrupted)
        }
    }
}
