//! Task state machine and response classification.

use agent_state_core::{AgentResponse, TaskStatus, traits::ExecutorError};
use serde_json::Value;
use thiserror::Error;

/// Rejected status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid transition from {from} to {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Check a transition and return the new status.
///
/// # Errors
/// Returns error if the transition is not permitted.
pub const fn transition(from: TaskStatus, to: TaskStatus) -> Result<TaskStatus, TransitionError> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(TransitionError { from, to })
    }
}

/// Enter `running` for a new invocation.
///
/// # Errors
/// Returns error while an execution is already running.
pub const fn begin_invoke(current: TaskStatus) -> Result<TaskStatus, TransitionError> {
    transition(current, TaskStatus::Running)
}

/// Enter `running` for a resume. Only an interrupted session can resume.
///
/// # Errors
/// Returns error unless the session is interrupted.
pub const fn begin_resume(current: TaskStatus) -> Result<TaskStatus, TransitionError> {
    match current {
        TaskStatus::Interrupted => Ok(TaskStatus::Running),
        from => Err(TransitionError {
            from,
            to: TaskStatus::Running,
        }),
    }
}

/// Status to persist once a running step produced `response`.
#[must_use]
pub fn settle(response: &AgentResponse) -> TaskStatus {
    let next = response.status.task_status();
    transition(TaskStatus::Running, next).unwrap_or_else(|e| {
        tracing::error!(session_id = %response.session_id, "{e}");
        TaskStatus::Error
    })
}

/// Classify an engine outcome into a response.
///
/// Payload objects carrying `interrupt` (or `__interrupt__`) are interrupts,
/// objects carrying `error` are failures, any other object is a result.
/// Engine errors and non-object payloads become error responses.
#[must_use]
pub fn classify(
    session_id: &str,
    task_id: Option<&str>,
    outcome: Result<Value, ExecutorError>,
) -> AgentResponse {
    let payload = match outcome {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(session_id, "Agent execution failed: {e}");
            return AgentResponse::error(session_id, task_id, e.to_string());
        }
    };

    let mut fields = match payload {
        Value::Object(fields) => fields,
        other => {
            tracing::error!(session_id, "Agent returned a non-object payload");
            return AgentResponse::error(
                session_id,
                task_id,
                format!("Unclassifiable agent result: {other}"),
            );
        }
    };

    if let Some(gate) = fields
        .remove("interrupt")
        .or_else(|| fields.remove("__interrupt__"))
    {
        tracing::info!(session_id, "Agent paused for approval");
        return AgentResponse::interrupted(session_id, task_id, gate);
    }

    if let Some(error) = fields.get("error") {
        let message = error
            .as_str()
            .map_or_else(|| error.to_string(), str::to_owned);
        tracing::error!(session_id, "Agent reported an error: {message}");
        return AgentResponse::error(session_id, task_id, message);
    }

    tracing::info!(session_id, "Agent run completed");
    AgentResponse::completed(session_id, task_id, Value::Object(fields))
}
