//! Human disposition for an interrupted execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request to resume an interrupted session.
///
/// `response_type` stays a raw string so unknown dispositions can be
/// rejected explicitly instead of failing deserialization upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptDirective {
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    /// One of `accept`, `edit`, `respond`, `reject`.
    pub response_type: String,
    #[serde(default)]
    pub args: Option<Value>,
}

impl InterruptDirective {
    /// Create a directive without arguments.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            task_id: None,
            response_type: response_type.into(),
            args: None,
        }
    }

    /// Attach disposition arguments.
    #[must_use]
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Scope the directive to a task.
    #[must_use]
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}
