//! Session record and task status.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::AgentResponse;

/// Persisted task status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, nothing executed yet.
    Idle,
    /// An execution is in flight.
    Running,
    /// Stopped at a tool-approval gate, waiting for a disposition.
    Interrupted,
    /// Last execution finished normally.
    Completed,
    /// Last execution failed.
    Error,
}

impl TaskStatus {
    /// All persisted states.
    pub const ALL: [Self; 5] = [
        Self::Idle,
        Self::Running,
        Self::Interrupted,
        Self::Completed,
        Self::Error,
    ];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Whether no progress happens until the next external call.
    #[must_use]
    pub const fn is_quiescent(self) -> bool {
        matches!(self, Self::Interrupted | Self::Completed | Self::Error)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Error` is reachable from everywhere so that faults in the
    /// transition logic itself can always be recorded.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Idle | Self::Completed | Self::Error | Self::Interrupted,
                Self::Running
            ) | (
                Self::Running,
                Self::Interrupted | Self::Completed
            ) | (_, Self::Error)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable per-session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub last_query: Option<String>,
    #[serde(default)]
    pub last_response: Option<AgentResponse>,
    /// Unix epoch seconds; `None` when the stored value was not numeric.
    #[serde(default)]
    pub last_updated: Option<f64>,
    /// Expiry window in seconds, renewed on every write.
    pub ttl: u64,
}

impl SessionRecord {
    /// Create a fresh record stamped with the current time.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        task_id: Option<String>,
        status: TaskStatus,
        ttl: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            task_id,
            status,
            last_query: None,
            last_response: None,
            last_updated: Some(unix_now()),
            ttl,
        }
    }
}

/// Current Unix time in fractional seconds.
#[must_use]
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
