//! Execution-side helpers for the agent state coordinator.
//!
//! Provides:
//! - Prompt assembly (system message + long-term memory + query)
//! - Interrupt disposition parsing
//! - A scripted in-process executor for demos and tests

pub mod disposition;
pub mod prompt;
pub mod scripted;

pub use disposition::{Disposition, DispositionError, resume_command};
pub use prompt::{DEFAULT_SYSTEM_MESSAGE, PromptBuilder};
pub use scripted::{Call, Hold, ScriptedExecutor};
