//! Core abstractions for agent session state coordination.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionRecord` / `TaskStatus` - Durable per-session state
//! - `AgentResponse` - Classified outcome of one execution step
//! - `InterruptDirective` - Human disposition for a gated tool call
//! - `codec` - Record serialization with per-field decode fallback
//! - Key-value store and executor traits

pub mod codec;
pub mod directive;
pub mod keys;
pub mod message;
pub mod record;
pub mod response;
pub mod traits;

pub use directive::InterruptDirective;
pub use message::{PromptMessage, Role};
pub use record::{SessionRecord, TaskStatus};
pub use response::{AgentResponse, ResponseStatus};
pub use traits::{AgentContext, Executor, KeyValueStore, ResumeCommand};
