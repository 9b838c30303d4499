//! Session orchestration and storage for the agent state coordinator.
//!
//! Provides:
//! - `SessionRegistry` - Session records and per-user membership index
//! - `state_machine` - Transition checks and response classification
//! - `Coordinator` - Single-flight invoke/resume over cached contexts
//! - `LongTermMemory` - Per-user memory blobs
//! - Storage implementations (memory, Redis)

pub mod config;
pub mod coordinator;
pub mod long_term;
pub mod registry;
pub mod state_machine;
pub mod storage;

pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{
    Coordinator, CoordinatorError, InvokeRequest, ReportedStatus, StatusReport, SystemInfo,
};
pub use long_term::LongTermMemory;
pub use registry::{RegistryError, SessionRegistry, SessionUpdate};
