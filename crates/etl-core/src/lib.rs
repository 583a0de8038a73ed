//! Core types shared by the pipeline runner and the execution monitor
//!
//! # Modules
//!
//! - `error`: Error types and Result alias
//! - `status`: Execution state machine
//! - `id`: Collision-free, creation-ordered execution identifiers
//! - `layout`: Paths inside an execution directory
//! - `snapshot`: Progress snapshot model and its atomic persistence
//! - `fs`: Atomic replace and directory helpers
//! - `debug`: Debug data references written per data unit
//! - `message`: Records stored in the append-only message logs

pub mod debug;
pub mod error;
pub mod fs;
pub mod id;
pub mod layout;
pub mod message;
pub mod snapshot;
pub mod status;

// Re-exports
pub use debug::{DataUnitDebug, DebugReference};
pub use error::{Error, Result};
pub use id::ExecutionId;
pub use layout::ExecutionLayout;
pub use message::{MessageKind, MessageRecord};
pub use snapshot::{PipelineProgress, ProgressSnapshot};
pub use status::ExecutionStatus;
