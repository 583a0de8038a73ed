//! etl-runner: records the progress of one pipeline execution
//!
//! The hosting engine reports every lifecycle step as a [`LifecycleEvent`];
//! the [`ExecutionObserver`] turns each one into an in-memory status update,
//! message-log appends and atomic snapshot writes that the monitor process
//! reads back.

pub mod error;
pub mod events;
pub mod information;
pub mod message_log;
pub mod observer;
pub mod overview;
pub mod status;

pub use error::ComponentError;
pub use events::{
    ComponentEvent, DataUnitPort, ExecutionMode, LifecycleEvent, MappingEvent, MappingSource,
    PipelineComponent, PipelineEvent, PipelineModel,
};
pub use information::{ComponentState, ExecutionInformation};
pub use message_log::{recover_interrupted_logs, MessageCounter, MessageLog, RecoveryReport};
pub use observer::{CancelToken, ExecutionObserver};
pub use overview::ExecutionOverview;
pub use status::StatusTracker;

/// Prelude for convenient imports
pub mod prelude {
    pub use super::events::{ComponentEvent, LifecycleEvent, MappingEvent, PipelineEvent};
    pub use super::observer::{CancelToken, ExecutionObserver};
    pub use super::ComponentError;
}
