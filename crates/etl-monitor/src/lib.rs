//! etl-monitor: tracks the lifecycle of many pipeline executions
//!
//! The monitor never runs pipelines. It reads the progress snapshots runners
//! write, keeps an in-memory registry consistent with them, tracks which
//! runner owns which execution, and removes deleted executions after a grace
//! period.
//!
//! # Modules
//!
//! - `registry`: Execution registry and reconciliation pass
//! - `reconcile`: Background loop driving the reconciliation
//! - `assignment`: Runner to execution map
//! - `gc`: Deferred directory removal
//! - `listener`: Lifecycle notifications
//! - `messages`: Message log loader
//! - `config`, `metrics`, `error`

pub mod assignment;
pub mod config;
pub mod error;
pub mod execution;
pub mod gc;
pub mod listener;
pub mod messages;
pub mod metrics;
pub mod reconcile;
pub mod registry;

pub use assignment::{Reassignment, RunnerAssignments};
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use execution::Execution;
pub use gc::{CollectReport, DirectoryRemover, FsRemover, GarbageCollector};
pub use listener::{BroadcastListener, ExecutionEvent, ExecutionListener, NoopListener};
pub use metrics::MonitorMetrics;
pub use reconcile::ReconciliationLoop;
pub use registry::{ExecutionInput, ExecutionRegistry, ReconcileReport};
