//! Runner-side status bookkeeping.
//!
//! Failures are collected while the pipeline runs; the terminal status is
//! decided once, when the execution ends.

use etl_core::ExecutionStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct StatusTracker {
    status: ExecutionStatus,
    invalid_pipeline: bool,
    failed: bool,
    cancel_requested: Arc<AtomicBool>,
    components_running: bool,
}

impl StatusTracker {
    pub fn new(cancel_requested: Arc<AtomicBool>) -> Self {
        Self {
            status: ExecutionStatus::Queued,
            invalid_pipeline: false,
            failed: false,
            cancel_requested,
            components_running: false,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_cancelling(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst) && !self.status.is_finished()
    }

    pub fn is_components_running(&self) -> bool {
        self.components_running
    }

    pub fn on_execution_begin(&mut self) {
        if self.status == ExecutionStatus::Queued {
            self.status = ExecutionStatus::Running;
        }
    }

    pub fn on_invalid_pipeline(&mut self) {
        self.invalid_pipeline = true;
    }

    pub fn on_components_execution_begin(&mut self) {
        self.components_running = true;
    }

    /// Any failure that makes the execution unsuccessful.
    pub fn on_failure(&mut self) {
        self.failed = true;
    }

    pub fn on_cancel_request(&mut self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Move to the terminal status. Later calls keep the first result.
    pub fn on_execution_end(&mut self) -> ExecutionStatus {
        if self.status.is_finished() {
            return self.status;
        }
        self.components_running = false;
        self.status = if self.invalid_pipeline {
            ExecutionStatus::Invalid
        } else if self.cancel_requested.load(Ordering::SeqCst) {
            ExecutionStatus::Cancelled
        } else if self.failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Finished
        };
        self.status
    }

    pub fn is_execution_successful(&self) -> bool {
        !self.failed && !self.invalid_pipeline
    }
}
