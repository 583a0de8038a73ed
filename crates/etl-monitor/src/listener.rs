//! Lifecycle notifications fired by the registry.
//!
//! Listeners are called while the registry lock is held and must not call
//! back into the registry.

use etl_core::ExecutionStatus;
use tokio::sync::broadcast;

use crate::execution::Execution;

pub trait ExecutionListener: Send + Sync {
    fn on_execution_status_did_change(&self, execution: &Execution, previous: ExecutionStatus);

    fn on_execution_has_final_data(&self, execution: &Execution);
}

/// Event sent by [`BroadcastListener`]
#[derive(Clone, Debug)]
pub enum ExecutionEvent {
    StatusDidChange {
        execution: Box<Execution>,
        previous: ExecutionStatus,
    },
    HasFinalData(Box<Execution>),
}

impl ExecutionEvent {
    pub fn execution(&self) -> &Execution {
        match self {
            ExecutionEvent::StatusDidChange { execution, .. } => execution,
            ExecutionEvent::HasFinalData(execution) => execution,
        }
    }
}

/// Fans notifications out to any number of subscribers.
#[derive(Clone)]
pub struct BroadcastListener {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastListener {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastListener {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ExecutionListener for BroadcastListener {
    fn on_execution_status_did_change(&self, execution: &Execution, previous: ExecutionStatus) {
        // No subscriber is not an error.
        let _ = self.sender.send(ExecutionEvent::StatusDidChange {
            execution: Box::new(execution.clone()),
            previous,
        });
    }

    fn on_execution_has_final_data(&self, execution: &Execution) {
        let _ = self
            .sender
            .send(ExecutionEvent::HasFinalData(Box::new(execution.clone())));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl ExecutionListener for NoopListener {
    fn on_execution_status_did_change(&self, _execution: &Execution, _previous: ExecutionStatus) {}

    fn on_execution_has_final_data(&self, _execution: &Execution) {}
}
