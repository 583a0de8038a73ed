//! Execution state machine
//!
//! ```text
//! QUEUED ──► RUNNING ──► FINISHED | FAILED | CANCELLED
//!    │
//!    └──► INVALID            (any state) ──► DELETED
//! ```
//!
//! The runner is the only writer of status. The monitor observes committed
//! snapshots and never moves an execution backwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Accepted, not yet picked up by a runner
    Queued,

    /// Loading, mapping or executing components
    Running,

    /// All components executed successfully
    Finished,

    /// A component or the runner itself failed
    Failed,

    /// Stopped after a cancel request
    Cancelled,

    /// Pipeline could not be loaded or parsed
    Invalid,

    /// Tombstoned, waiting for removal
    Deleted,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 7] = [
        ExecutionStatus::Queued,
        ExecutionStatus::Running,
        ExecutionStatus::Finished,
        ExecutionStatus::Failed,
        ExecutionStatus::Cancelled,
        ExecutionStatus::Invalid,
        ExecutionStatus::Deleted,
    ];

    /// True for states the runner will never leave.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Finished
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Invalid
        )
    }

    /// Whether an execution in this state may be observed in `next`.
    ///
    /// Finished executions only accept a tombstone, tombstones accept nothing.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            ExecutionStatus::Deleted => false,
            status if status.is_finished() => next == ExecutionStatus::Deleted,
            _ => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "QUEUED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Finished => "FINISHED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Invalid => "INVALID",
            ExecutionStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExecutionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::internal(format!("Unknown execution status: {}", s)))
    }
}
