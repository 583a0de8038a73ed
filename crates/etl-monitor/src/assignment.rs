//! Bijective runner to execution map.

use etl_core::ExecutionId;
use std::collections::HashMap;

/// What an assignment displaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reassignment {
    /// Execution the runner owned before
    pub previous_execution: Option<ExecutionId>,
    /// Runner that owned the execution before
    pub previous_runner: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunnerAssignments {
    by_runner: HashMap<String, ExecutionId>,
    by_execution: HashMap<ExecutionId, String>,
}

impl RunnerAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `execution` to `runner`, dropping any pairing of either side.
    pub fn assign(&mut self, runner: &str, execution: &ExecutionId) -> Reassignment {
        let mut reassignment = Reassignment::default();
        if self.by_runner.get(runner) == Some(execution) {
            return reassignment;
        }
        if let Some(previous) = self.by_runner.remove(runner) {
            self.by_execution.remove(&previous);
            reassignment.previous_execution = Some(previous);
        }
        if let Some(previous) = self.by_execution.remove(execution) {
            self.by_runner.remove(&previous);
            reassignment.previous_runner = Some(previous);
        }
        self.by_runner.insert(runner.to_string(), execution.clone());
        self.by_execution.insert(execution.clone(), runner.to_string());
        reassignment
    }

    pub fn release_runner(&mut self, runner: &str) -> Option<ExecutionId> {
        let execution = self.by_runner.remove(runner)?;
        self.by_execution.remove(&execution);
        Some(execution)
    }

    pub fn release_execution(&mut self, execution: &ExecutionId) -> Option<String> {
        let runner = self.by_execution.remove(execution)?;
        self.by_runner.remove(&runner);
        Some(runner)
    }

    pub fn execution_of(&self, runner: &str) -> Option<&ExecutionId> {
        self.by_runner.get(runner)
    }

    pub fn runner_of(&self, execution: &ExecutionId) -> Option<&str> {
        self.by_execution.get(execution).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_runner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_runner.is_empty()
    }

    /// Both directions describe the same pairs.
    pub fn is_consistent(&self) -> bool {
        self.by_runner.len() == self.by_execution.len()
            && self
                .by_runner
                .iter()
                .all(|(runner, execution)| self.runner_of(execution) == Some(runner.as_str()))
    }
}
