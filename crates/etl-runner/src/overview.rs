//! In-memory overview the progress snapshot is projected from.

use chrono::{DateTime, Duration, Utc};
use etl_core::{ExecutionStatus, PipelineProgress, ProgressSnapshot};

use crate::events::{ExecutionMode, PipelineModel};

#[derive(Debug, Clone)]
pub struct ExecutionOverview {
    execution: String,
    pipeline: Option<String>,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    progress: PipelineProgress,
    directory_size: Option<u64>,
    last_change: Option<DateTime<Utc>>,
}

impl ExecutionOverview {
    pub fn new(execution: impl Into<String>) -> Self {
        Self {
            execution: execution.into(),
            pipeline: None,
            started: None,
            finished: None,
            progress: PipelineProgress::default(),
            directory_size: None,
            last_change: None,
        }
    }

    pub fn progress(&self) -> &PipelineProgress {
        &self.progress
    }

    pub fn on_execution_begin(&mut self, now: DateTime<Utc>) {
        self.started.get_or_insert(now);
    }

    pub fn on_pipeline_loaded(&mut self, pipeline: &PipelineModel) {
        self.pipeline = Some(pipeline.iri.clone());
        let mapped = pipeline.count(ExecutionMode::Map);
        self.progress = PipelineProgress {
            current: 0,
            total: pipeline.count(ExecutionMode::Execute) + mapped,
            total_map: Some(mapped),
            current_mapped: Some(0),
            current_executed: Some(0),
        };
    }

    pub fn on_component_mapped(&mut self) {
        self.progress.current += 1;
        *self.progress.current_mapped.get_or_insert(0) += 1;
    }

    pub fn on_component_executed(&mut self) {
        self.progress.current += 1;
        *self.progress.current_executed.get_or_insert(0) += 1;
    }

    pub fn on_execution_end(&mut self, now: DateTime<Utc>, directory_size: Option<u64>) {
        self.finished = Some(now);
        self.directory_size = directory_size;
    }

    /// Project the overview into a new snapshot.
    ///
    /// `lastChange` strictly increases between calls so the monitor can tell
    /// two snapshots apart even when they are written within one clock tick.
    pub fn snapshot(&mut self, status: ExecutionStatus, cancelling: bool) -> ProgressSnapshot {
        let mut now = Utc::now();
        if let Some(last) = self.last_change {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_change = Some(now);
        ProgressSnapshot {
            execution: self.execution.clone(),
            status,
            cancelling,
            pipeline: self.pipeline.clone(),
            execution_started: self.started,
            execution_finished: self.finished,
            last_change: now,
            pipeline_progress: self
                .pipeline
                .as_ref()
                .map(|_| self.progress.clone()),
            directory_size: self.directory_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MappingSource, PipelineComponent};

    #[test]
    fn test_progress_counters() {
        let pipeline = PipelineModel::new("http://p")
            .with_component(PipelineComponent::execute("http://c/1"))
            .with_component(PipelineComponent::mapped(
                "http://c/2",
                MappingSource {
                    execution_iri: "http://e".to_string(),
                    execution_dir: "/tmp/e".into(),
                },
            ));
        let mut overview = ExecutionOverview::new("http://e/1");
        overview.on_pipeline_loaded(&pipeline);
        overview.on_component_mapped();
        overview.on_component_executed();

        let progress = overview.progress();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.total_map, Some(1));
        assert_eq!(progress.current, 2);
        assert_eq!(progress.current_mapped, Some(1));
        assert_eq!(progress.current_executed, Some(1));
    }

    #[test]
    fn test_last_change_strictly_increases() {
        let mut overview = ExecutionOverview::new("http://e/1");
        let mut previous = overview.snapshot(ExecutionStatus::Running, false).last_change;
        for _ in 0..100 {
            let next = overview.snapshot(ExecutionStatus::Running, false).last_change;
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_no_progress_before_pipeline_is_loaded() {
        let mut overview = ExecutionOverview::new("http://e/1");
        assert!(overview
            .snapshot(ExecutionStatus::Running, false)
            .pipeline_progress
            .is_none());
    }
}
