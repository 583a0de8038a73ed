//! Per-component execution information (`execution/execution.json`).

use chrono::{DateTime, Utc};
use etl_core::fs::write_json_atomic;
use etl_core::ExecutionStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::events::{ExecutionMode, PipelineModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Queued,
    Mapped,
    Running,
    Finished,
    Failed,
    Cancelled,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInformation {
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
}

impl ComponentInformation {
    fn new(state: ComponentState) -> Self {
        Self {
            state,
            started: None,
            finished: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInformation {
    pub execution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    pub status: ExecutionStatus,
    pub components: BTreeMap<String, ComponentInformation>,
}

impl ExecutionInformation {
    pub fn new(execution: impl Into<String>) -> Self {
        Self {
            execution: execution.into(),
            pipeline: None,
            status: ExecutionStatus::Queued,
            components: BTreeMap::new(),
        }
    }

    pub fn on_pipeline_loaded(&mut self, pipeline: &PipelineModel) {
        self.pipeline = Some(pipeline.iri.clone());
        for component in &pipeline.components {
            let state = match component.mode {
                ExecutionMode::Skip => ComponentState::Skipped,
                _ => ComponentState::Queued,
            };
            self.components
                .insert(component.iri.clone(), ComponentInformation::new(state));
        }
    }

    fn entry(&mut self, component: &str) -> &mut ComponentInformation {
        self.components
            .entry(component.to_string())
            .or_insert_with(|| ComponentInformation::new(ComponentState::Queued))
    }

    pub fn on_component_begin(&mut self, component: &str, now: DateTime<Utc>) {
        let info = self.entry(component);
        info.state = ComponentState::Running;
        info.started = Some(now);
    }

    pub fn on_component_mapped(&mut self, component: &str, now: DateTime<Utc>) {
        let info = self.entry(component);
        info.state = ComponentState::Mapped;
        info.finished = Some(now);
    }

    pub fn on_component_end(&mut self, component: &str, cancelled: bool, now: DateTime<Utc>) {
        let info = self.entry(component);
        info.state = if cancelled {
            ComponentState::Cancelled
        } else {
            ComponentState::Finished
        };
        info.finished = Some(now);
    }

    pub fn on_component_failed(&mut self, component: &str, now: DateTime<Utc>) {
        let info = self.entry(component);
        info.state = ComponentState::Failed;
        info.finished = Some(now);
    }

    pub fn state(&self, component: &str) -> Option<ComponentState> {
        self.components.get(component).map(|info| info.state)
    }

    pub fn save(&self, path: &Path) -> etl_core::Result<()> {
        write_json_atomic(path, self)
    }
}
