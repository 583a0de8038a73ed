//! Lifecycle events reported by the pipeline engine.
//!
//! Every callback of the engine is one variant of a closed enum, grouped by
//! phase. The observer consumes each phase in a single dispatcher.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ComponentError;

/// How a component takes part in this execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run the component
    Execute,
    /// Reuse the outputs of a previous execution
    Map,
    /// Not part of this run
    Skip,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Execute
    }
}

/// A declared input or output port carrying one data unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataUnitPort {
    pub iri: String,
}

impl DataUnitPort {
    pub fn new(iri: impl Into<String>) -> Self {
        Self { iri: iri.into() }
    }
}

/// Where the outputs of a mapped component live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSource {
    pub execution_iri: String,
    pub execution_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineComponent {
    pub iri: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub inputs: Vec<DataUnitPort>,
    #[serde(default)]
    pub outputs: Vec<DataUnitPort>,
    #[serde(default)]
    pub mapped_from: Option<MappingSource>,
}

impl PipelineComponent {
    pub fn execute(iri: impl Into<String>) -> Self {
        Self {
            iri: iri.into(),
            label: None,
            mode: ExecutionMode::Execute,
            inputs: Vec::new(),
            outputs: Vec::new(),
            mapped_from: None,
        }
    }

    pub fn mapped(iri: impl Into<String>, source: MappingSource) -> Self {
        Self {
            mode: ExecutionMode::Map,
            mapped_from: Some(source),
            ..Self::execute(iri)
        }
    }

    pub fn with_output(mut self, iri: impl Into<String>) -> Self {
        self.outputs.push(DataUnitPort::new(iri));
        self
    }

    pub fn with_input(mut self, iri: impl Into<String>) -> Self {
        self.inputs.push(DataUnitPort::new(iri));
        self
    }
}

/// The part of a loaded pipeline the observer needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineModel {
    pub iri: String,
    #[serde(default)]
    pub components: Vec<PipelineComponent>,
}

impl PipelineModel {
    pub fn new(iri: impl Into<String>) -> Self {
        Self {
            iri: iri.into(),
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: PipelineComponent) -> Self {
        self.components.push(component);
        self
    }

    pub fn component(&self, iri: &str) -> Option<&PipelineComponent> {
        self.components.iter().find(|c| c.iri == iri)
    }

    pub fn count(&self, mode: ExecutionMode) -> u32 {
        self.components.iter().filter(|c| c.mode == mode).count() as u32
    }
}

/// Pipeline-level events
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ExecutionBegin,
    PipelineLoaded(PipelineModel),
    /// The definition can't be read or parsed
    CantLoadPipeline(ComponentError),
    CantPreparePipeline(ComponentError),
    DataUnitsLoadingFailed(ComponentError),
    ComponentsLoadingFailed(ComponentError),
    ComponentsExecutionBegin,
    CancelRequested,
    /// Unexpected failure outside of any component
    ExecutionFailed(ComponentError),
    ExecutionEnd,
}

/// Events of a component whose outputs are mapped from another execution
#[derive(Debug, Clone)]
pub enum MappingEvent {
    Begin,
    Successful,
    Failed(ComponentError),
}

/// Events of a component that is executed
#[derive(Debug, Clone)]
pub enum ComponentEvent {
    /// The component jar/implementation could not be loaded
    CantLoadComponent(ComponentError),
    Initializing,
    UserCodeBegin,
    UserCodeSuccessful,
    UserCodeFailed(ComponentError),
    /// Free-form progress reported by the component
    Progress(String),
    CantSaveDataUnit(ComponentError),
    Successful { cancelled: bool },
    Failed(ComponentError),
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Pipeline(PipelineEvent),
    Mapping {
        component: String,
        event: MappingEvent,
    },
    Component {
        component: String,
        event: ComponentEvent,
    },
}

impl LifecycleEvent {
    pub fn component(component: impl Into<String>, event: ComponentEvent) -> Self {
        LifecycleEvent::Component {
            component: component.into(),
            event,
        }
    }

    pub fn mapping(component: impl Into<String>, event: MappingEvent) -> Self {
        LifecycleEvent::Mapping {
            component: component.into(),
            event,
        }
    }
}

impl From<PipelineEvent> for LifecycleEvent {
    fn from(event: PipelineEvent) -> Self {
        LifecycleEvent::Pipeline(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_model_from_json() {
        let model: PipelineModel = serde_json::from_value(serde_json::json!({
            "iri": "http://localhost/pipelines/p",
            "components": [
                {"iri": "http://localhost/c/1", "outputs": [{"iri": "http://localhost/c/1/out"}]},
                {"iri": "http://localhost/c/2", "mode": "map",
                 "mappedFrom": {"executionIri": "http://localhost/executions/e", "executionDir": "/tmp/e"}},
                {"iri": "http://localhost/c/3", "mode": "skip"}
            ]
        }))
        .unwrap();

        assert_eq!(model.count(ExecutionMode::Execute), 1);
        assert_eq!(model.count(ExecutionMode::Map), 1);
        assert_eq!(model.count(ExecutionMode::Skip), 1);
        let mapped = model.component("http://localhost/c/2").unwrap();
        assert_eq!(
            mapped.mapped_from.as_ref().unwrap().execution_dir,
            PathBuf::from("/tmp/e")
        );
    }
}
