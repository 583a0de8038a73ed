//! Execution observer.
//!
//! Turns every lifecycle event of one execution into status updates,
//! message-log appends and snapshot writes. The hosting engine calls it from a
//! single logical sequence, so it needs no internal locking.

use chrono::Utc;
use etl_core::debug::reference_content;
use etl_core::message::{read_log, MessageKind, MessageRecord};
use etl_core::snapshot::SnapshotWriter;
use etl_core::{ExecutionLayout, ExecutionStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::ComponentError;
use crate::events::{
    ComponentEvent, LifecycleEvent, MappingEvent, PipelineComponent, PipelineEvent, PipelineModel,
};
use crate::information::ExecutionInformation;
use crate::message_log::{recover_interrupted_logs, MessageCounter, MessageLog};
use crate::overview::ExecutionOverview;
use crate::status::StatusTracker;

/// Cancellation flag shared with the pipeline engine.
///
/// The engine checks it between component boundaries; nothing is killed.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct ExecutionObserver {
    layout: ExecutionLayout,
    execution_iri: String,
    counter: MessageCounter,
    status: StatusTracker,
    overview: ExecutionOverview,
    information: ExecutionInformation,
    snapshots: SnapshotWriter,
    pipeline_log: MessageLog,
    component_logs: HashMap<String, MessageLog>,
    pipeline: Option<PipelineModel>,
    cancel: Arc<AtomicBool>,
}

impl ExecutionObserver {
    /// Prepare an observer for the execution stored under `layout`.
    ///
    /// Component logs left open by a previous runner are closed first and the
    /// message counter resumes after the highest order on disk.
    pub fn new(layout: ExecutionLayout, execution_iri: impl Into<String>) -> etl_core::Result<Self> {
        let execution_iri = execution_iri.into();
        let recovery = recover_interrupted_logs(&layout)?;
        let pipeline_log = MessageLog::open(layout.pipeline_messages_file())?;
        let cancel = Arc::new(AtomicBool::new(false));

        info!(
            execution = %execution_iri,
            next_order = recovery.next_order,
            "Execution observer ready"
        );

        Ok(Self {
            snapshots: SnapshotWriter::new(layout.overview_file()),
            counter: MessageCounter::starting_at(recovery.next_order),
            status: StatusTracker::new(cancel.clone()),
            overview: ExecutionOverview::new(execution_iri.clone()),
            information: ExecutionInformation::new(execution_iri.clone()),
            pipeline_log,
            component_logs: HashMap::new(),
            pipeline: None,
            layout,
            execution_iri,
            cancel,
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        CancelToken(self.cancel.clone())
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status.status()
    }

    pub fn is_cancelling(&self) -> bool {
        self.status.is_cancelling()
    }

    pub fn is_execution_successful(&self) -> bool {
        self.status.is_execution_successful()
    }

    pub fn information(&self) -> &ExecutionInformation {
        &self.information
    }

    pub fn layout(&self) -> &ExecutionLayout {
        &self.layout
    }

    /// Components whose message log has not been closed yet.
    pub fn open_components(&self) -> Vec<&str> {
        let mut open: Vec<&str> = self.component_logs.keys().map(String::as_str).collect();
        open.sort_unstable();
        open
    }

    /// Records of one component log as currently on disk.
    pub fn component_messages(&self, component: &str) -> etl_core::Result<Vec<MessageRecord>> {
        Ok(read_log(&self.layout.component_messages_file(component))?.records)
    }

    pub fn observe(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Pipeline(event) => self.on_pipeline(event),
            LifecycleEvent::Mapping { component, event } => self.on_mapping(&component, event),
            LifecycleEvent::Component { component, event } => self.on_component(&component, event),
        }
    }

    pub fn on_pipeline(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::ExecutionBegin => {
                self.status.on_execution_begin();
                self.overview.on_execution_begin(Utc::now());
                self.pipeline_message(MessageKind::ExecutionBegin, None);
                self.save_state();
            }
            PipelineEvent::PipelineLoaded(pipeline) => {
                self.overview.on_pipeline_loaded(&pipeline);
                self.information.on_pipeline_loaded(&pipeline);
                debug!(
                    pipeline = %pipeline.iri,
                    components = pipeline.components.len(),
                    "Pipeline loaded"
                );
                self.pipeline = Some(pipeline);
                self.save_state();
            }
            PipelineEvent::CantLoadPipeline(err) => {
                error!(error = %err, "Can't load pipeline");
                self.status.on_invalid_pipeline();
                self.pipeline_message(MessageKind::ExecutionFailed, Some(&err));
                self.save_state();
            }
            PipelineEvent::CantPreparePipeline(err)
            | PipelineEvent::DataUnitsLoadingFailed(err)
            | PipelineEvent::ComponentsLoadingFailed(err)
            | PipelineEvent::ExecutionFailed(err) => {
                error!(error = %err, "Execution failed");
                self.status.on_failure();
                self.pipeline_message(MessageKind::ExecutionFailed, Some(&err));
            }
            PipelineEvent::ComponentsExecutionBegin => {
                self.status.on_components_execution_begin();
            }
            PipelineEvent::CancelRequested => {
                info!(execution = %self.execution_iri, "Cancel requested");
                self.status.on_cancel_request();
                self.pipeline_message(MessageKind::ExecutionCancelling, None);
                self.write_snapshot();
            }
            PipelineEvent::ExecutionEnd => self.on_execution_end(),
        }
    }

    pub fn on_mapping(&mut self, component: &str, event: MappingEvent) {
        let now = Utc::now();
        match event {
            MappingEvent::Begin => {
                self.information.on_component_begin(component, now);
                self.component_message(component, MessageKind::ComponentBegin, None);
                self.save_state();
            }
            MappingEvent::Successful => {
                if let Some(definition) = self.pipeline_component(component) {
                    if let Err(err) = self.reference_mapped_outputs(&definition) {
                        error!(component, error = %err, "Can't reference mapped debug data");
                        self.status.on_failure();
                    }
                }
                self.overview.on_component_mapped();
                self.information.on_component_mapped(component, now);
                self.component_message(component, MessageKind::ComponentEnd, None);
                self.close_component_log(component);
                self.save_state();
            }
            MappingEvent::Failed(err) => self.on_component_failed(component, &err),
        }
    }

    pub fn on_component(&mut self, component: &str, event: ComponentEvent) {
        match event {
            ComponentEvent::CantLoadComponent(err) => self.on_component_failed(component, &err),
            ComponentEvent::Initializing => {
                self.information.on_component_begin(component, Utc::now());
                self.component_message(component, MessageKind::ComponentBegin, None);
                self.save_state();
            }
            ComponentEvent::UserCodeBegin => {
                self.component_message(component, MessageKind::UserCodeBegin, None);
            }
            ComponentEvent::UserCodeSuccessful => {
                self.component_message(component, MessageKind::UserCodeSuccessful, None);
            }
            ComponentEvent::UserCodeFailed(err) => {
                self.component_message(component, MessageKind::UserCodeFailed, Some(&err));
            }
            ComponentEvent::Progress(message) => {
                let record = self
                    .record(MessageKind::ComponentProgress)
                    .with_component(component)
                    .with_message(message);
                self.append_component(component, record);
            }
            ComponentEvent::CantSaveDataUnit(err) => {
                warn!(component, error = %err, "Can't save data unit");
                self.status.on_failure();
                self.component_message(component, MessageKind::DataUnitSaveFailed, Some(&err));
            }
            ComponentEvent::Successful { cancelled } => {
                self.overview.on_component_executed();
                self.information
                    .on_component_end(component, cancelled, Utc::now());
                self.component_message(component, MessageKind::ComponentEnd, None);
                self.close_component_log(component);
                self.save_state();
            }
            ComponentEvent::Failed(err) => self.on_component_failed(component, &err),
        }
    }

    fn on_component_failed(&mut self, component: &str, err: &ComponentError) {
        error!(component, error = %err, "Component failed");
        self.status.on_failure();
        self.information.on_component_failed(component, Utc::now());
        self.component_message(component, MessageKind::ComponentFailed, Some(err));
        self.close_component_log(component);
        self.save_state();
    }

    fn on_execution_end(&mut self) {
        let status = self.status.on_execution_end();
        self.pipeline_message(MessageKind::ExecutionEnd, None);

        if !self.component_logs.is_empty() {
            error!(
                components = ?self.open_components(),
                "Some components were not closed"
            );
            let open: Vec<String> = self.component_logs.keys().cloned().collect();
            for component in open {
                self.close_component_log(&component);
            }
        }
        if let Err(e) = self.pipeline_log.close() {
            error!(error = %e, "Can't save pipeline messages");
        }

        let directory_size = match etl_core::fs::directory_size(self.layout.root()) {
            Ok(size) => Some(size),
            Err(e) => {
                warn!(error = %e, "Can't compute execution directory size");
                None
            }
        };
        self.overview.on_execution_end(Utc::now(), directory_size);
        self.save_state();
        info!(execution = %self.execution_iri, status = %status, "Execution finished");
    }

    fn pipeline_component(&self, component: &str) -> Option<PipelineComponent> {
        self.pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.component(component))
            .cloned()
    }

    /// Point the debug data of each output at the execution it is mapped from.
    fn reference_mapped_outputs(&self, component: &PipelineComponent) -> etl_core::Result<()> {
        let Some(source) = &component.mapped_from else {
            return Ok(());
        };
        let source_layout = ExecutionLayout::new(&source.execution_dir);
        for output in &component.outputs {
            reference_content(
                &source_layout.data_unit_dir(&output.iri),
                &self.layout.data_unit_dir(&output.iri),
                &source.execution_iri,
            )?;
        }
        Ok(())
    }

    fn record(&self, kind: MessageKind) -> MessageRecord {
        MessageRecord::new(self.counter.next(), kind)
    }

    fn failure_record(&self, kind: MessageKind, err: Option<&ComponentError>) -> MessageRecord {
        let record = self.record(kind);
        match err {
            Some(err) => record
                .with_message(err.message.clone())
                .with_cause(err.cause.clone()),
            None => record,
        }
    }

    fn pipeline_message(&mut self, kind: MessageKind, err: Option<&ComponentError>) {
        let record = self.failure_record(kind, err);
        if let Err(e) = self.pipeline_log.append(&record) {
            error!(error = %e, "Can't save pipeline message");
            self.status.on_failure();
        }
    }

    fn component_message(&mut self, component: &str, kind: MessageKind, err: Option<&ComponentError>) {
        let record = self.failure_record(kind, err).with_component(component);
        self.append_component(component, record);
    }

    fn append_component(&mut self, component: &str, record: MessageRecord) {
        if !self.component_logs.contains_key(component) {
            match MessageLog::open(self.layout.component_messages_file(component)) {
                Ok(log) => {
                    self.component_logs.insert(component.to_string(), log);
                }
                Err(e) => {
                    error!(component, error = %e, "Can't open component message log");
                    self.status.on_failure();
                    return;
                }
            }
        }
        if let Some(log) = self.component_logs.get_mut(component) {
            if let Err(e) = log.append(&record) {
                error!(component, error = %e, "Can't save component message");
                self.status.on_failure();
            }
        }
    }

    /// Flush and release a component log; a failed flush is only reported.
    fn close_component_log(&mut self, component: &str) {
        if let Some(mut log) = self.component_logs.remove(component) {
            if let Err(e) = log.close() {
                error!(component, error = %e, "Can't save component messages");
            }
        }
    }

    fn save_state(&mut self) {
        self.information.status = self.status.status();
        if let Err(e) = self.information.save(&self.layout.information_file()) {
            error!(error = %e, "Can't save execution information");
        }
        self.write_snapshot();
    }

    fn write_snapshot(&mut self) {
        let snapshot = self
            .overview
            .snapshot(self.status.status(), self.status.is_cancelling());
        self.snapshots.write(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MappingSource, PipelineComponent};
    use etl_core::debug::DebugReference;
    use etl_core::ProgressSnapshot;
    use tempfile::tempdir;

    fn snapshot(layout: &ExecutionLayout) -> ProgressSnapshot {
        ProgressSnapshot::read(&layout.overview_file()).unwrap()
    }

    fn pipeline() -> PipelineModel {
        PipelineModel::new("http://localhost/pipelines/p")
            .with_component(PipelineComponent::execute("http://localhost/c/extract"))
            .with_component(PipelineComponent::execute("http://localhost/c/load"))
    }

    #[test]
    fn test_successful_execution() {
        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        let mut observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();

        observer.observe(PipelineEvent::ExecutionBegin.into());
        assert_eq!(snapshot(&layout).status, ExecutionStatus::Running);

        observer.observe(PipelineEvent::PipelineLoaded(pipeline()).into());
        observer.observe(PipelineEvent::ComponentsExecutionBegin.into());
        for component in ["http://localhost/c/extract", "http://localhost/c/load"] {
            observer.observe(LifecycleEvent::component(component, ComponentEvent::Initializing));
            observer.observe(LifecycleEvent::component(component, ComponentEvent::UserCodeBegin));
            observer.observe(LifecycleEvent::component(
                component,
                ComponentEvent::Progress("half way".to_string()),
            ));
            observer.observe(LifecycleEvent::component(
                component,
                ComponentEvent::UserCodeSuccessful,
            ));
            observer.observe(LifecycleEvent::component(
                component,
                ComponentEvent::Successful { cancelled: false },
            ));
        }
        observer.observe(PipelineEvent::ExecutionEnd.into());

        assert_eq!(observer.status(), ExecutionStatus::Finished);
        assert!(observer.open_components().is_empty());

        let last = snapshot(&layout);
        assert_eq!(last.status, ExecutionStatus::Finished);
        assert!(last.execution_finished.is_some());
        assert!(last.directory_size.is_some());
        let progress = last.pipeline_progress.unwrap();
        assert_eq!(progress.current, 2);
        assert_eq!(progress.total, 2);

        let messages = observer
            .component_messages("http://localhost/c/load")
            .unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages.last().unwrap().kind, MessageKind::ComponentEnd);

        // Pipeline and component records share one counter.
        let pipeline_log = read_log(&layout.pipeline_messages_file()).unwrap();
        let extract = observer
            .component_messages("http://localhost/c/extract")
            .unwrap();
        let mut orders: Vec<u64> = pipeline_log
            .records
            .iter()
            .chain(extract.iter())
            .chain(messages.iter())
            .map(|r| r.order)
            .collect();
        orders.sort_unstable();
        orders.dedup();
        assert_eq!(orders.len(), 12);
    }

    #[test]
    fn test_component_failure_fails_execution() {
        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        let mut observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();

        observer.observe(PipelineEvent::ExecutionBegin.into());
        observer.observe(PipelineEvent::PipelineLoaded(pipeline()).into());
        observer.observe(LifecycleEvent::component(
            "http://localhost/c/extract",
            ComponentEvent::Initializing,
        ));
        observer.observe(LifecycleEvent::component(
            "http://localhost/c/extract",
            ComponentEvent::Failed(ComponentError::new("Source unreachable").with_cause("timeout")),
        ));
        assert!(!observer.is_execution_successful());
        observer.observe(PipelineEvent::ExecutionEnd.into());

        assert_eq!(snapshot(&layout).status, ExecutionStatus::Failed);
        let messages = observer
            .component_messages("http://localhost/c/extract")
            .unwrap();
        let failed = messages.last().unwrap();
        assert_eq!(failed.kind, MessageKind::ComponentFailed);
        assert_eq!(failed.message.as_deref(), Some("Source unreachable"));
        assert_eq!(failed.cause.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_invalid_pipeline() {
        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        let mut observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();

        observer.observe(PipelineEvent::ExecutionBegin.into());
        let before = std::fs::read(layout.overview_file()).unwrap();
        observer.observe(PipelineEvent::CantLoadPipeline(ComponentError::new("Bad definition")).into());

        // Written right away, before the engine reports the end.
        assert_ne!(std::fs::read(layout.overview_file()).unwrap(), before);
        let invalid = snapshot(&layout);
        assert!(!invalid.cancelling);
        assert!(invalid.pipeline_progress.is_none());
        assert!(!observer.is_execution_successful());
        let information: serde_json::Value =
            serde_json::from_slice(&std::fs::read(layout.information_file()).unwrap()).unwrap();
        assert!(information.is_object());

        observer.observe(PipelineEvent::ExecutionEnd.into());

        let last = snapshot(&layout);
        assert_eq!(last.status, ExecutionStatus::Invalid);
        assert!(last.pipeline_progress.is_none());
    }

    #[test]
    fn test_cancel_request() {
        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        let mut observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();
        let token = observer.cancel_token();

        observer.observe(PipelineEvent::ExecutionBegin.into());
        observer.observe(PipelineEvent::PipelineLoaded(pipeline()).into());
        assert!(!token.is_cancelled());

        observer.observe(PipelineEvent::CancelRequested.into());
        assert!(token.is_cancelled());
        let cancelling = snapshot(&layout);
        assert_eq!(cancelling.status, ExecutionStatus::Running);
        assert!(cancelling.cancelling);

        observer.observe(LifecycleEvent::component(
            "http://localhost/c/extract",
            ComponentEvent::Successful { cancelled: true },
        ));
        observer.observe(PipelineEvent::ExecutionEnd.into());

        let last = snapshot(&layout);
        assert_eq!(last.status, ExecutionStatus::Cancelled);
        assert!(!last.cancelling);
    }

    #[test]
    fn test_end_closes_open_component_logs() {
        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        let mut observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();

        observer.observe(PipelineEvent::ExecutionBegin.into());
        observer.observe(LifecycleEvent::component(
            "http://localhost/c/extract",
            ComponentEvent::Initializing,
        ));
        assert_eq!(observer.open_components(), vec!["http://localhost/c/extract"]);

        observer.observe(PipelineEvent::ExecutionEnd.into());
        assert!(observer.open_components().is_empty());
        // An unclosed log is an anomaly, not a failure.
        assert_eq!(snapshot(&layout).status, ExecutionStatus::Finished);
    }

    #[test]
    fn test_mapping_references_source_debug_data() {
        let source_dir = tempdir().unwrap();
        let source = ExecutionLayout::new(source_dir.path());
        let output = "http://localhost/c/extract/output";
        std::fs::create_dir_all(source.data_unit_dir(output)).unwrap();
        DebugReference::local(vec!["debug".into()])
            .write(&source.data_unit_dir(output))
            .unwrap();

        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        let mut observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/2").unwrap();
        let mapped = PipelineComponent::mapped(
            "http://localhost/c/extract",
            MappingSource {
                execution_iri: "http://localhost/e/1".to_string(),
                execution_dir: source_dir.path().to_path_buf(),
            },
        )
        .with_output(output);
        let pipeline = PipelineModel::new("http://localhost/pipelines/p").with_component(mapped);

        observer.observe(PipelineEvent::ExecutionBegin.into());
        observer.observe(PipelineEvent::PipelineLoaded(pipeline).into());
        observer.observe(LifecycleEvent::mapping(
            "http://localhost/c/extract",
            MappingEvent::Begin,
        ));
        observer.observe(LifecycleEvent::mapping(
            "http://localhost/c/extract",
            MappingEvent::Successful,
        ));
        observer.observe(PipelineEvent::ExecutionEnd.into());

        let reference = DebugReference::read(&layout.data_unit_dir(output)).unwrap();
        assert_eq!(
            reference.directories,
            vec![source.data_unit_dir(output).join("debug")]
        );
        assert_eq!(
            reference.mapped_from_execution.as_deref(),
            Some("http://localhost/e/1")
        );
        let last = snapshot(&layout);
        assert_eq!(last.status, ExecutionStatus::Finished);
        assert_eq!(last.pipeline_progress.unwrap().current_mapped, Some(1));
    }

    #[test]
    fn test_restart_resumes_counter() {
        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        {
            let mut observer =
                ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();
            observer.observe(PipelineEvent::ExecutionBegin.into());
            observer.observe(LifecycleEvent::component(
                "http://localhost/c/extract",
                ComponentEvent::Initializing,
            ));
        }

        let observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();
        let messages = observer
            .component_messages("http://localhost/c/extract")
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].kind, MessageKind::ComponentFailed);
        assert_eq!(observer.counter.peek(), 3);
    }

    #[test]
    fn test_restart_after_torn_pipeline_record() {
        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        {
            let mut observer =
                ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();
            observer.observe(PipelineEvent::ExecutionBegin.into());
        }
        let mut raw = std::fs::OpenOptions::new()
            .append(true)
            .open(layout.pipeline_messages_file())
            .unwrap();
        std::io::Write::write_all(&mut raw, br#"{"order":1,"ki"#).unwrap();
        drop(raw);

        let mut observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();
        observer.observe(PipelineEvent::ExecutionBegin.into());
        observer.observe(PipelineEvent::ExecutionEnd.into());

        let records: Vec<(u64, MessageKind)> = read_log(&layout.pipeline_messages_file())
            .unwrap()
            .records
            .into_iter()
            .map(|r| (r.order, r.kind))
            .collect();
        assert_eq!(
            records,
            vec![
                (0, MessageKind::ExecutionBegin),
                (1, MessageKind::ExecutionBegin),
                (2, MessageKind::ExecutionEnd),
            ]
        );
    }

    #[test]
    fn test_components_sharing_last_segment_keep_separate_logs() {
        let dir = tempdir().unwrap();
        let layout = ExecutionLayout::new(dir.path());
        let mut observer = ExecutionObserver::new(layout.clone(), "http://localhost/e/1").unwrap();
        let first = "http://localhost/a/load";
        let second = "http://localhost/b/load";

        observer.observe(PipelineEvent::ExecutionBegin.into());
        for component in [first, second] {
            observer.observe(LifecycleEvent::component(component, ComponentEvent::Initializing));
            observer.observe(LifecycleEvent::component(
                component,
                ComponentEvent::Successful { cancelled: false },
            ));
        }
        observer.observe(PipelineEvent::ExecutionEnd.into());

        for component in [first, second] {
            let messages = observer.component_messages(component).unwrap();
            assert_eq!(messages.len(), 2);
            assert!(messages
                .iter()
                .all(|m| m.component.as_deref() == Some(component)));
        }
    }
}
