//! Execution registry.
//!
//! Owns every execution the monitor knows about together with the runner
//! assignment map and the reserved identifiers. All of it sits behind one
//! coarse lock shared by the reconciliation loop and request handlers.

use chrono::{DateTime, Utc};
use etl_core::debug::reference_content;
use etl_core::fs::{copy_dir_recursive, write_json_atomic};
use etl_core::layout::DEBUG_FILE;
use etl_core::snapshot::SnapshotWriter;
use etl_core::{ExecutionId, ExecutionLayout, MessageRecord, ProgressSnapshot};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::assignment::RunnerAssignments;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::execution::Execution;
use crate::gc::{DirectoryRemover, GarbageCollector};
use crate::listener::ExecutionListener;
use crate::messages;
use crate::metrics::MonitorMetrics;

/// User supplied input file of a new execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInput {
    pub name: String,
    pub content: Vec<u8>,
}

impl ExecutionInput {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(MonitorError::InvalidInput(format!(
                "Invalid input file name: {:?}",
                self.name
            )));
        }
        Ok(())
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Executions that picked up a new snapshot
    pub updated: usize,
    /// Tombstones dropped from the registry
    pub purged: Vec<ExecutionId>,
    pub removed_directories: Vec<PathBuf>,
    /// Directories left for the next pass
    pub pending_directories: usize,
}

impl ReconcileReport {
    pub fn is_idle(&self) -> bool {
        self.updated == 0 && self.purged.is_empty() && self.removed_directories.is_empty()
    }
}

#[derive(Default)]
struct RegistryState {
    executions: BTreeMap<ExecutionId, Execution>,
    reserved: HashSet<ExecutionId>,
    assignments: RunnerAssignments,
    sequence: u64,
}

impl RegistryState {
    /// Hand out an identifier no other execution has or is about to get.
    fn reserve_id(&mut self, working_directory: &Path) -> ExecutionId {
        loop {
            self.sequence += 1;
            let id = ExecutionId::generate(self.sequence);
            if self.reserved.contains(&id)
                || self.executions.contains_key(&id)
                || working_directory.join(id.as_str()).exists()
            {
                continue;
            }
            self.reserved.insert(id.clone());
            return id;
        }
    }
}

pub struct ExecutionRegistry {
    config: MonitorConfig,
    state: Mutex<RegistryState>,
    gc: GarbageCollector,
    listener: Arc<dyn ExecutionListener>,
    metrics: MonitorMetrics,
}

impl ExecutionRegistry {
    pub fn new(
        config: MonitorConfig,
        listener: Arc<dyn ExecutionListener>,
        remover: Arc<dyn DirectoryRemover>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            state: Mutex::new(RegistryState::default()),
            gc: GarbageCollector::new(remover),
            listener,
            metrics: MonitorMetrics::new()?,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    /// Discover executions stored in the working directory.
    ///
    /// A directory that can't be loaded is logged and left out.
    #[instrument(skip(self), fields(working_directory = %self.config.working_directory.display()))]
    pub async fn load_all(&self) -> Result<usize> {
        let root = &self.config.working_directory;
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| MonitorError::WorkingDirectory {
                path: root.clone(),
                source,
            })?;

        let mut loaded = Vec::new();
        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let id = ExecutionId::from_name(entry.file_name().to_string_lossy().into_owned());
            match self.load_execution(id, path.clone()).await {
                Ok(execution) => loaded.push(execution),
                Err(e) => error!(path = %path.display(), error = %e, "Can't load execution"),
            }
        }

        let mut state = self.state.lock().await;
        let mut count = 0;
        for execution in loaded {
            if state.executions.contains_key(execution.id()) {
                continue;
            }
            state.executions.insert(execution.id().clone(), execution);
            count += 1;
        }
        self.metrics.set_tracked(state.executions.len());
        info!(count, "Executions loaded");
        Ok(count)
    }

    async fn load_execution(&self, id: ExecutionId, directory: PathBuf) -> Result<Execution> {
        let layout = ExecutionLayout::new(&directory);
        migrate_layout(&layout).await?;

        let bytes = tokio::fs::read(layout.overview_file())
            .await
            .map_err(|e| MonitorError::cannot_load(&directory, e))?;
        let overview = ProgressSnapshot::from_slice(&bytes)
            .map_err(|e| MonitorError::cannot_load(&directory, e))?;

        let pipeline = match tokio::fs::read(layout.definition_file()).await {
            Ok(bytes) => Some(
                serde_json::from_slice::<Value>(&bytes)
                    .map_err(|e| MonitorError::cannot_load(&directory, e))?,
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(MonitorError::cannot_load(&directory, e)),
        };

        let iri = self.config.execution_iri(&id);
        let mut execution = Execution::new(id, iri, directory, overview, pipeline);
        execution.reload_debug_data();
        debug!(execution_id = %execution.id(), status = %execution.status(), "Execution loaded");
        Ok(execution)
    }

    /// Register a new `QUEUED` execution.
    #[instrument(skip(self, definition, inputs), fields(input_count = inputs.len()))]
    pub async fn create_execution(
        &self,
        definition: Value,
        inputs: Vec<ExecutionInput>,
    ) -> Result<Execution> {
        for input in &inputs {
            input.validate()?;
        }
        let id = self.reserve_id().await;
        let iri = self.config.execution_iri(&id);
        let snapshot = ProgressSnapshot::queued(iri.clone(), pipeline_iri(&definition));

        let result = {
            let definition = definition.clone();
            let snapshot = snapshot.clone();
            self.materialize(&id, move |layout| {
                write_new_execution(layout, &definition, &inputs, &snapshot)
            })
            .await
        };

        self.register(id, iri, snapshot, Some(definition), result)
            .await
    }

    /// Register a new execution reusing the pipeline and inputs of `source`.
    ///
    /// Debug data of the new execution references the source directories;
    /// nothing of the source is modified.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn clone_execution(&self, source: &ExecutionId) -> Result<Execution> {
        let (source_layout, source_iri, definition) = {
            let state = self.state.lock().await;
            let execution = state
                .executions
                .get(source)
                .filter(|execution| !execution.is_tombstoned())
                .ok_or_else(|| MonitorError::ExecutionNotFound(source.to_string()))?;
            (
                execution.layout(),
                execution.iri().to_string(),
                execution.pipeline().cloned(),
            )
        };

        let id = self.reserve_id().await;
        let iri = self.config.execution_iri(&id);
        let snapshot = ProgressSnapshot::queued(
            iri.clone(),
            definition.as_ref().and_then(pipeline_iri),
        );

        let result = {
            let snapshot = snapshot.clone();
            self.materialize(&id, move |layout| {
                write_cloned_execution(layout, &source_layout, &source_iri, &snapshot)
            })
            .await
        };

        self.register(id, iri, snapshot, definition, result).await
    }

    async fn reserve_id(&self) -> ExecutionId {
        let mut state = self.state.lock().await;
        state.reserve_id(&self.config.working_directory)
    }

    /// Create the execution directory and fill it with `build`.
    ///
    /// A directory left behind by a failed `build` is removed.
    async fn materialize<F>(&self, id: &ExecutionId, build: F) -> Result<()>
    where
        F: FnOnce(&ExecutionLayout) -> Result<()> + Send + 'static,
    {
        let layout = ExecutionLayout::new(self.config.working_directory.join(id.as_str()));
        tokio::fs::create_dir_all(&self.config.working_directory)
            .await
            .map_err(|source| MonitorError::WorkingDirectory {
                path: self.config.working_directory.clone(),
                source,
            })?;
        tokio::fs::create_dir(layout.root()).await?;

        let result = {
            let layout = layout.clone();
            tokio::task::spawn_blocking(move || build(&layout))
                .await
                .map_err(|e| MonitorError::Internal(e.to_string()))
                .and_then(|result| result)
        };
        if let Err(e) = &result {
            warn!(execution_id = %id, error = %e, "Can't create execution directory");
            if let Err(e) = tokio::fs::remove_dir_all(layout.root()).await {
                error!(path = %layout.root().display(), error = %e, "Can't remove partial execution directory");
            }
        }
        result
    }

    async fn register(
        &self,
        id: ExecutionId,
        iri: String,
        snapshot: ProgressSnapshot,
        definition: Option<Value>,
        materialized: Result<()>,
    ) -> Result<Execution> {
        let mut state = self.state.lock().await;
        state.reserved.remove(&id);
        materialized?;

        let directory = self.config.working_directory.join(id.as_str());
        let mut execution = Execution::new(id.clone(), iri, directory, snapshot, definition);
        execution.reload_debug_data();
        state.executions.insert(id.clone(), execution.clone());
        self.metrics.set_tracked(state.executions.len());
        info!(execution_id = %id, "Execution created");
        Ok(execution)
    }

    /// Tombstone an execution and queue its directory for removal.
    ///
    /// Returns `false` when the execution is unknown or already deleted.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &ExecutionId) -> bool {
        let directory = {
            let mut state = self.state.lock().await;
            let Some(execution) = state.executions.get_mut(id) else {
                debug!(execution_id = %id, "Nothing to delete");
                return false;
            };
            if execution.is_tombstoned() {
                return false;
            }
            let previous = execution.tombstone(Utc::now(), self.config.tombstone_ttl());
            self.metrics.status_changed();
            self.listener
                .on_execution_status_did_change(execution, previous);
            info!(execution_id = %id, previous = %previous, "Execution deleted");
            execution.directory().to_path_buf()
        };
        self.gc.schedule(directory).await;
        true
    }

    /// Re-read the snapshot of one execution. Returns whether it changed.
    #[instrument(skip(self))]
    pub async fn update(&self, id: &ExecutionId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let execution = state
            .executions
            .get_mut(id)
            .ok_or_else(|| MonitorError::ExecutionNotFound(id.to_string()))?;
        Ok(self.refresh(execution).await)
    }

    /// Apply the snapshot on disk if it is newer than the cached one.
    ///
    /// Notifications fire once per observed change; an unchanged
    /// `lastChange` means there is nothing new.
    async fn refresh(&self, execution: &mut Execution) -> bool {
        if !execution.needs_update() {
            return false;
        }
        let path = execution.layout().overview_file();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => match ProgressSnapshot::from_slice(&bytes) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(execution_id = %execution.id(), error = %e, "Can't parse execution overview");
                    return false;
                }
            },
            Err(e) => {
                warn!(execution_id = %execution.id(), error = %e, "Can't read execution overview");
                return false;
            }
        };

        if snapshot.last_change == execution.overview().last_change {
            return false;
        }
        if !execution.status().can_transition_to(snapshot.status) {
            warn!(
                execution_id = %execution.id(),
                from = %execution.status(),
                to = %snapshot.status,
                "Ignoring snapshot with invalid status transition"
            );
            return false;
        }

        let previous = execution.apply_snapshot(snapshot);
        if previous != execution.status() {
            info!(
                execution_id = %execution.id(),
                from = %previous,
                to = %execution.status(),
                "Execution status changed"
            );
            self.metrics.status_changed();
            self.listener
                .on_execution_status_did_change(execution, previous);
        }
        if execution.status().is_finished() {
            execution.mark_final_data();
            self.listener.on_execution_has_final_data(execution);
        }
        true
    }

    pub async fn get_executions(&self) -> Vec<Execution> {
        let state = self.state.lock().await;
        state.executions.values().cloned().collect()
    }

    pub async fn get_execution_by_id(&self, id: &ExecutionId) -> Option<Execution> {
        let state = self.state.lock().await;
        state.executions.get(id).cloned()
    }

    pub async fn get_execution_by_iri(&self, iri: &str) -> Option<Execution> {
        let state = self.state.lock().await;
        state
            .executions
            .values()
            .find(|execution| execution.iri() == iri)
            .cloned()
    }

    /// A runner reports it works on `id`.
    #[instrument(skip(self))]
    pub async fn on_runner_has_execution(&self, runner: &str, id: &ExecutionId) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.executions.contains_key(id) {
            warn!(runner, execution_id = %id, "Runner reports unknown execution");
            return Err(MonitorError::ExecutionNotFound(id.to_string()));
        }

        let reassignment = state.assignments.assign(runner, id);
        if let Some(previous) = &reassignment.previous_execution {
            if let Some(execution) = state.executions.get_mut(previous) {
                execution.release_runner();
            }
            info!(runner, from = %previous, to = %id, "Runner switched execution");
        }
        if let Some(previous_runner) = &reassignment.previous_runner {
            warn!(runner, previous_runner = %previous_runner, execution_id = %id, "Execution moved to another runner");
        }
        if let Some(execution) = state.executions.get_mut(id) {
            execution.assign_runner();
        }
        Ok(())
    }

    /// A runner reports it has no execution; what it had is reconciled now.
    #[instrument(skip(self))]
    pub async fn on_runner_without_execution(&self, runner: &str) {
        let mut state = self.state.lock().await;
        let Some(id) = state.assignments.release_runner(runner) else {
            return;
        };
        if let Some(execution) = state.executions.get_mut(&id) {
            execution.release_runner();
            self.refresh(execution).await;
            debug!(runner, execution_id = %id, status = %execution.status(), "Runner released execution");
        }
    }

    /// A runner stopped answering. The pairing is kept so the runner can
    /// resume reporting it.
    #[instrument(skip(self))]
    pub async fn on_runner_unavailable(&self, runner: &str) {
        let mut state = self.state.lock().await;
        let Some(id) = state.assignments.execution_of(runner).cloned() else {
            return;
        };
        if let Some(execution) = state.executions.get_mut(&id) {
            execution.set_runner_responsive(false);
            warn!(runner, execution_id = %id, "Runner of execution is not responding");
        }
    }

    pub async fn get_runner_execution(&self, runner: &str) -> Option<Execution> {
        let state = self.state.lock().await;
        let id = state.assignments.execution_of(runner)?;
        state.executions.get(id).cloned()
    }

    pub async fn get_execution_runner(&self, id: &ExecutionId) -> Option<String> {
        let state = self.state.lock().await;
        state.assignments.runner_of(id).map(str::to_string)
    }

    /// Whether the runner map is a bijection; used by tests and diagnostics.
    pub async fn assignments_consistent(&self) -> bool {
        self.state.lock().await.assignments.is_consistent()
    }

    /// One reconciliation pass at `now`.
    ///
    /// Reads snapshots of unfinished executions, purges expired tombstones
    /// and retries queued directory removals, in that order.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        {
            let mut state = self.state.lock().await;
            for execution in state.executions.values_mut() {
                if self.refresh(execution).await {
                    report.updated += 1;
                }
            }

            let expired: Vec<ExecutionId> = state
                .executions
                .values()
                .filter(|execution| execution.is_expired(now))
                .map(|execution| execution.id().clone())
                .collect();
            for id in &expired {
                state.executions.remove(id);
                state.assignments.release_execution(id);
                debug!(execution_id = %id, "Tombstone purged");
            }
            self.metrics.purged(expired.len());
            self.metrics.set_tracked(state.executions.len());
            report.purged = expired;
        }

        let collected = self.gc.collect().await;
        self.metrics.collected(collected.failed, collected.pending);
        report.removed_directories = collected.removed;
        report.pending_directories = collected.pending;

        if !report.is_idle() {
            debug!(
                updated = report.updated,
                purged = report.purged.len(),
                removed = report.removed_directories.len(),
                pending = report.pending_directories,
                "Reconciliation pass"
            );
        }
        report
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        self.reconcile_at(Utc::now()).await
    }

    pub async fn pending_deletions(&self) -> Vec<PathBuf> {
        self.gc.pending().await
    }

    async fn layout_of(&self, id: &ExecutionId) -> Result<ExecutionLayout> {
        let state = self.state.lock().await;
        state
            .executions
            .get(id)
            .filter(|execution| !execution.is_tombstoned())
            .map(Execution::layout)
            .ok_or_else(|| MonitorError::ExecutionNotFound(id.to_string()))
    }

    pub async fn get_component_messages(
        &self,
        id: &ExecutionId,
        component: &str,
    ) -> Result<Vec<MessageRecord>> {
        let layout = self.layout_of(id).await?;
        messages::load_component_messages(&layout, component).await
    }

    pub async fn get_messages(&self, id: &ExecutionId) -> Result<Vec<MessageRecord>> {
        let layout = self.layout_of(id).await?;
        messages::load_all_messages(&layout).await
    }
}

fn pipeline_iri(definition: &Value) -> Option<String> {
    definition
        .get("iri")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Move a snapshot stored in the old location into `execution/`.
async fn migrate_layout(layout: &ExecutionLayout) -> Result<()> {
    let legacy = layout.legacy_overview_file();
    let current = layout.overview_file();
    if tokio::fs::try_exists(&current).await? || !tokio::fs::try_exists(&legacy).await? {
        return Ok(());
    }
    tokio::fs::create_dir_all(layout.execution_dir()).await?;
    tokio::fs::rename(&legacy, &current).await?;
    info!(path = %layout.root().display(), "Migrated execution directory layout");
    Ok(())
}

fn write_new_execution(
    layout: &ExecutionLayout,
    definition: &Value,
    inputs: &[ExecutionInput],
    snapshot: &ProgressSnapshot,
) -> Result<()> {
    write_json_atomic(&layout.definition_file(), definition)?;
    let input_dir = layout.input_dir();
    std::fs::create_dir_all(&input_dir)?;
    for input in inputs {
        std::fs::write(input_dir.join(&input.name), &input.content)?;
    }
    SnapshotWriter::new(layout.overview_file()).try_write(snapshot)?;
    Ok(())
}

fn write_cloned_execution(
    layout: &ExecutionLayout,
    source: &ExecutionLayout,
    source_iri: &str,
    snapshot: &ProgressSnapshot,
) -> Result<()> {
    if source.definition_dir().is_dir() {
        copy_dir_recursive(&source.definition_dir(), &layout.definition_dir())?;
    }
    if source.input_dir().is_dir() {
        copy_dir_recursive(&source.input_dir(), &layout.input_dir())?;
    }

    let source_working = source.working_dir();
    if source_working.is_dir() {
        for entry in std::fs::read_dir(&source_working)? {
            let entry = entry?;
            let source_unit = entry.path();
            if !source_unit.join(DEBUG_FILE).is_file() {
                continue;
            }
            reference_content(
                &source_unit,
                &layout.working_dir().join(entry.file_name()),
                source_iri,
            )?;
        }
    }

    SnapshotWriter::new(layout.overview_file()).try_write(snapshot)?;
    Ok(())
}
