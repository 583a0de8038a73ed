//! Execution entity as tracked by the monitor.

use chrono::{DateTime, Duration, Utc};
use etl_core::{DataUnitDebug, ExecutionId, ExecutionLayout, ExecutionStatus, ProgressSnapshot};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    id: ExecutionId,
    iri: String,
    status: ExecutionStatus,
    created: DateTime<Utc>,
    last_change: DateTime<Utc>,
    directory: PathBuf,
    /// Terminal status observed and everything flushed by the runner
    has_final_data: bool,
    is_assigned_runner: bool,
    runner_responsive: bool,
    /// Set once tombstoned
    #[serde(skip_serializing_if = "Option::is_none")]
    time_to_live: Option<DateTime<Utc>>,
    overview: ProgressSnapshot,
    #[serde(skip)]
    pipeline: Option<serde_json::Value>,
    debug_data: Vec<DataUnitDebug>,
}

impl Execution {
    pub(crate) fn new(
        id: ExecutionId,
        iri: String,
        directory: PathBuf,
        overview: ProgressSnapshot,
        pipeline: Option<serde_json::Value>,
    ) -> Self {
        let created = id
            .created()
            .or(overview.execution_started)
            .unwrap_or(overview.last_change);
        Self {
            status: overview.status,
            last_change: overview.last_change,
            has_final_data: overview.status.is_finished(),
            is_assigned_runner: false,
            runner_responsive: false,
            time_to_live: None,
            debug_data: Vec::new(),
            id,
            iri,
            created,
            directory,
            overview,
            pipeline,
        }
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn iri(&self) -> &str {
        &self.iri
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn last_change(&self) -> DateTime<Utc> {
        self.last_change
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn layout(&self) -> ExecutionLayout {
        ExecutionLayout::new(&self.directory)
    }

    pub fn has_final_data(&self) -> bool {
        self.has_final_data
    }

    pub fn is_assigned_runner(&self) -> bool {
        self.is_assigned_runner
    }

    pub fn is_runner_responsive(&self) -> bool {
        self.runner_responsive
    }

    pub fn time_to_live(&self) -> Option<DateTime<Utc>> {
        self.time_to_live
    }

    pub fn is_tombstoned(&self) -> bool {
        self.time_to_live.is_some()
    }

    pub fn overview(&self) -> &ProgressSnapshot {
        &self.overview
    }

    pub fn pipeline(&self) -> Option<&serde_json::Value> {
        self.pipeline.as_ref()
    }

    pub fn debug_data(&self) -> &[DataUnitDebug] {
        &self.debug_data
    }

    /// Whether the reconciliation loop still needs to read snapshots.
    pub fn needs_update(&self) -> bool {
        !self.has_final_data && !self.is_tombstoned() && self.status != ExecutionStatus::Invalid
    }

    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.time_to_live.map(|ttl| ttl <= now).unwrap_or(false)
    }

    /// Take over a newer snapshot. Returns the previous status.
    pub(crate) fn apply_snapshot(&mut self, snapshot: ProgressSnapshot) -> ExecutionStatus {
        let previous = self.status;
        self.status = snapshot.status;
        self.last_change = snapshot.last_change;
        self.overview = snapshot;
        previous
    }

    /// Record that every file of a finished execution is on disk.
    pub(crate) fn mark_final_data(&mut self) {
        self.has_final_data = true;
        self.reload_debug_data();
    }

    pub(crate) fn assign_runner(&mut self) {
        self.is_assigned_runner = true;
        self.runner_responsive = true;
    }

    /// No runner owns the execution anymore.
    pub(crate) fn release_runner(&mut self) {
        self.is_assigned_runner = false;
        self.runner_responsive = false;
    }

    pub(crate) fn set_runner_responsive(&mut self, responsive: bool) {
        self.runner_responsive = responsive;
    }

    /// Turn into a tombstone. Returns the previous status.
    pub(crate) fn tombstone(&mut self, now: DateTime<Utc>, ttl: Duration) -> ExecutionStatus {
        let previous = self.status;
        self.overview = self.overview.deleted(now);
        self.status = ExecutionStatus::Deleted;
        self.last_change = now;
        self.time_to_live = Some(now + ttl);
        self.pipeline = None;
        self.debug_data.clear();
        previous
    }

    /// Rebuild the debug view from the data unit directories on disk.
    pub(crate) fn reload_debug_data(&mut self) {
        let working_dir = self.layout().working_dir();
        let entries = match std::fs::read_dir(&working_dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %working_dir.display(), error = %e, "Can't list data units");
                }
                self.debug_data.clear();
                return;
            }
        };

        let mut debug_data = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = Path::new("working").join(&name);
            let mut data_unit = DataUnitDebug::new(name, relative);
            data_unit.update_debug_directories(&self.directory);
            debug_data.push(data_unit);
        }
        debug_data.sort_by(|a, b| a.name.cmp(&b.name));
        self.debug_data = debug_data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(status: ExecutionStatus) -> Execution {
        let id = ExecutionId::generate(1);
        let overview = ProgressSnapshot::new(format!("http://e/{}", id), status);
        Execution::new(id, "http://e".to_string(), "/tmp/e".into(), overview, None)
    }

    #[test]
    fn test_loaded_finished_execution_has_final_data() {
        assert!(execution(ExecutionStatus::Finished).has_final_data());
        assert!(!execution(ExecutionStatus::Running).has_final_data());
        assert!(execution(ExecutionStatus::Running).needs_update());
        assert!(!execution(ExecutionStatus::Invalid).needs_update());
    }

    #[test]
    fn test_tombstone() {
        let mut execution = execution(ExecutionStatus::Running);
        execution.pipeline = Some(serde_json::json!({"components": []}));
        let now = Utc::now();

        let previous = execution.tombstone(now, Duration::seconds(300));
        assert_eq!(previous, ExecutionStatus::Running);
        assert_eq!(execution.status(), ExecutionStatus::Deleted);
        assert_eq!(execution.overview().status, ExecutionStatus::Deleted);
        assert!(execution.pipeline().is_none());
        assert!(!execution.needs_update());
        assert!(!execution.is_expired(now));
        assert!(execution.is_expired(now + Duration::seconds(300)));
    }
}
