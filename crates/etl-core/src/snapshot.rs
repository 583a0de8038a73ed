//! Progress snapshot: the durable projection of one execution's state.
//!
//! The runner replaces the snapshot file as a whole at every lifecycle
//! boundary; the monitor only ever reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::error::Result;
use crate::fs::write_json_atomic;
use crate::status::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Execution IRI
    pub execution: String,

    pub status: ExecutionStatus,

    /// Cancel was requested and the runner is winding down
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelling: bool,

    /// Pipeline IRI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_finished: Option<DateTime<Utc>>,

    /// Compared by the monitor to detect a new snapshot
    pub last_change: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_progress: Option<PipelineProgress>,

    /// Size of the execution directory in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineProgress {
    /// Components mapped or executed so far
    pub current: u32,
    /// Components in the pipeline
    pub total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_map: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_mapped: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_executed: Option<u32>,
}

impl ProgressSnapshot {
    pub fn new(execution: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            execution: execution.into(),
            status,
            cancelling: false,
            pipeline: None,
            execution_started: None,
            execution_finished: None,
            last_change: Utc::now(),
            pipeline_progress: None,
            directory_size: None,
        }
    }

    /// Snapshot of a freshly accepted execution.
    pub fn queued(execution: impl Into<String>, pipeline: Option<String>) -> Self {
        let mut snapshot = Self::new(execution, ExecutionStatus::Queued);
        snapshot.pipeline = pipeline;
        snapshot
    }

    /// Tombstone projection of an existing snapshot.
    pub fn deleted(&self, now: DateTime<Utc>) -> Self {
        let mut snapshot = self.clone();
        snapshot.status = ExecutionStatus::Deleted;
        snapshot.cancelling = false;
        snapshot.last_change = now;
        snapshot
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }
}

/// Writes snapshots for one execution with the atomic replace protocol.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `snapshot`, replacing the previous one.
    pub fn try_write(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        write_json_atomic(&self.path, snapshot)?;
        debug!(path = %self.path.display(), status = %snapshot.status, "Snapshot written");
        Ok(())
    }

    /// Persist `snapshot`, logging a failure instead of returning it.
    ///
    /// The previous snapshot stays valid and the next successful write
    /// carries the latest state. Returns whether the write succeeded.
    pub fn write(&self, snapshot: &ProgressSnapshot) -> bool {
        match self.try_write(snapshot) {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Can't save execution overview");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample() -> ProgressSnapshot {
        ProgressSnapshot {
            execution: "http://localhost/executions/1".to_string(),
            status: ExecutionStatus::Running,
            cancelling: true,
            pipeline: Some("http://localhost/pipelines/p".to_string()),
            execution_started: Some(Utc.timestamp_millis_opt(1_000).unwrap()),
            execution_finished: None,
            last_change: Utc.timestamp_millis_opt(2_000).unwrap(),
            pipeline_progress: Some(PipelineProgress {
                current: 2,
                total: 5,
                total_map: Some(1),
                current_mapped: Some(1),
                current_executed: Some(1),
            }),
            directory_size: Some(4096),
        }
    }

    #[test]
    fn test_write_then_read_returns_equal_snapshot() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("execution/overview.json"));
        let snapshot = sample();

        assert!(writer.write(&snapshot));
        assert_eq!(ProgressSnapshot::read(writer.path()).unwrap(), snapshot);
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["status"], "RUNNING");
        assert!(value.get("lastChange").is_some());
        assert!(value.get("executionStarted").is_some());
        assert_eq!(value["pipelineProgress"]["total_map"], 1);
        assert_eq!(value["pipelineProgress"]["current_executed"], 1);
        assert_eq!(value["directorySize"], 4096);
    }

    #[test]
    fn test_last_change_is_mandatory() {
        let json = br#"{"execution": "e", "status": "QUEUED"}"#;
        assert!(ProgressSnapshot::from_slice(json).is_err());
    }

    #[test]
    fn test_failed_write_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overview.json");
        let writer = SnapshotWriter::new(&path);
        assert!(writer.write(&sample()));

        std::fs::create_dir(crate::fs::swap_path(&path).unwrap()).unwrap();
        let mut next = sample();
        next.status = ExecutionStatus::Finished;
        assert!(!writer.write(&next));

        assert_eq!(ProgressSnapshot::read(&path).unwrap(), sample());
    }

    #[test]
    fn test_concurrent_reader_sees_whole_snapshots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overview.json");
        let writer = SnapshotWriter::new(&path);
        let first = sample();
        let mut second = sample();
        second.status = ExecutionStatus::Finished;
        second.pipeline_progress = Some(PipelineProgress {
            current: 5,
            total: 5,
            ..Default::default()
        });
        writer.write(&first);

        let reader_path = path.clone();
        let (a, b) = (first.clone(), second.clone());
        let reader = std::thread::spawn(move || {
            for _ in 0..200 {
                let seen = ProgressSnapshot::read(&reader_path).unwrap();
                assert!(seen == a || seen == b);
            }
        });
        for i in 0..200 {
            writer.write(if i % 2 == 0 { &second } else { &first });
        }
        reader.join().unwrap();
    }
}
