//! Append-only message logs.
//!
//! All logs of one execution share a [`MessageCounter`], so records from the
//! pipeline log and every component log can be merged by `order`.

use etl_core::message::{read_log, MessageKind, MessageRecord};
use etl_core::{ExecutionLayout, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Execution-wide monotonically increasing message counter
#[derive(Debug, Clone, Default)]
pub struct MessageCounter(Arc<AtomicU64>);

impl MessageCounter {
    pub fn starting_at(next: u64) -> Self {
        Self(Arc::new(AtomicU64::new(next)))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// One JSON-lines log file opened for appending.
#[derive(Debug)]
pub struct MessageLog {
    path: PathBuf,
    file: Option<File>,
}

impl MessageLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Append one record as a single write, newline last.
    pub fn append(&mut self, record: &MessageRecord) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            etl_core::Error::internal(format!("Message log {} is closed", self.path.display()))
        })?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    /// Flush to disk and release the handle.
    pub fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Counter value following the highest order found on disk
    pub next_order: u64,
    /// Component logs that got a terminal failure record
    pub recovered: Vec<PathBuf>,
}

/// Close component logs left open by a runner that died mid-component.
///
/// A torn trailing record is cut off every log first, the pipeline log
/// included, so later appends start on a fresh line. Each component log
/// whose last complete record is not terminal then gets exactly one
/// `componentFailed` record.
pub fn recover_interrupted_logs(layout: &ExecutionLayout) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let messages_dir = layout.messages_dir();
    if !messages_dir.is_dir() {
        return Ok(report);
    }

    let pipeline_log = layout.pipeline_messages_file();
    let mut logs = Vec::new();
    for entry in fs::read_dir(&messages_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(etl_core::layout::MESSAGE_EXTENSION) {
            continue;
        }
        let parsed = read_log(&path)?;
        if let Some(max) = parsed.max_order() {
            report.next_order = report.next_order.max(max + 1);
        }
        if fs::metadata(&path)?.len() > parsed.complete_len {
            truncate_torn_record(&path, parsed.complete_len)?;
        }
        logs.push((path, parsed));
    }

    for (path, parsed) in logs {
        if path == pipeline_log {
            continue;
        }
        let Some(last) = parsed.records.last() else {
            continue;
        };
        if parsed.is_closed() {
            continue;
        }

        let mut record = MessageRecord::new(report.next_order, MessageKind::ComponentFailed)
            .with_message("Runner terminated while the component was running");
        record.component = last.component.clone();
        report.next_order += 1;

        let mut log = MessageLog::open(&path)?;
        log.append(&record)?;
        log.close()?;
        warn!(path = %path.display(), "Closed message log of interrupted component");
        report.recovered.push(path);
    }

    if !report.recovered.is_empty() {
        info!(count = report.recovered.len(), "Recovered interrupted component logs");
    }
    Ok(report)
}

fn truncate_torn_record(path: &Path, complete_len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(complete_len)?;
    file.sync_all()?;
    warn!(path = %path.display(), "Dropped torn record from message log");
    Ok(())
}
