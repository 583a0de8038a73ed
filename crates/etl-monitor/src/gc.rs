//! Deferred removal of execution directories.
//!
//! Another process may still hold files of a deleted execution open, so a
//! failed removal only keeps the directory queued for the next pass. There is
//! no retry limit.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[async_trait]
pub trait DirectoryRemover: Send + Sync {
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Removes directories with `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

#[async_trait]
impl DirectoryRemover for FsRemover {
    async fn remove(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Result of one collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub removed: Vec<PathBuf>,
    pub failed: usize,
    pub pending: usize,
}

pub struct GarbageCollector {
    remover: Arc<dyn DirectoryRemover>,
    pending: Mutex<Vec<PathBuf>>,
}

impl GarbageCollector {
    pub fn new(remover: Arc<dyn DirectoryRemover>) -> Self {
        Self {
            remover,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub async fn schedule(&self, directory: PathBuf) {
        let mut pending = self.pending.lock().await;
        if !pending.contains(&directory) {
            debug!(path = %directory.display(), "Directory scheduled for removal");
            pending.push(directory);
        }
    }

    pub async fn pending(&self) -> Vec<PathBuf> {
        self.pending.lock().await.clone()
    }

    /// Try to remove every queued directory once.
    pub async fn collect(&self) -> CollectReport {
        let queued = std::mem::take(&mut *self.pending.lock().await);
        let mut report = CollectReport::default();
        let mut retry = Vec::new();

        for directory in queued {
            match self.remover.remove(&directory).await {
                Ok(()) => {
                    info!(path = %directory.display(), "Execution directory removed");
                    report.removed.push(directory);
                }
                Err(e) => {
                    warn!(path = %directory.display(), error = %e, "Can't remove directory, will retry");
                    report.failed += 1;
                    retry.push(directory);
                }
            }
        }

        let mut pending = self.pending.lock().await;
        // Keep entries scheduled while the pass ran, once each.
        for directory in pending.drain(..) {
            if !retry.contains(&directory) {
                retry.push(directory);
            }
        }
        *pending = retry;
        report.pending = pending.len();
        report
    }
}
