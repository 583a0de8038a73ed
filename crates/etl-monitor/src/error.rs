use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Core(#[from] etl_core::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("Working directory {} is not available: {source}", path.display())]
    WorkingDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Can't load execution from {}: {reason}", path.display())]
    CannotLoadExecution { path: PathBuf, reason: String },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MonitorError {
    pub fn cannot_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CannotLoadExecution {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
