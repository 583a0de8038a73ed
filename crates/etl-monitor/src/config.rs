//! Monitor configuration.
//!
//! Built-in defaults, then an optional TOML file, then `ETL_MONITOR_*`
//! environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WORKING_DIRECTORY: &str = "data/executions";
pub const DEFAULT_EXECUTION_PREFIX: &str = "http://localhost:8080/resources/executions/";
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_TOMBSTONE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitorConfig {
    /// Directory holding one subdirectory per execution
    pub working_directory: PathBuf,
    /// Execution IRIs are this prefix followed by the identifier
    pub execution_prefix: String,
    pub reconcile_interval_secs: u64,
    /// How long a deleted execution stays visible
    pub tombstone_ttl_secs: u64,
}

impl MonitorConfig {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            execution_prefix: DEFAULT_EXECUTION_PREFIX.to_string(),
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            tombstone_ttl_secs: DEFAULT_TOMBSTONE_TTL_SECS,
        }
    }

    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("working_directory", DEFAULT_WORKING_DIRECTORY)?
            .set_default("execution_prefix", DEFAULT_EXECUTION_PREFIX)?
            .set_default("reconcile_interval_secs", DEFAULT_RECONCILE_INTERVAL_SECS)?
            .set_default("tombstone_ttl_secs", DEFAULT_TOMBSTONE_TTL_SECS)?;
        if let Some(file) = file {
            builder = builder.add_source(File::from(file));
        }
        builder
            .add_source(Environment::with_prefix("ETL_MONITOR").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval_secs = interval.as_secs();
        self
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn tombstone_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tombstone_ttl_secs as i64)
    }

    pub fn execution_iri(&self, id: &etl_core::ExecutionId) -> String {
        format!("{}{}", self.execution_prefix, id)
    }
}
