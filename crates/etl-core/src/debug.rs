//! Debug data references.
//!
//! Every data unit leaves a `debug.json` in its working directory naming the
//! directories that hold user-facing debug artifacts. A data unit mapped from
//! another execution points into that execution's directory instead of
//! holding a copy, so the source content must never be mutated.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;
use crate::fs::write_json_atomic;
use crate::id::ExecutionId;
use crate::layout::DEBUG_FILE;

/// Content of a `debug.json` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReference {
    /// Relative to the data unit directory unless absolute
    pub directories: Vec<PathBuf>,

    /// IRI of the execution the content was mapped from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_from_execution: Option<String>,
}

impl DebugReference {
    pub fn local(directories: Vec<PathBuf>) -> Self {
        Self {
            directories,
            mapped_from_execution: None,
        }
    }

    pub fn read(data_unit_dir: &Path) -> Result<Self> {
        let bytes = std::fs::read(data_unit_dir.join(DEBUG_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn write(&self, data_unit_dir: &Path) -> Result<()> {
        write_json_atomic(&data_unit_dir.join(DEBUG_FILE), self)
    }

    /// Directories resolved against the data unit directory.
    pub fn resolve(&self, data_unit_dir: &Path) -> Vec<PathBuf> {
        self.directories
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    data_unit_dir.join(dir)
                }
            })
            .collect()
    }
}

/// Debug view of one data unit as seen by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUnitDebug {
    /// Name of the data unit directory under `working/`
    pub name: String,
    /// Path of the data unit relative to the execution directory
    pub relative_data_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_from_execution: Option<String>,
    pub debug_directories: Vec<PathBuf>,
}

impl DataUnitDebug {
    pub fn new(name: impl Into<String>, relative_data_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            relative_data_path: relative_data_path.into(),
            mapped_from_execution: None,
            debug_directories: Vec::new(),
        }
    }

    /// Identifier of the execution this data unit was mapped from.
    pub fn execution_id(&self) -> Option<ExecutionId> {
        self.mapped_from_execution
            .as_deref()
            .map(ExecutionId::from_iri)
    }

    /// Reload debug directories from `debug.json`.
    ///
    /// A missing or malformed reference leaves the data unit without
    /// directories.
    pub fn update_debug_directories(&mut self, execution_dir: &Path) {
        let data_unit_dir = execution_dir.join(&self.relative_data_path);
        match DebugReference::read(&data_unit_dir) {
            Ok(reference) => {
                self.debug_directories = reference.resolve(&data_unit_dir);
                self.mapped_from_execution = reference.mapped_from_execution;
            }
            Err(e) => {
                warn!(path = %data_unit_dir.display(), error = %e, "Can't read debug reference");
                self.debug_directories = Vec::new();
            }
        }
    }
}

/// Make `destination` reference the debug content of `source`.
///
/// Only the resolved directory list is written; no data is copied. Later
/// changes to the source's `debug.json` do not affect the destination.
pub fn reference_content(
    source_data_unit_dir: &Path,
    destination_data_unit_dir: &Path,
    source_execution_iri: &str,
) -> Result<DebugReference> {
    let source = DebugReference::read(source_data_unit_dir)?;
    let reference = DebugReference {
        directories: source.resolve(source_data_unit_dir),
        mapped_from_execution: Some(
            source
                .mapped_from_execution
                .unwrap_or_else(|| source_execution_iri.to_string()),
        ),
    };
    std::fs::create_dir_all(destination_data_unit_dir)?;
    reference.write(destination_data_unit_dir)?;
    Ok(reference)
}
