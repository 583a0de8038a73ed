//! Paths inside an execution directory
//!
//! ```text
//! <execution>/
//!   definition/definition.json
//!   input/
//!   execution/overview.json
//!   execution/execution.json
//!   execution/messages/pipeline.jsonl
//!   execution/messages/<component>-<digest>.jsonl
//!   working/<data-unit>-<digest>/debug.json
//! ```

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const OVERVIEW_FILE: &str = "overview.json";
pub const LEGACY_OVERVIEW_FILE: &str = "overview.json";
pub const INFORMATION_FILE: &str = "execution.json";
pub const DEFINITION_FILE: &str = "definition.json";
pub const DEBUG_FILE: &str = "debug.json";
pub const PIPELINE_MESSAGES: &str = "pipeline";
pub const MESSAGE_EXTENSION: &str = "jsonl";

/// Hex characters of the IRI digest kept in file names
const DIGEST_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionLayout {
    root: PathBuf,
}

impl ExecutionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn definition_dir(&self) -> PathBuf {
        self.root.join("definition")
    }

    pub fn definition_file(&self) -> PathBuf {
        self.definition_dir().join(DEFINITION_FILE)
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn execution_dir(&self) -> PathBuf {
        self.root.join("execution")
    }

    pub fn overview_file(&self) -> PathBuf {
        self.execution_dir().join(OVERVIEW_FILE)
    }

    /// Where older releases kept the snapshot.
    pub fn legacy_overview_file(&self) -> PathBuf {
        self.root.join(LEGACY_OVERVIEW_FILE)
    }

    pub fn information_file(&self) -> PathBuf {
        self.execution_dir().join(INFORMATION_FILE)
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.execution_dir().join("messages")
    }

    pub fn pipeline_messages_file(&self) -> PathBuf {
        self.messages_dir()
            .join(format!("{}.{}", PIPELINE_MESSAGES, MESSAGE_EXTENSION))
    }

    pub fn component_messages_file(&self, component_iri: &str) -> PathBuf {
        self.messages_dir().join(format!(
            "{}.{}",
            component_file_name(component_iri),
            MESSAGE_EXTENSION
        ))
    }

    pub fn working_dir(&self) -> PathBuf {
        self.root.join("working")
    }

    pub fn data_unit_dir(&self, data_unit: &str) -> PathBuf {
        self.working_dir().join(component_file_name(data_unit))
    }

    pub fn debug_file(&self, data_unit: &str) -> PathBuf {
        self.data_unit_dir(data_unit).join(DEBUG_FILE)
    }
}

/// File-system safe name of a component log or data unit directory.
///
/// The readable part comes from the last IRI segment, the suffix from a
/// digest of the whole IRI, so two IRIs sharing a last segment never share
/// a file. Suffixed names can't clash with the pipeline log.
pub fn component_file_name(iri: &str) -> String {
    let trimmed = iri.trim_end_matches('/');
    let segment = trimmed.rsplit(['/', '#']).next().unwrap_or(trimmed);
    let mut name: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        name = "_".to_string();
    }
    format!("{}-{}", name, iri_digest(iri))
}

fn iri_digest(iri: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(iri.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..DIGEST_LEN].to_string()
}
