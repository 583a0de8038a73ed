//! Structured failures reported by the hosting engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a component, a data unit or the pipeline itself.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ComponentError {
    pub message: String,
    /// Rendered chain of underlying causes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ComponentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl From<etl_core::Error> for ComponentError {
    fn from(err: etl_core::Error) -> Self {
        ComponentError::new(err.to_string())
    }
}
