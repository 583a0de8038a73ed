//! Execution identifiers
//!
//! Identifiers have the form `<unix-millis>-<sequence>-<uuid>` so they sort
//! by creation time and stay unique even when two executions are created in
//! the same millisecond.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a fresh identifier using the current time.
    pub fn generate(sequence: u64) -> Self {
        Self::generate_at(Utc::now(), sequence)
    }

    pub fn generate_at(time: DateTime<Utc>, sequence: u64) -> Self {
        Self(format!(
            "{}-{}-{}",
            time.timestamp_millis(),
            sequence,
            Uuid::new_v4()
        ))
    }

    /// Wrap an existing identifier, e.g. an execution directory name.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Take the last path segment of an execution IRI.
    pub fn from_iri(iri: &str) -> Self {
        let name = iri.trim_end_matches('/');
        Self(name.rsplit('/').next().unwrap_or(name).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in the identifier, if it has the generated form.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        let millis = self.created_millis()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    fn created_millis(&self) -> Option<i64> {
        self.0.split('-').next()?.parse().ok()
    }

    fn sequence(&self) -> Option<u64> {
        self.0.split('-').nth(1)?.parse().ok()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for ExecutionId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Identifiers without a timestamp sort before generated ones.
        (self.created_millis(), self.sequence(), &self.0).cmp(&(
            other.created_millis(),
            other.sequence(),
            &other.0,
        ))
    }
}

impl PartialOrd for ExecutionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
