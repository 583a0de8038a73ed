//! Records stored in the append-only message logs.
//!
//! Logs are JSON lines. A record counts only once its terminating newline is
//! on disk, so a reader never sees a record the writer has not finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    ExecutionBegin,
    ExecutionEnd,
    ExecutionCancelling,
    ExecutionFailed,
    ComponentBegin,
    ComponentProgress,
    ComponentEnd,
    ComponentFailed,
    DataUnitSaveFailed,
    UserCodeBegin,
    UserCodeSuccessful,
    UserCodeFailed,
}

impl MessageKind {
    /// Whether a component log is closed after this record.
    pub fn closes_component(&self) -> bool {
        matches!(self, MessageKind::ComponentEnd | MessageKind::ComponentFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Position in the execution-wide message sequence
    pub order: u64,
    pub kind: MessageKind,
    /// Informational only, `order` defines the sequence
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl MessageRecord {
    pub fn new(order: u64, kind: MessageKind) -> Self {
        Self {
            order,
            kind,
            created: Utc::now(),
            component: None,
            message: None,
            cause: None,
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_cause(mut self, cause: Option<String>) -> Self {
        self.cause = cause;
        self
    }
}

/// Parsed content of one log file.
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    pub records: Vec<MessageRecord>,
    /// Byte length of the complete records; anything after is a torn write
    pub complete_len: u64,
}

impl ParsedLog {
    pub fn is_closed(&self) -> bool {
        self.records
            .last()
            .map(|record| record.kind.closes_component())
            .unwrap_or(false)
    }

    pub fn max_order(&self) -> Option<u64> {
        self.records.iter().map(|record| record.order).max()
    }
}

/// Parse complete records, ignoring a trailing partial line.
pub fn parse_log(bytes: &[u8]) -> ParsedLog {
    let complete_len = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    let mut records = Vec::new();
    for line in bytes[..complete_len].split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<MessageRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "Skipping malformed message record"),
        }
    }
    ParsedLog {
        records,
        complete_len: complete_len as u64,
    }
}

/// Read a log file; a missing file is an empty log.
pub fn read_log(path: &Path) -> Result<ParsedLog> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(parse_log(&bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ParsedLog::default()),
        Err(e) => Err(e.into()),
    }
}

/// Interleave several logs by the global counter.
pub fn merge_messages<I>(logs: I) -> Vec<MessageRecord>
where
    I: IntoIterator<Item = Vec<MessageRecord>>,
{
    let mut merged: Vec<MessageRecord> = logs.into_iter().flatten().collect();
    merged.sort_by_key(|record| record.order);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(record: &MessageRecord) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(record).unwrap();
        bytes.push(b'\n');
        bytes
    }

    #[test]
    fn test_partial_trailing_record_is_ignored() {
        let first = MessageRecord::new(1, MessageKind::ComponentBegin);
        let mut bytes = line(&first);
        let complete = bytes.len() as u64;
        bytes.extend_from_slice(br#"{"order":2,"kind":"compo"#);

        let parsed = parse_log(&bytes);
        assert_eq!(parsed.records, vec![first]);
        assert_eq!(parsed.complete_len, complete);
        assert!(!parsed.is_closed());
    }

    #[test]
    fn test_closed_log() {
        let mut bytes = line(&MessageRecord::new(1, MessageKind::ComponentBegin));
        bytes.extend(line(&MessageRecord::new(4, MessageKind::ComponentEnd)));
        let parsed = parse_log(&bytes);
        assert!(parsed.is_closed());
        assert_eq!(parsed.max_order(), Some(4));
    }

    #[test]
    fn test_merge_orders_by_counter() {
        let pipeline = vec![
            MessageRecord::new(0, MessageKind::ExecutionBegin),
            MessageRecord::new(5, MessageKind::ExecutionEnd),
        ];
        let component = vec![
            MessageRecord::new(1, MessageKind::ComponentBegin),
            MessageRecord::new(2, MessageKind::ComponentEnd),
        ];
        let orders: Vec<u64> = merge_messages(vec![pipeline, component])
            .iter()
            .map(|r| r.order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 5]);
    }
}
