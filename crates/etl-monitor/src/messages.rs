//! Reads the message logs a runner wrote.

use etl_core::message::{merge_messages, parse_log, MessageRecord};
use etl_core::ExecutionLayout;
use std::io;
use std::path::Path;

use crate::error::Result;

async fn load(path: &Path) -> Result<Vec<MessageRecord>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(parse_log(&bytes).records),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub async fn load_pipeline_messages(layout: &ExecutionLayout) -> Result<Vec<MessageRecord>> {
    load(&layout.pipeline_messages_file()).await
}

/// Records of one component; a component that never started has none.
pub async fn load_component_messages(
    layout: &ExecutionLayout,
    component: &str,
) -> Result<Vec<MessageRecord>> {
    load(&layout.component_messages_file(component)).await
}

/// Every log of the execution, ordered by the global counter.
pub async fn load_all_messages(layout: &ExecutionLayout) -> Result<Vec<MessageRecord>> {
    let mut logs = Vec::new();
    let mut entries = match tokio::fs::read_dir(layout.messages_dir()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(etl_core::layout::MESSAGE_EXTENSION) {
            logs.push(load(&path).await?);
        }
    }
    Ok(merge_messages(logs))
}
