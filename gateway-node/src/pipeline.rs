//! A trivial in-memory [`Pipeline`]/[`PipelineFactory`] for running the
//! gateway without a real domain engine wired up.
//!
//! Each workspace gets its own append-only store keyed by `class`.
//! `tx` appends the submitted value and broadcasts it verbatim to the
//! rest of the workspace; `find_all` returns every record of the
//! requested class. There is no query evaluation, no persistence across
//! restarts, and no authorization beyond what the gateway itself applies.

use std::collections::HashMap;

use async_trait::async_trait;
use gateway_types::pipeline::{
    BroadcastFn, BroadcastMessage, Pipeline, PipelineError, PipelineFactory, PipelineHandle,
};
use gateway_types::workspace::{WorkspaceId, WorkspaceKey};
use parking_lot::Mutex;
use serde_json::Value;

/// Builds an [`InMemoryPipeline`] for every workspace that attaches.
pub struct InMemoryPipelineFactory;

#[async_trait]
impl PipelineFactory for InMemoryPipelineFactory {
    async fn create(
        &self,
        workspace: WorkspaceId,
        upgrade: bool,
        broadcast: BroadcastFn,
    ) -> Result<PipelineHandle, PipelineError> {
        let workspace_key = workspace.canonical();
        tracing::info!(workspace = %workspace_key, upgrade, "booting in-memory pipeline");
        Ok(std::sync::Arc::new(InMemoryPipeline {
            workspace_key,
            broadcast,
            records: Mutex::new(HashMap::new()),
        }))
    }
}

struct InMemoryPipeline {
    workspace_key: WorkspaceKey,
    broadcast: BroadcastFn,
    records: Mutex<HashMap<String, Vec<Value>>>,
}

#[async_trait]
impl Pipeline for InMemoryPipeline {
    async fn find_all(
        &self,
        class: &str,
        _query: Value,
        _options: Value,
    ) -> Result<Value, PipelineError> {
        let records = self.records.lock();
        Ok(Value::Array(
            records.get(class).cloned().unwrap_or_default(),
        ))
    }

    async fn tx(&self, tx: Value) -> Result<Value, PipelineError> {
        let class = tx
            .get("class")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::Domain("tx is missing a \"class\" field".to_owned()))?
            .to_owned();
        let record = tx
            .get("record")
            .cloned()
            .ok_or_else(|| PipelineError::Domain("tx is missing a \"record\" field".to_owned()))?;

        self.records
            .lock()
            .entry(class.clone())
            .or_default()
            .push(record.clone());

        (self.broadcast)(BroadcastMessage {
            from: None,
            workspace: self.workspace_key.clone(),
            payload: serde_json::json!({ "class": class, "record": record }),
            target: None,
        });
        Ok(Value::Null)
    }
}
