//! The opaque, per-workspace domain engine.
//!
//! The pipeline is out of scope for the gateway: it is the collaborator
//! that actually executes `findAll` and `tx` and decides what to
//! broadcast. This module only describes the shape the gateway drives it
//! through, modelled directly on how `gateway-core`'s predecessor drove
//! its own pluggable domain collaborator (the secret manager): a small
//! async trait behind an `Arc<dyn _>`, constructed once per workspace by
//! a factory the hosting application supplies.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use uuid::Uuid;

use crate::workspace::WorkspaceId;

/// Errors a pipeline may return.
///
/// `Domain` is a verbatim passthrough: the gateway never interprets it,
/// only forwards the message to the caller as
/// [`crate::errors::ErrorCode::PipelineError`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// The pipeline rejected a `findAll`/`tx` call.
    #[error("{0}")]
    Domain(String),
    /// The pipeline factory could not construct a pipeline for a
    /// workspace; the workspace is torn down and the error is returned
    /// to every session waiting on it.
    #[error("could not start pipeline: {0}")]
    ConstructionFailed(String),
}

/// A change broadcast by a pipeline, or synthesized by the manager for
/// maintenance/upgrade notices.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// The session that originated the change, if any. Never receives
    /// its own broadcast back.
    pub from: Option<Uuid>,
    /// The workspace to broadcast within.
    pub workspace: crate::workspace::WorkspaceKey,
    /// The opaque payload forwarded to interested peers.
    pub payload: serde_json::Value,
    /// Restricts delivery to sessions whose account email is in this
    /// set. `None` means "all eligible sessions in the workspace".
    pub target: Option<HashSet<String>>,
}

/// Callback a pipeline uses to ask the manager to fan a change out to a
/// workspace's sessions. Cheap to clone; typically backed by a channel
/// sender or a weak handle into the manager's registries.
pub type BroadcastFn = Arc<dyn Fn(BroadcastMessage) + Send + Sync>;

/// The domain engine for one workspace.
///
/// Shared read-only among every session attached to the workspace; a
/// pipeline is responsible for its own internal concurrency.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Executes a read against the domain model.
    async fn find_all(
        &self,
        class: &str,
        query: serde_json::Value,
        options: serde_json::Value,
    ) -> Result<serde_json::Value, PipelineError>;

    /// Executes a write against the domain model. Pipelines that accept
    /// this call are expected to emit any resulting changes through the
    /// [`BroadcastFn`] they were constructed with.
    async fn tx(&self, tx: serde_json::Value) -> Result<serde_json::Value, PipelineError>;
}

/// Shared handle to a running [`Pipeline`].
pub type PipelineHandle = Arc<dyn Pipeline>;

/// Constructs a [`Pipeline`] for a workspace.
///
/// Invoked at most once per `Workspace` instance (see the design
/// document's single-pipeline-per-workspace invariant); concurrent
/// `addSession` calls for the same workspace share one in-flight
/// construction rather than each invoking the factory.
#[async_trait]
pub trait PipelineFactory {
    /// Builds the pipeline for `workspace`. `upgrade` is `true` when this
    /// construction is replacing a pipeline as part of an upgrade.
    async fn create(
        &self,
        workspace: WorkspaceId,
        upgrade: bool,
        broadcast: BroadcastFn,
    ) -> Result<PipelineHandle, PipelineError>;
}

/// Shared handle to a [`PipelineFactory`] implementation.
pub type PipelineFactoryService = Arc<dyn PipelineFactory + Send + Sync>;
