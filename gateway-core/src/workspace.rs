//! Per-workspace aggregate state.
//!
//! A workspace is a passive record (§4.C of the design document): all
//! behavior — admission, broadcast, upgrade orchestration — lives on
//! [`crate::manager::SessionManager`], which is the sole writer of a
//! workspace's registries and flags.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::future::{BoxFuture, Shared};
use gateway_types::pipeline::{PipelineError, PipelineHandle};
use gateway_types::workspace::WorkspaceId;
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::connection::ConnectionSocket;
use crate::session::Session;

/// One `{session, socket}` binding held in a workspace's session map and
/// mirrored in the manager's flat index.
#[derive(Clone)]
pub struct SessionEntry {
    /// The session's own state.
    pub session: Arc<Session>,
    /// The transport it is attached through.
    pub socket: Arc<ConnectionSocket>,
}

/// Lifecycle state of a [`Workspace`]: `Booting -> Ready -> (Upgrading |
/// Closing) -> Gone`. `Gone` is implicit: the workspace is simply
/// removed from the registry rather than tracked in this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// The pipeline factory call is still in flight.
    Booting,
    /// The pipeline resolved; the workspace admits sessions normally.
    Ready,
    /// Non-upgrade sessions are being evicted; only upgrade-role tokens
    /// may attach.
    Upgrading,
    /// Sessions are being torn down and the workspace will be removed.
    Closing,
}

pub(crate) type PipelineFuture =
    Shared<BoxFuture<'static, Result<PipelineHandle, PipelineError>>>;

/// Per-workspace aggregate: the shared pipeline, attached sessions, and
/// the flags the manager drives through the state machine.
pub struct Workspace {
    /// Identity as carried by the tokens that attach here.
    pub workspace_id: WorkspaceId,
    pub(crate) pipeline: PipelineFuture,
    pub(crate) sessions: Mutex<HashMap<Uuid, SessionEntry>>,
    state: Mutex<WorkspaceState>,
    /// Remaining one-minute ticks before an empty workspace is evicted.
    /// Armed by `SessionManager::close` when the session map empties and
    /// consumed by the manager's background ticker.
    pub(crate) soft_shutdown: AtomicU32,
    /// Notified once this workspace has fully torn down, so a concurrent
    /// `addSession` retry waiting on `closing` can proceed.
    pub(crate) closed_notify: Notify,
}

impl Workspace {
    pub(crate) fn new(workspace_id: WorkspaceId, pipeline: PipelineFuture) -> Self {
        Self {
            workspace_id,
            pipeline,
            sessions: Mutex::new(HashMap::new()),
            state: Mutex::new(WorkspaceState::Booting),
            soft_shutdown: AtomicU32::new(0),
            closed_notify: Notify::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkspaceState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: WorkspaceState) {
        *self.state.lock() = state;
    }

    /// `true` while non-upgrade tokens are barred from attaching.
    pub fn is_upgrading(&self) -> bool {
        matches!(self.state(), WorkspaceState::Upgrading)
    }

    /// `true` once the workspace has started tearing down; further
    /// mutation must be refused and callers should await `closed_notify`.
    pub fn is_closing(&self) -> bool {
        matches!(self.state(), WorkspaceState::Closing)
    }

    /// Number of sessions currently attached.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
