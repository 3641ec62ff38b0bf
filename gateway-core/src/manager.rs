//! Registry and coordinator: `addSession`, `close`, `closeAll`, `broadcast`,
//! maintenance scheduling and the upgrade state machine (§4.D).
//!
//! A [`SessionManager`] is the single writer of both registries — the flat
//! `sessions` index and each workspace's own `sessions` map — and the sole
//! driver of [`WorkspaceState`] transitions. Everything else in this crate
//! (`Session`, `Workspace`, `ConnectionSocket`) is a passive record.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use gateway_types::pipeline::{BroadcastFn, BroadcastMessage, PipelineError, PipelineFactoryService, PipelineHandle};
use gateway_types::token::Token;
use gateway_types::wire::{RequestId, Response};
use gateway_types::workspace::{WorkspaceId, WorkspaceKey};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::encode_response;
use crate::connection::ConnectionSocket;
use crate::metrics::{
    METRICS_ID_BROADCAST_DELIVERED, METRICS_ID_BROADCAST_FAILED, METRICS_ID_SESSIONS_ADMITTED,
    METRICS_ID_SESSIONS_OPEN, METRICS_ID_SESSIONS_RECONNECTED, METRICS_ID_SOFT_SHUTDOWNS,
    METRICS_ID_WORKSPACES_OPEN, METRICS_ID_WORKSPACE_BOOT_FAILURES, METRICS_ID_WORKSPACE_UPGRADES,
};
use crate::session::{NewSession, Session};
use crate::workspace::{SessionEntry, Workspace, WorkspaceState};
use gateway_types::errors::close_code;

/// Tunables the manager's background ticker and admission path need.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// One-minute ticks an empty workspace survives before eviction.
    pub soft_shutdown_ticks: u32,
    /// Interval of the statistics-rolling / maintenance-countdown ticker.
    pub stats_tick_interval: Duration,
    /// Whether sessions that request compression actually get it.
    pub enable_compression: bool,
}

/// Inputs to [`SessionManager::add_session`].
pub struct AddSessionRequest {
    /// The decoded, verified token that authorized this handshake.
    pub token: Token,
    /// A client-supplied session id to reconnect onto, if any.
    pub prior_session_id: Option<Uuid>,
    /// The already-spawned socket for this connection.
    pub socket: Arc<ConnectionSocket>,
    /// Whether frames for this session use `Message::Binary`/CBOR.
    pub binary_mode: bool,
    /// Whether this session wants outbound frames compressed.
    pub use_compression: bool,
    /// Whether this session should receive broadcasts at all.
    pub use_broadcast: bool,
}

/// Outcome of [`SessionManager::add_session`].
pub enum AddSessionOutcome {
    /// The session was created and inserted into both registries.
    Admitted(Arc<Session>),
    /// The workspace is mid-upgrade and `token` lacked the upgrade role;
    /// the front-end must reply with [`gateway_types::wire::UpgradeNotice`]
    /// and close.
    UpgradeRequired,
    /// Pipeline construction failed, or the workspace is shutting down and
    /// did not accept a new attachment.
    Error(PipelineError),
}

/// Reason a workspace is being torn down, driving which sessions are
/// spared and which metric records the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Non-upgrade sessions are evicted; upgrade-role sessions remain
    /// attached while the replacement pipeline boots.
    Upgrade,
    /// Every session is evicted and the workspace is removed outright.
    Shutdown,
}

struct MaintenanceState {
    remaining_minutes: u32,
}

/// The two-level registry plus the background ticker that drives statistics
/// rolls, soft-shutdown expiry, and the maintenance countdown.
pub struct SessionManager {
    workspaces: Mutex<HashMap<WorkspaceKey, Arc<Workspace>>>,
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
    pipeline_factory: PipelineFactoryService,
    config: ManagerConfig,
    maintenance: Mutex<Option<MaintenanceState>>,
    cancellation_token: CancellationToken,
    self_weak: Weak<SessionManager>,
}

impl SessionManager {
    /// Builds a manager and spawns its background ticker, bound to
    /// `cancellation_token` so the hosting application can stop it. The
    /// returned handle resolves once the ticker observes cancellation, so
    /// a graceful shutdown can await it before exiting.
    pub fn new(
        pipeline_factory: PipelineFactoryService,
        config: ManagerConfig,
        cancellation_token: CancellationToken,
    ) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let manager = Arc::new_cyclic(|weak| Self {
            workspaces: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            pipeline_factory,
            config,
            maintenance: Mutex::new(None),
            cancellation_token: cancellation_token.clone(),
            self_weak: weak.clone(),
        });
        let ticker_handle = tokio::spawn(ticker(Arc::clone(&manager), cancellation_token));
        (manager, ticker_handle)
    }

    /// A callback a pipeline factory can hand to pipelines it constructs,
    /// fanning a change out through [`Self::deliver_broadcast`] without
    /// the pipeline ever seeing the manager directly.
    pub fn broadcast_fn(&self) -> BroadcastFn {
        let weak = self.self_weak.clone();
        Arc::new(move |msg: BroadcastMessage| {
            if let Some(manager) = weak.upgrade() {
                tokio::spawn(async move { manager.deliver_broadcast(msg).await });
            }
        })
    }

    /// §4.D.1. Looks up or lazily creates the target workspace, waits out
    /// an in-flight close if one is underway, enforces the upgrade
    /// admission guard, awaits pipeline construction, and inserts the new
    /// session into both registries — evicting a same-id prior session on
    /// the reconnect path.
    pub async fn add_session(self: &Arc<Self>, req: AddSessionRequest) -> AddSessionOutcome {
        let workspace_key = req.token.workspace.canonical();

        let mut workspace = self.get_or_insert_workspace(&req.token.workspace, &workspace_key);
        let notified = workspace.closed_notify.notified();
        if workspace.is_closing() {
            notified.await;
            workspace = self.get_or_insert_workspace(&req.token.workspace, &workspace_key);
        }
        if workspace.is_closing() {
            return AddSessionOutcome::Error(PipelineError::ConstructionFailed(
                "workspace is shutting down".to_owned(),
            ));
        }

        if workspace.is_upgrading() && !req.token.is_upgrade_client() {
            return AddSessionOutcome::UpgradeRequired;
        }

        match workspace.pipeline.clone().await {
            Ok(_) => workspace.set_state(WorkspaceState::Ready),
            Err(err) => {
                self.workspaces.lock().remove(&workspace_key);
                metrics::gauge!(METRICS_ID_WORKSPACES_OPEN).decrement(1.0);
                metrics::counter!(METRICS_ID_WORKSPACE_BOOT_FAILURES).increment(1);
                return AddSessionOutcome::Error(err);
            }
        }

        let session_id = req.prior_session_id.unwrap_or_else(Uuid::new_v4);
        let session = Arc::new(Session::new(NewSession {
            session_id,
            account_email: req.token.account_email.clone(),
            workspace: Arc::clone(&workspace),
            workspace_key: workspace_key.clone(),
            binary_mode: req.binary_mode,
            use_compression: req.use_compression,
            use_broadcast: req.use_broadcast,
            upgrade_client: req.token.is_upgrade_client(),
        }));
        let entry = SessionEntry { session: Arc::clone(&session), socket: req.socket };

        let evicted = {
            let mut ws_sessions = workspace.sessions.lock();
            let evicted = ws_sessions.remove(&session_id);
            ws_sessions.insert(session_id, entry.clone());
            evicted
        };
        self.sessions.lock().insert(session_id, entry);
        workspace.soft_shutdown.store(0, Ordering::Release);

        if let Some(evicted) = evicted {
            evicted.session.mark_workspace_closed();
            evicted.socket.close();
            metrics::counter!(METRICS_ID_SESSIONS_RECONNECTED).increment(1);
        } else {
            metrics::gauge!(METRICS_ID_SESSIONS_OPEN).increment(1.0);
        }
        metrics::counter!(METRICS_ID_SESSIONS_ADMITTED).increment(1);
        AddSessionOutcome::Admitted(session)
    }

    fn get_or_insert_workspace(&self, workspace_id: &WorkspaceId, key: &WorkspaceKey) -> Arc<Workspace> {
        let mut workspaces = self.workspaces.lock();
        if let Some(existing) = workspaces.get(key) {
            return Arc::clone(existing);
        }
        let factory = Arc::clone(&self.pipeline_factory);
        let broadcast = self.broadcast_fn();
        let construction_id = workspace_id.clone();
        let pipeline: BoxFuture<'static, Result<PipelineHandle, PipelineError>> =
            Box::pin(async move { factory.create(construction_id, false, broadcast).await });

        let workspace = Arc::new(Workspace::new(workspace_id.clone(), pipeline.shared()));
        workspaces.insert(key.clone(), Arc::clone(&workspace));
        metrics::gauge!(METRICS_ID_WORKSPACES_OPEN).increment(1.0);
        workspace
    }

    /// §4.D.2. Called when a socket closes (or is evicted elsewhere).
    /// Removes the binding from both registries and, if the workspace's
    /// session map is now empty, arms its soft-shutdown countdown.
    pub fn close(&self, session_id: Uuid) {
        let Some(entry) = self.sessions.lock().remove(&session_id) else {
            return;
        };
        entry.session.mark_workspace_closed();
        metrics::gauge!(METRICS_ID_SESSIONS_OPEN).decrement(1.0);

        let workspace_key = entry.session.workspace_key.clone();
        let Some(workspace) = self.workspaces.lock().get(&workspace_key).cloned() else {
            return;
        };
        workspace.sessions.lock().remove(&session_id);
        if workspace.sessions.lock().is_empty() && !workspace.is_closing() {
            workspace.soft_shutdown.store(self.config.soft_shutdown_ticks, Ordering::Release);
        }
    }

    /// §4.D.3. Tears a workspace down: evicts every session except
    /// `ignore_session` (and, on an upgrade, every upgrade-role session),
    /// awaits pipeline termination, and removes the workspace once no
    /// sessions remain attached.
    pub async fn close_all(
        &self,
        workspace_key: &WorkspaceKey,
        ignore_session: Option<Uuid>,
        close_code: u16,
        reason: CloseReason,
    ) {
        let Some(workspace) = self.workspaces.lock().get(workspace_key).cloned() else {
            return;
        };
        workspace.set_state(WorkspaceState::Closing);

        let snapshot: Vec<(Uuid, SessionEntry)> =
            workspace.sessions.lock().iter().map(|(id, entry)| (*id, entry.clone())).collect();
        let mut evicted_count = 0usize;
        for (session_id, entry) in &snapshot {
            if Some(*session_id) == ignore_session {
                continue;
            }
            if reason == CloseReason::Upgrade && entry.session.is_upgrade_client() {
                continue;
            }
            entry.socket.close_with(close_code, reason_text(reason));
            entry.session.mark_workspace_closed();
            self.sessions.lock().remove(session_id);
            workspace.sessions.lock().remove(session_id);
            evicted_count += 1;
        }
        metrics::gauge!(METRICS_ID_SESSIONS_OPEN).decrement(evicted_count as f64);

        if reason == CloseReason::Upgrade && workspace.session_count() > 0 {
            workspace.set_state(WorkspaceState::Upgrading);
            metrics::counter!(METRICS_ID_WORKSPACE_UPGRADES).increment(1);
            return;
        }

        let _ = workspace.pipeline.clone().await;
        self.workspaces.lock().remove(workspace_key);
        metrics::gauge!(METRICS_ID_WORKSPACES_OPEN).decrement(1.0);
        workspace.closed_notify.notify_waiters();
        match reason {
            CloseReason::Shutdown => metrics::counter!(METRICS_ID_SOFT_SHUTDOWNS).increment(1),
            CloseReason::Upgrade => metrics::counter!(METRICS_ID_WORKSPACE_UPGRADES).increment(1),
        }
    }

    /// §4.D.6. Forces a workspace into the upgrade path, addressable by
    /// key from the admin endpoint.
    pub async fn force_close(&self, workspace_key: &WorkspaceKey) {
        self.close_all(workspace_key, None, close_code::UPGRADING, CloseReason::Upgrade).await;
    }

    /// §4.D.4. Fans a pipeline-emitted (or synthetic) change out to every
    /// eligible session of its workspace.
    pub async fn deliver_broadcast(&self, msg: BroadcastMessage) {
        let Some(workspace) = self.workspaces.lock().get(&msg.workspace).cloned() else {
            return;
        };
        let recipients: Vec<SessionEntry> = workspace
            .sessions
            .lock()
            .values()
            .filter(|entry| Some(entry.session.session_id) != msg.from)
            .filter(|entry| entry.session.use_broadcast && !entry.session.is_upgrade_client())
            .filter(|entry| {
                msg.target
                    .as_ref()
                    .is_none_or(|targets| targets.contains(&entry.session.account_email))
            })
            .cloned()
            .collect();

        for entry in recipients {
            let response = Response::ok(RequestId::String(Uuid::new_v4().to_string()), msg.payload.clone());
            let frame = encode_response(
                &response,
                entry.session.binary_mode,
                entry.session.use_compression && self.config.enable_compression,
            );
            let written = entry.socket.send(frame.bytes, frame.binary).await;
            if written == 0 {
                metrics::counter!(METRICS_ID_BROADCAST_FAILED).increment(1);
                entry.socket.close();
                self.close(entry.session.session_id);
            } else {
                metrics::counter!(METRICS_ID_BROADCAST_DELIVERED).increment(1);
            }
        }
    }

    /// §4.D.5. Arms (or resets, if already armed) the maintenance
    /// countdown. Re-entrant: a fresh call simply overwrites the
    /// remaining minutes.
    pub fn schedule_maintenance(&self, minutes: u32) {
        *self.maintenance.lock() = Some(MaintenanceState { remaining_minutes: minutes });
    }

    /// Zeroes every session's statistics without touching the registry.
    pub fn wipe_statistics(&self) {
        for entry in self.sessions.lock().values() {
            entry.session.wipe_statistics();
        }
    }

    /// Tears every workspace down for an administrative shutdown; used by
    /// `reboot` and by maintenance-countdown expiry.
    pub async fn shutdown_all(&self) {
        let keys: Vec<WorkspaceKey> = self.workspaces.lock().keys().cloned().collect();
        for key in keys {
            self.close_all(&key, None, close_code::SHUTTING_DOWN, CloseReason::Shutdown).await;
        }
    }

    /// Aggregated counts for the unauthenticated slice of
    /// `GET /api/v1/statistics`.
    pub fn aggregate_statistics(&self) -> StatisticsSummary {
        StatisticsSummary {
            session_count: self.sessions.lock().len(),
            workspace_count: self.workspaces.lock().len(),
            memory_bytes: process_memory_bytes(),
        }
    }

    /// The admin-only per-workspace breakdown.
    pub fn admin_statistics(&self) -> Vec<WorkspaceSummary> {
        self.workspaces
            .lock()
            .values()
            .map(|workspace| WorkspaceSummary {
                workspace: workspace.workspace_id.canonical().to_string(),
                session_count: workspace.session_count(),
                upgrading: workspace.is_upgrading(),
                closing: workspace.is_closing(),
                sessions: workspace
                    .sessions
                    .lock()
                    .values()
                    .map(|entry| SessionSummary {
                        session_id: entry.session.session_id,
                        user: entry.session.account_email.clone(),
                        upgrade_client: entry.session.is_upgrade_client(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// The token shared by the manager's background ticker; cancelling it
    /// stops statistics rolling and maintenance ticks.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }
}

fn reason_text(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::Upgrade => "workspace is upgrading",
        CloseReason::Shutdown => "workspace is shutting down",
    }
}

/// One session's row in the admin statistics breakdown.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    /// The session's id.
    pub session_id: Uuid,
    /// The account email attached to the session.
    pub user: String,
    /// Whether this session bypasses broadcast and upgrade gating.
    pub upgrade_client: bool,
}

/// One workspace's row in the admin statistics breakdown.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkspaceSummary {
    /// The workspace's canonical registry key.
    pub workspace: String,
    /// Number of sessions currently attached.
    pub session_count: usize,
    /// Whether the workspace is mid-upgrade.
    pub upgrading: bool,
    /// Whether the workspace is tearing down.
    pub closing: bool,
    /// Per-session detail.
    pub sessions: Vec<SessionSummary>,
}

/// The aggregated, unauthenticated slice of `GET /api/v1/statistics`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatisticsSummary {
    /// Sessions attached across every workspace.
    pub session_count: usize,
    /// Workspaces currently live in the registry.
    pub workspace_count: usize,
    /// Resident memory of this process, in bytes; `0` where unavailable.
    pub memory_bytes: u64,
}

/// Best-effort resident set size of the current process, read from
/// `/proc/self/statm` (Linux only — `0` elsewhere or on any parse failure).
fn process_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let Ok(contents) = std::fs::read_to_string("/proc/self/statm") else {
            return 0;
        };
        let page_size = 4096u64;
        contents
            .split_whitespace()
            .nth(1)
            .and_then(|pages| pages.parse::<u64>().ok())
            .map(|pages| pages * page_size)
            .unwrap_or(0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

async fn ticker(manager: Arc<SessionManager>, cancellation_token: CancellationToken) {
    let mut interval = tokio::time::interval(manager.config.stats_tick_interval);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let sessions: Vec<Arc<Session>> =
            manager.sessions.lock().values().map(|entry| Arc::clone(&entry.session)).collect();
        for session in &sessions {
            session.roll_statistics();
        }

        let expired: Vec<WorkspaceKey> = {
            let workspaces = manager.workspaces.lock();
            workspaces
                .iter()
                .filter(|(_, workspace)| {
                    !workspace.is_closing()
                        && workspace.session_count() == 0
                        && workspace.soft_shutdown.load(Ordering::Acquire) > 0
                        && workspace.soft_shutdown.fetch_sub(1, Ordering::AcqRel) == 1
                })
                .map(|(key, _)| key.clone())
                .collect()
        };
        for key in expired {
            manager.close_all(&key, None, close_code::SHUTTING_DOWN, CloseReason::Shutdown).await;
        }

        let countdown = {
            let mut maintenance = manager.maintenance.lock();
            maintenance.as_mut().map(|state| {
                let remaining = state.remaining_minutes;
                if remaining > 0 {
                    state.remaining_minutes -= 1;
                }
                remaining
            })
        };
        if let Some(remaining) = countdown {
            if remaining == 0 {
                *manager.maintenance.lock() = None;
                manager.shutdown_all().await;
            } else {
                let notice = gateway_types::wire::StatusNotice::Maintenance { remaining };
                let payload = serde_json::to_value(notice).expect("StatusNotice always serializes");
                let workspace_keys: Vec<WorkspaceKey> = manager.workspaces.lock().keys().cloned().collect();
                for key in workspace_keys {
                    manager
                        .deliver_broadcast(BroadcastMessage { from: None, workspace: key, payload: payload.clone(), target: None })
                        .await;
                }
            }
        }
    }
}
