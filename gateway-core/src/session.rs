//! Per-connection session state (§4.B).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use gateway_types::pipeline::PipelineError;
use gateway_types::wire::RequestId;
use gateway_types::workspace::WorkspaceKey;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::metrics::{METRICS_ID_FIND_ALL_DURATION, METRICS_ID_TX_DURATION};
use crate::workspace::Workspace;

/// Counts of requests served, split by kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCounts {
    /// Number of completed `findAll` requests.
    pub find_count: u64,
    /// Number of completed `tx` requests.
    pub tx_count: u64,
}

/// A blended estimate of request rate over roughly a five-minute window.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedCounts {
    /// Blended `findAll` rate.
    pub find_count: f64,
    /// Blended `tx` rate.
    pub tx_count: f64,
}

/// `{total, current, mins5}` statistics tracked per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStatistics {
    /// Monotone counts since session creation.
    pub total: RequestCounts,
    /// Counts since the last rolling-window tick.
    pub current: RequestCounts,
    /// The blended five-minute-window estimate.
    pub mins5: WindowedCounts,
}

#[derive(Debug, Clone, Copy)]
enum RequestKind {
    Find,
    Tx,
}

struct PendingRequest {
    #[allow(dead_code)]
    params: Value,
    #[allow(dead_code)]
    start_time: Instant,
}

/// Per-connection state: identity, the workspace's pipeline, in-flight
/// requests, and rolling statistics.
///
/// Invariant: a `Session` is a member of exactly one workspace's
/// `sessions` map while `workspace_closed() == false`; the manager is
/// solely responsible for upholding this.
pub struct Session {
    /// This session's id, stable across reconnects that supply it.
    pub session_id: Uuid,
    /// When this session was created.
    pub create_time: DateTime<Utc>,
    /// The account email this session's token was issued to.
    pub account_email: String,
    /// The canonical key of the workspace this session is attached to.
    pub workspace_key: WorkspaceKey,
    /// Whether outbound frames use `Message::Binary`/CBOR for this session.
    pub binary_mode: bool,
    /// Whether this session wants outbound frames compressed.
    pub use_compression: bool,
    /// Whether this session receives broadcasts at all.
    pub use_broadcast: bool,
    upgrade_client: bool,
    workspace: Arc<Workspace>,
    last_request: Mutex<DateTime<Utc>>,
    requests: Mutex<HashMap<RequestId, PendingRequest>>,
    statistics: Mutex<SessionStatistics>,
    workspace_closed: AtomicBool,
}

/// Construction parameters for a new [`Session`], grouped to keep the
/// constructor call sites in [`crate::manager::SessionManager`] readable.
pub(crate) struct NewSession {
    pub session_id: Uuid,
    pub account_email: String,
    pub workspace: Arc<Workspace>,
    pub workspace_key: WorkspaceKey,
    pub binary_mode: bool,
    pub use_compression: bool,
    pub use_broadcast: bool,
    pub upgrade_client: bool,
}

impl Session {
    pub(crate) fn new(params: NewSession) -> Self {
        let now = Utc::now();
        Self {
            session_id: params.session_id,
            create_time: now,
            account_email: params.account_email,
            workspace_key: params.workspace_key,
            binary_mode: params.binary_mode,
            use_compression: params.use_compression,
            use_broadcast: params.use_broadcast,
            upgrade_client: params.upgrade_client,
            workspace: params.workspace,
            last_request: Mutex::new(now),
            requests: Mutex::new(HashMap::new()),
            statistics: Mutex::new(SessionStatistics::default()),
            workspace_closed: AtomicBool::new(false),
        }
    }

    /// The workspace this session is attached to.
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// `true` iff the token this session was minted from carried the
    /// `upgrade` role. Such sessions bypass a workspace's upgrade
    /// admission guard and are excluded from statistics broadcasts.
    pub fn is_upgrade_client(&self) -> bool {
        self.upgrade_client
    }

    /// When this session last completed a request.
    pub fn last_request(&self) -> DateTime<Utc> {
        *self.last_request.lock()
    }

    /// A snapshot of the current statistics.
    pub fn statistics(&self) -> SessionStatistics {
        *self.statistics.lock()
    }

    /// Zeroes this session's statistics; used by the `wipe-statistics`
    /// admin operation. Does not touch the pending-requests table.
    pub(crate) fn wipe_statistics(&self) {
        *self.statistics.lock() = SessionStatistics::default();
    }

    pub(crate) fn mark_workspace_closed(&self) {
        self.workspace_closed.store(true, Ordering::Release);
    }

    /// `true` once the workspace this session belonged to has torn down.
    pub fn workspace_closed(&self) -> bool {
        self.workspace_closed.load(Ordering::Acquire)
    }

    /// Liveness probe; returns an opaque token the caller need only echo
    /// back. Does not touch statistics or `lastRequest`.
    pub fn ping(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Number of requests currently tracked in the pending table.
    pub fn pending_request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn begin_request(&self, id: RequestId, params: Value) {
        self.requests
            .lock()
            .insert(id, PendingRequest { params, start_time: Instant::now() });
    }

    fn complete_request(&self, id: &RequestId, kind: RequestKind) {
        self.requests.lock().remove(id);
        *self.last_request.lock() = Utc::now();
        let mut stats = self.statistics.lock();
        match kind {
            RequestKind::Find => {
                stats.current.find_count += 1;
                stats.total.find_count += 1;
            }
            RequestKind::Tx => {
                stats.current.tx_count += 1;
                stats.total.tx_count += 1;
            }
        }
    }

    /// Drops bookkeeping for a request that never completed (pipeline
    /// rejection, socket closed mid-flight). Statistics are untouched.
    fn cancel_request(&self, id: &RequestId) {
        self.requests.lock().remove(id);
    }

    /// Promotes `current` into `mins5` with a weighted blend and resets
    /// `current`; invoked once a minute by the manager's ticker.
    pub(crate) fn roll_statistics(&self) {
        let mut stats = self.statistics.lock();
        stats.mins5.find_count = 0.8 * stats.mins5.find_count + 0.2 * stats.current.find_count as f64;
        stats.mins5.tx_count = 0.8 * stats.mins5.tx_count + 0.2 * stats.current.tx_count as f64;
        stats.current = RequestCounts::default();
    }

    /// Executes a `findAll` against the workspace's pipeline.
    pub async fn find_all(
        &self,
        id: RequestId,
        class: &str,
        query: Value,
        options: Value,
    ) -> Result<Value, PipelineError> {
        self.begin_request(id.clone(), query.clone());
        let pipeline = match self.workspace.pipeline.clone().await {
            Ok(pipeline) => pipeline,
            Err(err) => {
                self.cancel_request(&id);
                return Err(err);
            }
        };
        let start = Instant::now();
        let result = pipeline.find_all(class, query, options).await;
        metrics::histogram!(METRICS_ID_FIND_ALL_DURATION).record(start.elapsed().as_millis() as f64);
        match &result {
            Ok(_) => self.complete_request(&id, RequestKind::Find),
            Err(_) => self.cancel_request(&id),
        }
        result
    }

    /// Executes a `tx` against the workspace's pipeline.
    pub async fn tx(&self, id: RequestId, transaction: Value) -> Result<Value, PipelineError> {
        self.begin_request(id.clone(), transaction.clone());
        let pipeline = match self.workspace.pipeline.clone().await {
            Ok(pipeline) => pipeline,
            Err(err) => {
                self.cancel_request(&id);
                return Err(err);
            }
        };
        let start = Instant::now();
        let result = pipeline.tx(transaction).await;
        metrics::histogram!(METRICS_ID_TX_DURATION).record(start.elapsed().as_millis() as f64);
        match &result {
            Ok(_) => self.complete_request(&id, RequestKind::Tx),
            Err(_) => self.cancel_request(&id),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::workspace::WorkspaceId;

    fn pending_pipeline() -> crate::workspace::Workspace {
        let fut: futures::future::BoxFuture<'static, Result<gateway_types::pipeline::PipelineHandle, PipelineError>> =
            Box::pin(std::future::pending());
        crate::workspace::Workspace::new(
            WorkspaceId {
                name: "acme".to_owned(),
                product_id: "prod".to_owned(),
                url: "https://example.com".parse().unwrap(),
            },
            futures::FutureExt::shared(fut),
        )
    }

    #[test]
    fn rolling_window_blends_and_resets_current() {
        let workspace = Arc::new(pending_pipeline());
        let session = Session::new(NewSession {
            session_id: Uuid::new_v4(),
            account_email: "a@example.com".to_owned(),
            workspace: workspace.clone(),
            workspace_key: workspace.workspace_id.canonical(),
            binary_mode: false,
            use_compression: false,
            use_broadcast: true,
            upgrade_client: false,
        });
        session.complete_request(&RequestId::Number(1), RequestKind::Find);
        session.complete_request(&RequestId::Number(2), RequestKind::Find);
        assert_eq!(session.statistics().current.find_count, 2);
        assert_eq!(session.statistics().total.find_count, 2);

        session.roll_statistics();
        let stats = session.statistics();
        assert_eq!(stats.current.find_count, 0);
        assert!((stats.mins5.find_count - 0.4).abs() < f64::EPSILON);
        assert_eq!(stats.total.find_count, 2, "total is monotone across rolls");
    }

    #[test]
    fn ping_does_not_touch_statistics_or_last_request() {
        let workspace = Arc::new(pending_pipeline());
        let session = Session::new(NewSession {
            session_id: Uuid::new_v4(),
            account_email: "a@example.com".to_owned(),
            workspace: workspace.clone(),
            workspace_key: workspace.workspace_id.canonical(),
            binary_mode: false,
            use_compression: false,
            use_broadcast: true,
            upgrade_client: false,
        });
        let before = session.last_request();
        let _ = session.ping();
        assert_eq!(session.last_request(), before);
        assert_eq!(session.statistics().total.find_count, 0);
    }

    #[test]
    fn cancel_drops_pending_entry_without_touching_statistics() {
        let workspace = Arc::new(pending_pipeline());
        let session = Session::new(NewSession {
            session_id: Uuid::new_v4(),
            account_email: "a@example.com".to_owned(),
            workspace,
            workspace_key: WorkspaceId {
                name: "acme".to_owned(),
                product_id: "prod".to_owned(),
                url: "https://example.com".parse().unwrap(),
            }
            .canonical(),
            binary_mode: false,
            use_compression: false,
            use_broadcast: true,
            upgrade_client: false,
        });
        session.begin_request(RequestId::Number(1), Value::Null);
        assert_eq!(session.pending_request_count(), 1);
        session.cancel_request(&RequestId::Number(1));
        assert_eq!(session.pending_request_count(), 0);
        assert_eq!(session.statistics().total.find_count, 0);
    }
}
