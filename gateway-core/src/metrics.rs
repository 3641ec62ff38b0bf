//! Metrics definitions for the collaboration gateway.
//!
//! This module defines all metric keys the gateway emits and provides a
//! helper [`describe_metrics`] to set metadata for each metric using the
//! `metrics` crate.

/// Metrics key for the number of currently attached sessions.
pub const METRICS_ID_SESSIONS_OPEN: &str = "gateway.sessions.open";
/// Metrics key for the number of currently live workspaces.
pub const METRICS_ID_WORKSPACES_OPEN: &str = "gateway.workspaces.open";
/// Metrics key for handshakes rejected for carrying an unauthorized token.
pub const METRICS_ID_HANDSHAKE_UNAUTHORIZED: &str = "gateway.handshake.unauthorized";
/// Metrics key for sessions admitted via `addSession`.
pub const METRICS_ID_SESSIONS_ADMITTED: &str = "gateway.sessions.admitted";
/// Metrics key for sessions evicted by a reconnect using the same session id.
pub const METRICS_ID_SESSIONS_RECONNECTED: &str = "gateway.sessions.reconnected";
/// Metrics key for workspaces that failed pipeline construction.
pub const METRICS_ID_WORKSPACE_BOOT_FAILURES: &str = "gateway.workspace.boot_failures";
/// Metrics key for completed broadcasts, counted once per recipient socket.
pub const METRICS_ID_BROADCAST_DELIVERED: &str = "gateway.broadcast.delivered";
/// Metrics key for broadcast writes that failed and closed their socket.
pub const METRICS_ID_BROADCAST_FAILED: &str = "gateway.broadcast.failed";
/// Metrics key for the number of bytes written to a socket by one `send`.
pub const METRICS_ID_SEND_DATA: &str = "gateway.connection.send_bytes";
/// Metrics key for the duration of a `findAll` pipeline call.
pub const METRICS_ID_FIND_ALL_DURATION: &str = "gateway.pipeline.find_all.duration";
/// Metrics key for the duration of a `tx` pipeline call.
pub const METRICS_ID_TX_DURATION: &str = "gateway.pipeline.tx.duration";
/// Metrics key for workspaces forced through an upgrade.
pub const METRICS_ID_WORKSPACE_UPGRADES: &str = "gateway.workspace.upgrades";
/// Metrics key for workspaces torn down by soft-shutdown expiry.
pub const METRICS_ID_SOFT_SHUTDOWNS: &str = "gateway.workspace.soft_shutdowns";

/// Describe all metrics used by the gateway.
///
/// This calls the `describe_*` functions from the `metrics` crate to set
/// metadata on the different metrics.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_SESSIONS_OPEN,
        metrics::Unit::Count,
        "Number of sessions currently attached to a workspace"
    );

    metrics::describe_gauge!(
        METRICS_ID_WORKSPACES_OPEN,
        metrics::Unit::Count,
        "Number of workspaces currently tracked by the registry"
    );

    metrics::describe_counter!(
        METRICS_ID_HANDSHAKE_UNAUTHORIZED,
        metrics::Unit::Count,
        "Number of handshakes rejected for an invalid or mismatched token"
    );

    metrics::describe_counter!(
        METRICS_ID_SESSIONS_ADMITTED,
        metrics::Unit::Count,
        "Number of sessions successfully admitted via addSession"
    );

    metrics::describe_counter!(
        METRICS_ID_SESSIONS_RECONNECTED,
        metrics::Unit::Count,
        "Number of sessions evicted because a reconnect reused their session id"
    );

    metrics::describe_counter!(
        METRICS_ID_WORKSPACE_BOOT_FAILURES,
        metrics::Unit::Count,
        "Number of workspaces torn down because the pipeline factory failed"
    );

    metrics::describe_counter!(
        METRICS_ID_BROADCAST_DELIVERED,
        metrics::Unit::Count,
        "Number of broadcast writes delivered to a session"
    );

    metrics::describe_counter!(
        METRICS_ID_BROADCAST_FAILED,
        metrics::Unit::Count,
        "Number of broadcast writes that failed and closed their socket"
    );

    metrics::describe_histogram!(
        METRICS_ID_SEND_DATA,
        metrics::Unit::Bytes,
        "Size in bytes of a single frame written to a connection socket"
    );

    metrics::describe_histogram!(
        METRICS_ID_FIND_ALL_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of a findAll call against a workspace pipeline"
    );

    metrics::describe_histogram!(
        METRICS_ID_TX_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of a tx call against a workspace pipeline"
    );

    metrics::describe_counter!(
        METRICS_ID_WORKSPACE_UPGRADES,
        metrics::Unit::Count,
        "Number of times a workspace entered the upgrade state"
    );

    metrics::describe_counter!(
        METRICS_ID_SOFT_SHUTDOWNS,
        metrics::Unit::Count,
        "Number of workspaces torn down by soft-shutdown expiry"
    );
}
