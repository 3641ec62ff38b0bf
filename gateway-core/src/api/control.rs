//! Statistics and management HTTP endpoints (§4.E, §6).
//!
//! Both endpoints take the bearer token as a `token` query parameter
//! rather than a header, mirroring the handshake's own URL-carried token.
//! An invalid, missing, or under-privileged token yields `404` — the same
//! response as a route that does not exist, so an attacker probing for
//! admin endpoints cannot distinguish the two (§9 Admin 404 vs 401).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use gateway_types::token::TokenDecoderService;
use serde::{Deserialize, Serialize};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::manager::SessionManager;
use std::sync::Arc;

/// State shared by the control-plane endpoints.
#[derive(Clone)]
pub struct ControlState {
    /// Decodes and verifies the bearer token carried as a query parameter.
    pub token_decoder: TokenDecoderService,
    /// The session/workspace registry.
    pub manager: Arc<SessionManager>,
    /// The model version string reported by `/version`.
    pub model_version: String,
}

/// Mounts `/api/v1/version`, `/api/v1/statistics`, and `/api/v1/manage`.
pub fn routes(state: ControlState) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/statistics", get(statistics))
        .route("/manage", put(manage))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderValue::from_static("no-cache"),
        ))
        .with_state(state)
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    model_version: String,
}

async fn version(State(state): State<ControlState>) -> impl IntoResponse {
    Json(VersionResponse { version: env!("CARGO_PKG_VERSION"), model_version: state.model_version })
}

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

async fn statistics(State(state): State<ControlState>, Query(query): Query<TokenQuery>) -> axum::response::Response {
    let Ok(token) = state.token_decoder.decode(&query.token).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let aggregate = state.manager.aggregate_statistics();
    if token.is_admin() {
        let workspaces = state.manager.admin_statistics();
        Json(serde_json::json!({
            "sessionCount": aggregate.session_count,
            "workspaceCount": aggregate.workspace_count,
            "memoryBytes": aggregate.memory_bytes,
            "workspaces": workspaces,
        }))
        .into_response()
    } else {
        Json(serde_json::json!({
            "sessionCount": aggregate.session_count,
            "workspaceCount": aggregate.workspace_count,
            "memoryBytes": aggregate.memory_bytes,
        }))
        .into_response()
    }
}

#[derive(Deserialize)]
struct ManageQuery {
    token: String,
    operation: String,
    #[serde(default)]
    workspace: Option<String>,
    #[serde(default)]
    minutes: Option<u32>,
}

async fn manage(State(state): State<ControlState>, Query(query): Query<ManageQuery>) -> axum::response::Response {
    let Ok(token) = state.token_decoder.decode(&query.token).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !token.is_admin() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match query.operation.as_str() {
        "maintenance" => {
            state.manager.schedule_maintenance(query.minutes.unwrap_or(1));
            StatusCode::OK.into_response()
        }
        "wipe-statistics" => {
            state.manager.wipe_statistics();
            StatusCode::OK.into_response()
        }
        "force-close" => {
            let Some(workspace_key) = query.workspace.map(gateway_types::workspace::WorkspaceKey::from_canonical)
            else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            state.manager.force_close(&workspace_key).await;
            StatusCode::OK.into_response()
        }
        "reboot" => {
            state.manager.shutdown_all().await;
            state.manager.cancellation_token().cancel();
            StatusCode::OK.into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
