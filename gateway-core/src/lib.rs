#![deny(missing_docs)]
//! This crate provides the core of the realtime collaboration gateway: a
//! single-listener server that authenticates connections with a bearer
//! token, multiplexes them onto per-workspace pipelines, and brokers the
//! request/response and broadcast traffic between clients and those
//! pipelines.
//!
//! Hosting applications never see the session/workspace registry
//! directly. The entry point is [`GatewayBuilder`]: it takes a
//! [`gateway_types::token::TokenDecoderService`] (the authentication
//! token issuer is an out-of-scope collaborator) and a
//! [`gateway_types::pipeline::PipelineFactoryService`] (the domain engine
//! is likewise out of scope), and returns an `axum::Router` ready to be
//! served, plus a `JoinHandle` for the background ticker that rolls
//! session statistics and drives soft-shutdown/maintenance expiry.
//!
//! To shut down gracefully, cancel the `CancellationToken` passed to
//! [`GatewayBuilder::build`] and await the returned `JoinHandle`; this
//! ensures the ticker has stopped mutating the registry before the
//! hosting application exits.

use std::sync::Arc;

use axum::Router;
use gateway_types::pipeline::PipelineFactoryService;
use gateway_types::token::TokenDecoderService;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::api::control::{self, ControlState};
use crate::api::ws::{self, GatewayState};
use crate::config::GatewayConfig;
use crate::manager::{ManagerConfig, SessionManager};

pub(crate) mod api;
pub mod codec;
pub mod compression;
pub mod config;
pub mod connection;
pub mod manager;
pub mod metrics;
pub mod session;
pub mod workspace;

pub use manager::{AddSessionOutcome, AddSessionRequest, CloseReason};

/// Builds the gateway's `axum::Router` from a [`GatewayConfig`] and the
/// two out-of-scope collaborators the hosting application supplies.
pub struct GatewayBuilder {
    config: GatewayConfig,
    token_decoder: TokenDecoderService,
    pipeline_factory: PipelineFactoryService,
}

impl GatewayBuilder {
    /// Starts building a gateway. Registers this crate's metrics
    /// descriptions immediately so they appear in `/metrics` output even
    /// before the first session attaches.
    pub fn new(
        config: GatewayConfig,
        token_decoder: TokenDecoderService,
        pipeline_factory: PipelineFactoryService,
    ) -> Self {
        metrics::describe_metrics();
        Self { config, token_decoder, pipeline_factory }
    }

    /// Builds the session manager and the full router: the
    /// connection-upgrade handshake at `/{token}` and the control plane
    /// under `/api/v1`.
    ///
    /// The returned `JoinHandle` is the manager's background ticker;
    /// await it after cancelling `cancellation_token` for a clean
    /// shutdown.
    pub fn build(self, cancellation_token: CancellationToken) -> (Router, tokio::task::JoinHandle<()>) {
        let (manager, ticker_handle) = SessionManager::new(
            self.pipeline_factory,
            ManagerConfig {
                soft_shutdown_ticks: self.config.soft_shutdown_ticks,
                stats_tick_interval: self.config.stats_tick_interval,
                enable_compression: self.config.enable_compression,
            },
            cancellation_token,
        );

        let gateway_state = GatewayState {
            token_decoder: Arc::clone(&self.token_decoder),
            manager: Arc::clone(&manager),
            product_id: self.config.product_id.clone(),
            enable_compression: self.config.enable_compression,
            ws_max_message_size: self.config.ws_max_message_size,
        };
        let control_state = ControlState {
            token_decoder: self.token_decoder,
            manager,
            model_version: self.config.model_version.clone(),
        };

        let router = ws::routes(gateway_state)
            .nest("/api/v1", control::routes(control_state))
            .layer(TraceLayer::new_for_http());
        (router, ticker_handle)
    }
}
