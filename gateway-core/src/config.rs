//! Configuration types and CLI/environment parsing for the gateway.
//!
//! The environment this binds to is read once at startup (§6 of the
//! design document): listener port, the product id sessions are checked
//! against, the accounts-service URL used to build workspace links, the
//! model version string, and the compression feature flag.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use url::Url;

/// The environment the gateway is running in.
///
/// Mirrors the production/development split used throughout the
/// surrounding stack; primarily exists so `assert_is_dev` can guard
/// dev-only conveniences (e.g. permissive CORS, verbose error bodies).
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Environment {
    /// Production environment.
    Prod,
    /// Development environment.
    Dev,
}

impl Environment {
    /// Asserts that `Environment` is `dev`. Panics if not the case.
    pub fn assert_is_dev(&self) {
        assert!(matches!(self, Environment::Dev), "is not dev environment")
    }
}

/// The configuration for the gateway's core functionality.
///
/// Configurable via environment variables or command line arguments
/// using `clap`. Hosting binaries may flatten this with
/// `#[clap(flatten)]` into a larger config struct.
#[derive(Parser, Debug, Clone)]
pub struct GatewayConfig {
    /// The environment of the gateway (either `prod` or `dev`).
    #[clap(long, env = "GATEWAY_ENVIRONMENT", default_value = "prod")]
    pub environment: Environment,

    /// The TCP port the listener binds.
    #[clap(long, env = "GATEWAY_PORT", default_value = "8080")]
    pub port: u16,

    /// The product id every connecting token's workspace must match.
    ///
    /// A handshake whose token carries a different product id is
    /// rejected with `UNAUTHORIZED`.
    #[clap(long, env = "GATEWAY_PRODUCT_ID")]
    pub product_id: String,

    /// Base URL of the accounts service, used only to build workspace
    /// redirect links returned to clients; never called by the gateway.
    #[clap(long, env = "GATEWAY_ACCOUNTS_SERVICE_URL")]
    pub accounts_service_url: Url,

    /// The model version string reported to clients in handshake and
    /// statistics responses.
    #[clap(long, env = "GATEWAY_MODEL_VERSION")]
    pub model_version: String,

    /// Enables per-message deflate compression negotiation.
    #[clap(long, env = "GATEWAY_ENABLE_COMPRESSION", default_value = "true")]
    pub enable_compression: bool,

    /// Max message size the websocket connection accepts.
    #[clap(long, env = "GATEWAY_MAX_MESSAGE_SIZE", default_value = "65536")]
    pub ws_max_message_size: usize,

    /// Number of one-minute ticks an empty workspace is kept alive
    /// before eviction, absorbing client reconnects.
    #[clap(long, env = "GATEWAY_SOFT_SHUTDOWN_TICKS", default_value = "2")]
    pub soft_shutdown_ticks: u32,

    /// Interval of the statistics rolling-window ticker.
    #[clap(
        long,
        env = "GATEWAY_STATS_TICK_INTERVAL",
        default_value = "1min",
        value_parser = humantime::parse_duration
    )]
    pub stats_tick_interval: Duration,
}
