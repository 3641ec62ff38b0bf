use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gateway_core::GatewayBuilder;
use gateway_core::config::GatewayConfig;
use tokio_util::sync::CancellationToken;

use crate::pipeline::InMemoryPipelineFactory;
use crate::token_decoder::DevTokenDecoder;

mod pipeline;
mod token_decoder;

/// Top-level configuration for the `gateway-node` binary: the listener
/// address and shutdown grace period, flattened with the gateway's own
/// configuration.
#[derive(Parser, Debug)]
struct NodeConfig {
    /// The bind address of the axum server.
    #[clap(long, env = "GATEWAY_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// Max time the process waits for in-flight connections to drain
    /// during shutdown before giving up.
    #[clap(
        long,
        env = "GATEWAY_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    max_wait_time_shutdown: Duration,

    #[clap(flatten)]
    gateway_config: GatewayConfig,
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    tracing::info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::parse();
    match run(config).await {
        Ok(()) => {
            tracing::info!("good night!");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(config: NodeConfig) -> eyre::Result<()> {
    tracing::info!(bind_addr = %config.bind_addr, "starting gateway with config: {:#?}", config.gateway_config);

    // The out-of-scope collaborators a real deployment supplies: an
    // authentication token issuer and a domain engine. These dev-only
    // stand-ins require `GATEWAY_ENVIRONMENT=dev`.
    let token_decoder = Arc::new(DevTokenDecoder::new(config.gateway_config.environment));
    let pipeline_factory = Arc::new(InMemoryPipelineFactory);

    let cancellation_token = CancellationToken::new();
    let (router, ticker_handle) =
        GatewayBuilder::new(config.gateway_config, token_decoder, pipeline_factory)
            .build(cancellation_token.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    let axum_cancel_token = cancellation_token.clone();
    let server = tokio::spawn(async move {
        tracing::info!("listening on {local_addr}");
        let shutdown = axum_cancel_token.clone();
        let result = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(err) = result {
            tracing::error!("axum server error: {err:?}");
        }
        axum_cancel_token.cancel();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = cancellation_token.cancelled() => {
            tracing::info!("shutdown requested by the `reboot` admin operation");
        }
    }
    cancellation_token.cancel();

    tracing::info!("waiting up to {:?} for shutdown", config.max_wait_time_shutdown);
    if tokio::time::timeout(config.max_wait_time_shutdown, async {
        let _ = tokio::join!(server, ticker_handle);
    })
    .await
    .is_err()
    {
        tracing::warn!("could not finish shutdown within the grace period");
    }
    Ok(())
}
