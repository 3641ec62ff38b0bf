use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gateway_core::GatewayBuilder;
use gateway_core::config::{Environment, GatewayConfig};
use gateway_types::pipeline::{
    BroadcastFn, BroadcastMessage, Pipeline, PipelineError, PipelineFactory, PipelineFactoryService,
    PipelineHandle,
};
use gateway_types::token::{Token, TokenDecodeError, TokenDecoder, TokenExtra};
use gateway_types::wire::{Request, RequestId, Response};
use gateway_types::workspace::{WorkspaceId, WorkspaceKey};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub const TEST_PRODUCT_ID: &str = "test-product";

/// Decodes a token as base64(JSON) with no verification; mirrors
/// `gateway-node`'s dev decoder, kept separately here so test tokens don't
/// depend on the binary crate.
pub struct JsonTokenDecoder;

#[async_trait]
impl TokenDecoder for JsonTokenDecoder {
    async fn decode(&self, raw: &str) -> Result<Token, TokenDecodeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|err| TokenDecodeError::Malformed(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| TokenDecodeError::Malformed(err.to_string()))
    }
}

pub fn encode_token(token: &Token) -> String {
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(token).expect("Token always serializes"))
}

pub fn test_workspace(name: &str) -> WorkspaceId {
    WorkspaceId {
        name: name.to_owned(),
        product_id: TEST_PRODUCT_ID.to_owned(),
        url: "https://accounts.example.com/w".parse().unwrap(),
    }
}

pub fn test_token(workspace: WorkspaceId, email: &str) -> Token {
    Token { account_email: email.to_owned(), workspace, extra: None }
}

pub fn admin_token(workspace: WorkspaceId, email: &str) -> Token {
    Token {
        account_email: email.to_owned(),
        workspace,
        extra: Some(TokenExtra { admin: true, ..Default::default() }),
    }
}

pub fn upgrade_token(workspace: WorkspaceId, email: &str) -> Token {
    Token {
        account_email: email.to_owned(),
        workspace,
        extra: Some(TokenExtra {
            role: Some(gateway_types::token::Role::Upgrade),
            ..Default::default()
        }),
    }
}

/// A pipeline that echoes `findAll` and rebroadcasts the submitted `tx`
/// value verbatim, counting how often it is constructed so tests can
/// assert the single-construction-per-workspace invariant.
pub struct CountingPipelineFactory {
    pub construction_count: Arc<AtomicUsize>,
}

impl CountingPipelineFactory {
    pub fn new() -> Self {
        Self { construction_count: Arc::new(AtomicUsize::new(0)) }
    }
}

#[async_trait]
impl PipelineFactory for CountingPipelineFactory {
    async fn create(
        &self,
        workspace: WorkspaceId,
        _upgrade: bool,
        broadcast: BroadcastFn,
    ) -> Result<PipelineHandle, PipelineError> {
        self.construction_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EchoPipeline { workspace_key: workspace.canonical(), broadcast }))
    }
}

struct EchoPipeline {
    workspace_key: WorkspaceKey,
    broadcast: BroadcastFn,
}

#[async_trait]
impl Pipeline for EchoPipeline {
    async fn find_all(&self, class: &str, query: Value, _options: Value) -> Result<Value, PipelineError> {
        Ok(serde_json::json!({ "class": class, "echoed": query }))
    }

    async fn tx(&self, tx: Value) -> Result<Value, PipelineError> {
        (self.broadcast)(BroadcastMessage {
            from: None,
            workspace: self.workspace_key.clone(),
            payload: tx.clone(),
            target: None,
        });
        Ok(tx)
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        environment: Environment::Dev,
        port: 0,
        product_id: TEST_PRODUCT_ID.to_owned(),
        accounts_service_url: "https://accounts.example.com".parse().unwrap(),
        model_version: "test".to_owned(),
        enable_compression: true,
        ws_max_message_size: 65536,
        soft_shutdown_ticks: 1,
        stats_tick_interval: Duration::from_millis(60),
    }
}

pub struct TestGateway {
    pub server: TestServer,
    pub pipeline_factory: Arc<CountingPipelineFactory>,
    pub cancellation_token: CancellationToken,
}

impl TestGateway {
    pub async fn start() -> Self {
        Self::start_with_config(test_config()).await
    }

    pub async fn start_with_config(config: GatewayConfig) -> Self {
        let pipeline_factory = Arc::new(CountingPipelineFactory::new());
        let cancellation_token = CancellationToken::new();
        let (router, _ticker) = GatewayBuilder::new(
            config,
            Arc::new(JsonTokenDecoder),
            Arc::clone(&pipeline_factory) as PipelineFactoryService,
        )
        .build(cancellation_token.clone());
        let server = TestServer::builder()
            .http_transport()
            .build(router.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .expect("can build test server");
        Self { server, pipeline_factory, cancellation_token }
    }

    pub fn handshake_path(&self, token: &Token, query: &HashMap<&str, String>) -> String {
        let mut path = format!("/{}", encode_token(token));
        if !query.is_empty() {
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            path.push('?');
            path.push_str(&pairs.join("&"));
        }
        path
    }
}

/// Prepends the plain-frame flag byte used by `gateway_core::codec` and
/// returns a `String` suitable for a text-frame request, since a JSON
/// request never clears the 1 KiB compression threshold in these tests.
pub fn frame_request(request: &Request) -> String {
    let json = serde_json::to_vec(request).expect("Request always serializes");
    let mut framed = Vec::with_capacity(json.len() + 1);
    framed.push(0u8);
    framed.extend_from_slice(&json);
    String::from_utf8(framed).expect("flag byte 0 plus JSON is valid UTF-8")
}

/// Strips the plain-frame flag byte and decodes a `Response`, the inverse
/// of [`frame_request`].
pub fn unframe_response(text: &str) -> Response {
    let bytes = text.as_bytes();
    let (_flag, rest) = bytes.split_first().expect("response frame carries a flag byte");
    serde_json::from_slice(rest).expect("response frame decodes to Response")
}

pub fn find_all_request(id: i64, class: &str) -> Request {
    Request {
        id: RequestId::Number(id),
        method: "findAll".to_owned(),
        params: serde_json::json!({ "class": class }),
    }
}

pub fn tx_request(id: i64, class: &str, record: Value) -> Request {
    Request {
        id: RequestId::Number(id),
        method: "tx".to_owned(),
        params: serde_json::json!({ "class": class, "record": record }),
    }
}
