//! The connection-upgrade endpoint: handshake, admission, and the
//! per-frame dispatch loop for one session (§4.E).
//!
//! The handshake always completes at the transport level, even on
//! rejection — clients must observe a protocol-level `UNAUTHORIZED` close
//! frame, never a raw TCP reset.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, close_code as axum_close_code};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::response::Response as HttpResponse;
use axum::routing::any;
use axum::{Router, http::HeaderMap};
use futures::{SinkExt as _, StreamExt as _};
use gateway_types::errors::{ErrorCode, close_code};
use gateway_types::token::TokenDecoderService;
use gateway_types::wire::{Request, Response, StatusNotice, UnauthorizedNotice, UpgradeNotice};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::errors::Error;
use crate::codec::{decode_request, encode_response};
use crate::manager::{AddSessionOutcome, AddSessionRequest, SessionManager};
use crate::session::Session;

/// Everything the handshake handler needs, threaded through as axum state.
#[derive(Clone)]
pub struct GatewayState {
    /// Decodes and verifies the bearer token carried in the handshake URL.
    pub token_decoder: TokenDecoderService,
    /// The session/workspace registry.
    pub manager: Arc<SessionManager>,
    /// The product id every connecting token's workspace must match.
    pub product_id: String,
    /// Whether compression is honored for sessions that request it.
    pub enable_compression: bool,
    /// Max websocket message size, applied to the upgrade.
    pub ws_max_message_size: usize,
}

#[derive(Debug, Deserialize)]
struct HandshakeQuery {
    #[serde(rename = "sessionId", default)]
    session_id: Option<Uuid>,
    #[serde(default)]
    binary: bool,
    #[serde(default)]
    compress: bool,
    #[serde(default = "default_true")]
    broadcast: bool,
}

fn default_true() -> bool {
    true
}

/// Mounts the connection-upgrade endpoint at `/{token}`.
pub fn routes(state: GatewayState) -> Router {
    Router::new().route("/{token}", any(handshake)).with_state(state)
}

async fn handshake(
    State(state): State<GatewayState>,
    Path(raw_token): Path<String>,
    Query(query): Query<HandshakeQuery>,
    ConnectInfo(remote_address): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> HttpResponse {
    let user_agent = header_str(&headers, axum::http::header::USER_AGENT);
    let accept_language = header_str(&headers, axum::http::header::ACCEPT_LANGUAGE);

    let token = match state.token_decoder.decode(&raw_token).await {
        Ok(token) if token.workspace.product_id == state.product_id => Ok(token),
        Ok(_) => Err("token workspace does not belong to this product".to_owned()),
        Err(err) => Err(err.to_string()),
    };

    ws.max_message_size(state.ws_max_message_size)
        .on_failed_upgrade(|err| {
            tracing::warn!("could not establish websocket connection: {err:?}");
        })
        .on_upgrade(move |socket| async move {
            match token {
                Err(reason) => {
                    metrics::counter!(crate::metrics::METRICS_ID_HANDSHAKE_UNAUTHORIZED).increment(1);
                    reject_unauthorized(socket, reason).await;
                }
                Ok(token) => {
                    let metadata = crate::connection::ConnectionMetadata {
                        remote_address: remote_address.to_string(),
                        user_agent,
                        accept_language,
                        account_email: token.account_email.clone(),
                        mode: token.extra.as_ref().and_then(|e| e.mode.clone()),
                        model: token.extra.as_ref().and_then(|e| e.model.clone()),
                    };
                    let (sink, stream) = socket.split();
                    let connection = crate::connection::ConnectionSocket::spawn(sink, metadata);

                    let outcome = state
                        .manager
                        .add_session(AddSessionRequest {
                            token,
                            prior_session_id: query.session_id,
                            socket: Arc::clone(&connection),
                            binary_mode: query.binary,
                            use_compression: query.compress,
                            use_broadcast: query.broadcast,
                        })
                        .await;

                    match outcome {
                        AddSessionOutcome::Admitted(session) => {
                            dispatch_loop(stream, &connection, &session, state.enable_compression).await;
                            state.manager.close(session.session_id);
                        }
                        AddSessionOutcome::UpgradeRequired => {
                            send_json(&connection, query.binary, &UpgradeNotice::default()).await;
                            connection.close_with(close_code::UPGRADING, "workspace is upgrading");
                        }
                        AddSessionOutcome::Error(err) => {
                            connection.close_with(axum_close_code::ERROR, err.to_string());
                        }
                    }
                }
            }
        })
}

async fn reject_unauthorized(mut socket: WebSocket, reason: String) {
    let notice = UnauthorizedNotice::default();
    let body = serde_json::to_string(&notice).expect("UnauthorizedNotice always serializes");
    let _ = socket.send(Message::text(body)).await;
    let close_frame =
        Error::Unauthorized(reason).into_close_frame().expect("Unauthorized always maps to a close frame");
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}

async fn send_json(connection: &crate::connection::ConnectionSocket, binary: bool, value: &impl serde::Serialize) {
    let bytes = if binary {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).expect("notice always serializes");
        buf
    } else {
        serde_json::to_vec(value).expect("notice always serializes")
    };
    connection.send(bytes, binary).await;
}

fn header_str(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

#[derive(Debug, Deserialize)]
struct FindAllParams {
    class: String,
    #[serde(default)]
    query: Value,
    #[serde(default)]
    options: Value,
}

/// Reads frames off `stream` until the peer closes, the socket dies, or
/// the workspace starts upgrading out from under this (non-upgrade)
/// session.
async fn dispatch_loop(
    mut stream: futures::stream::SplitStream<WebSocket>,
    connection: &crate::connection::ConnectionSocket,
    session: &Arc<Session>,
    enable_compression: bool,
) {
    loop {
        let frame = match stream.next().await {
            None => break,
            Some(Ok(Message::Close(_))) => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Text(text))) => (text.as_bytes().to_vec(), false),
            Some(Ok(Message::Binary(bytes))) => (bytes.to_vec(), true),
            Some(Err(err)) => {
                if let Some(close_frame) = Error::from(err).into_close_frame() {
                    connection.close_with(close_frame.code, close_frame.reason.to_string());
                } else {
                    connection.close();
                }
                break;
            }
        };

        if session.workspace().is_upgrading() && !session.is_upgrade_client() {
            send_json(connection, session.binary_mode, &StatusNotice::Upgrading).await;
            connection.close_with(close_code::UPGRADING, "workspace is upgrading");
            break;
        }

        let request = match decode_request(&frame.0, frame.1) {
            Ok(request) => request,
            Err(err) => {
                if let Some(close_frame) = err.into_close_frame() {
                    connection.close_with(close_frame.code, close_frame.reason.to_string());
                }
                break;
            }
        };

        let response = handle_request(session, request).await;
        let encoded =
            encode_response(&response, session.binary_mode, session.use_compression && enable_compression);
        if connection.send(encoded.bytes, encoded.binary).await == 0 {
            break;
        }
    }
}

async fn handle_request(session: &Arc<Session>, request: Request) -> Response {
    let Request { id, method, params } = request;
    match method.as_str() {
        "ping" => Response::ok(id, Value::String(session.ping())),
        "findAll" => match serde_json::from_value::<FindAllParams>(params) {
            Ok(params) => {
                match session.find_all(id.clone(), &params.class, params.query, params.options).await {
                    Ok(result) => Response::ok(id, result),
                    Err(err) => Response::err(id, ErrorCode::PipelineError.as_str(), err.to_string()),
                }
            }
            Err(err) => Response::err(id, ErrorCode::TransportError.as_str(), err.to_string()),
        },
        "tx" => match session.tx(id.clone(), params).await {
            Ok(result) => Response::ok(id, result),
            Err(err) => Response::err(id, ErrorCode::PipelineError.as_str(), err.to_string()),
        },
        _ => Response::err(id, ErrorCode::UnknownMethod.as_str(), format!("unknown method: {method}")),
    }
}
