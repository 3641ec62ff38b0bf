//! Abstraction over one bidirectional frame transport (§4.A).
//!
//! A [`ConnectionSocket`] is exclusively owned by one [`crate::session::Session`]
//! once attached; the front-end owns it only during the handshake. It
//! wraps the write half of the axum websocket behind a channel so `send`
//! can apply backpressure independently of whoever is reading the other
//! half of the same connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{self, Message, WebSocket, close_code};
use futures::SinkExt as _;
use futures::stream::SplitSink;
use tokio::sync::{Notify, mpsc};

use crate::metrics::METRICS_ID_SEND_DATA;

/// Bytes of unacknowledged outbound data a socket may carry before
/// `send` starts yielding cooperatively until the writer drains it.
pub const SEND_BACKPRESSURE_THRESHOLD_BYTES: usize = 128;

/// Immutable metadata captured at handshake completion.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// The peer's socket address, as seen by the listener.
    pub remote_address: String,
    /// The `User-Agent` header sent with the upgrade request, if any.
    pub user_agent: Option<String>,
    /// The `Accept-Language` header sent with the upgrade request, if any.
    pub accept_language: Option<String>,
    /// The account email the handshake token was issued to.
    pub account_email: String,
    /// Client-requested interaction mode, from the token's extra claims.
    pub mode: Option<String>,
    /// Client-requested model identifier, from the token's extra claims.
    pub model: Option<String>,
}

enum OutboundFrame {
    Data { payload: Vec<u8>, binary: bool },
    Close { code: u16, reason: String },
}

/// One bidirectional connection. `send`/`close` are the only operations
/// a [`crate::session::Session`] or the manager ever needs; reading
/// inbound frames stays the front-end's job, off the other half of the
/// same websocket.
pub struct ConnectionSocket {
    closed: Arc<AtomicBool>,
    pending_bytes: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    metadata: ConnectionMetadata,
}

impl ConnectionSocket {
    /// Spawns the writer task that owns `sink` and returns a handle to
    /// the resulting socket. The caller keeps the matching read half of
    /// the split websocket for its own dispatch loop.
    pub fn spawn(sink: SplitSink<WebSocket, Message>, metadata: ConnectionMetadata) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let pending_bytes = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        tokio::spawn(writer_task(
            sink,
            rx,
            Arc::clone(&pending_bytes),
            Arc::clone(&drained),
            Arc::clone(&closed),
        ));

        Arc::new(Self {
            closed,
            pending_bytes,
            drained,
            outbound: tx,
            metadata,
        })
    }

    /// Writes `payload` through the transport, applying backpressure.
    ///
    /// Returns `0` immediately if the socket is already closed. Otherwise
    /// enqueues the frame, then yields cooperatively until the transport's
    /// outstanding buffer drops back under [`SEND_BACKPRESSURE_THRESHOLD_BYTES`]
    /// (or the socket closes out from under us), and returns the number of
    /// bytes written.
    pub async fn send(&self, payload: Vec<u8>, binary: bool) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        let len = payload.len();
        metrics::histogram!(METRICS_ID_SEND_DATA).record(len as f64);
        self.pending_bytes.fetch_add(len, Ordering::AcqRel);

        if self
            .outbound
            .send(OutboundFrame::Data { payload, binary })
            .is_err()
        {
            self.pending_bytes.fetch_sub(len, Ordering::AcqRel);
            self.closed.store(true, Ordering::Release);
            return 0;
        }

        while self.pending_bytes.load(Ordering::Acquire) > SEND_BACKPRESSURE_THRESHOLD_BYTES {
            if self.closed.load(Ordering::Acquire) {
                return 0;
            }
            let notified = self.drained.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_millis(25)) => {}
            }
        }
        len
    }

    /// Marks the socket closed and asks the writer task to send a close
    /// frame on a best-effort basis. Idempotent. Uses the normal close
    /// code; use [`Self::close_with`] to send a protocol-specific one.
    pub fn close(&self) {
        self.close_with(close_code::NORMAL, "");
    }

    /// Like [`Self::close`], but with a specific close code and reason —
    /// used for the gateway's own close-frame vocabulary
    /// (`gateway_types::errors::close_code`).
    pub fn close_with(&self, code: u16, reason: impl Into<String>) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.outbound.send(OutboundFrame::Close { code, reason: reason.into() });
        }
    }

    /// `true` once `close` has been called or the writer observed a
    /// transport-level failure.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The metadata captured at handshake completion.
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    pending_bytes: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    closed: Arc<AtomicBool>,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Close { code, reason } => {
                let _ = sink
                    .send(ws::Message::Close(Some(ws::CloseFrame { code, reason: reason.into() })))
                    .await;
                break;
            }
            OutboundFrame::Data { payload, binary } => {
                let len = payload.len();
                let message = if binary {
                    ws::Message::binary(payload)
                } else {
                    ws::Message::text(String::from_utf8_lossy(&payload).into_owned())
                };
                if sink.send(message).await.is_err() {
                    closed.store(true, Ordering::Release);
                }
                pending_bytes.fetch_sub(len, Ordering::AcqRel);
                drained.notify_waiters();
            }
        }
    }
    closed.store(true, Ordering::Release);
}
