//! The [`Error`] a connection's dispatch loop may encounter, and the
//! mapping from it onto a websocket close frame (§7 Error Handling
//! Design). Errors here are the fatal kind: something that ends the
//! connection. `UnknownMethod` and pipeline failures are not among them
//! — both are answered with a `Response.error` and the loop continues.

use axum::extract::ws::{CloseFrame, close_code};
use gateway_types::errors::close_code as gateway_close_code;
use tracing::instrument;

/// Fatal errors for one connection's dispatch loop.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// The peer sent a close frame, or the stream ended.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// The websocket transport reported an error while reading or writing.
    #[error(transparent)]
    Axum(#[from] axum::Error),
    /// A frame arrived that was neither `Text` nor `Binary`.
    #[error("unexpected message")]
    UnexpectedMessage,
    /// The handshake token failed verification or named the wrong product.
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Cbor(#[from] ciborium::de::Error<std::io::Error>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps this error onto a close frame, if the connection should be
    /// closed because of it.
    #[instrument(level = "debug", skip_all)]
    pub(crate) fn into_close_frame(self) -> Option<CloseFrame> {
        tracing::debug!("{self:?}");
        match self {
            Error::ConnectionClosed => None,
            Error::Unauthorized(reason) => Some(CloseFrame {
                code: gateway_close_code::UNAUTHORIZED,
                reason: reason.into(),
            }),
            Error::Axum(axum_error) => {
                let inner = axum_error.into_inner();
                if let Some(io_err) = inner.downcast_ref::<std::io::Error>()
                    && io_err.kind() == std::io::ErrorKind::ConnectionReset
                {
                    tracing::trace!("nothing to do, client reset the connection");
                    None
                } else {
                    Some(CloseFrame {
                        code: close_code::ERROR,
                        reason: "unexpected transport error".into(),
                    })
                }
            }
            Error::UnexpectedMessage => Some(CloseFrame {
                code: close_code::UNSUPPORTED,
                reason: "unexpected message".into(),
            }),
            Error::Json(err) => Some(CloseFrame {
                code: close_code::INVALID,
                reason: err.to_string().into(),
            }),
            Error::Cbor(err) => Some(CloseFrame {
                code: close_code::INVALID,
                reason: err.to_string().into(),
            }),
            Error::Io(err) => Some(CloseFrame {
                code: close_code::ERROR,
                reason: err.to_string().into(),
            }),
        }
    }
}
