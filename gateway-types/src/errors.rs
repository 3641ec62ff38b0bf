//! The error taxonomy shared between the gateway and its clients.
//!
//! See the design document, §7 Error Handling Design. [`ErrorCode`] is the
//! wire-level vocabulary carried in [`crate::wire::ResponseError::code`];
//! `gateway-core` additionally keeps a richer internal error type that
//! maps onto these codes and, where relevant, onto a websocket close
//! frame code from [`close_code`].

use serde::{Deserialize, Serialize};

/// Machine-readable error categories a [`crate::wire::Response`] may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad token, or a token for the wrong product.
    Unauthorized,
    /// No dispatcher registered for the request's method.
    UnknownMethod,
    /// The target workspace is mid-upgrade.
    Upgrading,
    /// The target workspace is tearing down.
    ShuttingDown,
    /// The pipeline rejected the request; message is a verbatim
    /// passthrough of the pipeline's own error.
    PipelineError,
    /// The frame could not be decoded, or the socket is dead.
    TransportError,
}

impl ErrorCode {
    /// The wire string for this code, as sent in [`crate::wire::ResponseError::code`].
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::UnknownMethod => "UNKNOWN_METHOD",
            ErrorCode::Upgrading => "UPGRADING",
            ErrorCode::ShuttingDown => "SHUTTING_DOWN",
            ErrorCode::PipelineError => "PIPELINE_ERROR",
            ErrorCode::TransportError => "TRANSPORT_ERROR",
        }
    }
}

/// Websocket close-frame codes specific to this protocol, in the
/// private-use range (4000-4999) reserved by RFC 6455.
pub mod close_code {
    /// Sent when a handshake's token fails verification.
    pub const UNAUTHORIZED: u16 = 4001;
    /// Sent when a workspace is mid-upgrade and the connecting token
    /// lacks the upgrade role.
    pub const UPGRADING: u16 = 4002;
    /// Sent when the workspace is tearing down (soft-shutdown expiry,
    /// administrative shutdown, or maintenance expiry).
    pub const SHUTTING_DOWN: u16 = 4003;
}
