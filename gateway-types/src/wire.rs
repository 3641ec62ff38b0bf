//! The request/response envelope exchanged between a client and the
//! gateway over a connection's frame transport.
//!
//! The gateway never interprets `params`/`result`; they are threaded
//! through to the workspace's pipeline as opaque JSON values.

use serde::{Deserialize, Serialize};

/// A request id, either a JSON number or a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

/// A request frame sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlates this request with its [`Response`].
    pub id: RequestId,
    /// Dispatch key; unknown methods are rejected with
    /// [`crate::errors::ErrorCode::UnknownMethod`].
    pub method: String,
    /// Opaque, method-specific parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The error payload of a [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    /// Machine-readable error taxonomy entry, see
    /// [`crate::errors::ErrorCode`].
    pub code: String,
    /// Human-readable detail, safe to display to end users.
    pub message: String,
}

/// A response frame sent by the gateway, either in reply to a [`Request`]
/// or as the result of a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Echoes the originating request id. Broadcasts reuse the id of the
    /// pipeline-emitted change they carry, opaque to the gateway.
    pub id: RequestId,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// Builds a successful response.
    pub fn ok(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds a failed response.
    pub fn err(id: RequestId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ResponseError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// Out-of-band status pushed to a session outside of the request/response
/// cycle: maintenance countdowns and the upgrade-in-progress notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusNotice {
    /// Sent every minute while a maintenance countdown is active.
    Maintenance {
        /// Minutes remaining before forced shutdown.
        remaining: u32,
    },
    /// Sent to a session whose workspace is mid-upgrade; the gateway
    /// closes the socket immediately afterwards.
    Upgrading,
}

/// The single frame sent on a handshake that fails authentication, right
/// before the gateway closes the socket.
#[derive(Debug, Clone, Serialize)]
pub struct UnauthorizedNotice {
    /// Always `"UNAUTHORIZED"`.
    pub error: &'static str,
}

impl Default for UnauthorizedNotice {
    fn default() -> Self {
        Self {
            error: "UNAUTHORIZED",
        }
    }
}

impl<'de> Deserialize<'de> for UnauthorizedNotice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            #[allow(dead_code)]
            error: String,
        }
        Helper::deserialize(deserializer)?;
        Ok(Self::default())
    }
}

/// Sent in reply to a handshake admitted while the target workspace is
/// mid-upgrade and the token does not carry the upgrade role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpgradeNotice {
    /// Always `true`.
    pub upgrade: bool,
}

impl Default for UpgradeNotice {
    fn default() -> Self {
        Self { upgrade: true }
    }
}
