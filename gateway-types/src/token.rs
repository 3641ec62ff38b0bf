//! Decoded bearer tokens and the trait that produces them.
//!
//! The token issuer is an out-of-scope collaborator: it signs tokens that
//! carry workspace identity, the account's email, and a small bag of role
//! extras. The gateway only ever sees the decoded shape below; verifying
//! the signature and parsing the raw bytes is delegated to a
//! [`TokenDecoder`] implementation supplied by the hosting application.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::workspace::WorkspaceId;

/// A role carried in a token's `extra` bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Marks a session as part of a workspace upgrade: it may attach to a
    /// workspace that is admitting only upgrade clients, and is excluded
    /// from statistics broadcasts.
    Upgrade,
}

/// Additional, optional claims carried by a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExtra {
    /// Grants access to the admin-only statistics breakdown and the
    /// `/api/v1/manage` endpoints.
    #[serde(default)]
    pub admin: bool,
    /// Client-requested interaction mode, forwarded into session metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Client-requested model identifier, forwarded into session metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// The role this token was minted for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// A decoded, verified token.
///
/// Opaque to the gateway beyond these fields: the token issuer decides
/// what goes into `extra` and the gateway never interprets it beyond the
/// fields below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The account email this token was issued to.
    pub account_email: String,
    /// The workspace this token grants access to.
    pub workspace: WorkspaceId,
    /// Additional claims.
    #[serde(default)]
    pub extra: Option<TokenExtra>,
}

impl Token {
    /// Returns `true` iff this token carries the `admin` extra.
    pub fn is_admin(&self) -> bool {
        self.extra.as_ref().is_some_and(|e| e.admin)
    }

    /// Returns `true` iff this token carries the [`Role::Upgrade`] role.
    ///
    /// Sessions minted from such tokens bypass a workspace's
    /// upgrade-admission guard and are excluded from statistics
    /// broadcasts.
    pub fn is_upgrade_client(&self) -> bool {
        matches!(
            self.extra.as_ref().and_then(|e| e.role),
            Some(Role::Upgrade)
        )
    }
}

/// Errors a [`TokenDecoder`] may return.
#[derive(Debug, thiserror::Error)]
pub enum TokenDecodeError {
    /// The token could not be parsed or its signature did not verify.
    #[error("malformed or unverifiable token: {0}")]
    Malformed(String),
    /// The token has expired.
    #[error("token expired")]
    Expired,
}

/// Decodes and verifies a raw bearer token into a [`Token`].
///
/// Implementations are the authentication token issuer's concern; this
/// trait only describes the shape the gateway depends on. Cryptographic
/// verification, key rotation, and issuer trust are entirely up to the
/// implementation.
#[async_trait]
pub trait TokenDecoder {
    /// Decodes and verifies `raw`, returning the claims it carries.
    async fn decode(&self, raw: &str) -> Result<Token, TokenDecodeError>;
}

/// Shared handle to a [`TokenDecoder`] implementation.
pub type TokenDecoderService = Arc<dyn TokenDecoder + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn token(extra: Option<TokenExtra>) -> Token {
        Token {
            account_email: "user@example.com".to_owned(),
            workspace: WorkspaceId {
                name: "acme".to_owned(),
                product_id: "prod".to_owned(),
                url: "https://example.com".parse().unwrap(),
            },
            extra,
        }
    }

    #[test]
    fn admin_requires_extra() {
        assert!(!token(None).is_admin());
        assert!(token(Some(TokenExtra {
            admin: true,
            ..Default::default()
        }))
        .is_admin());
    }

    #[test]
    fn upgrade_client_requires_role() {
        assert!(!token(None).is_upgrade_client());
        assert!(token(Some(TokenExtra {
            role: Some(Role::Upgrade),
            ..Default::default()
        }))
        .is_upgrade_client());
    }
}
