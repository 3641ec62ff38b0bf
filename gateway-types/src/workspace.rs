//! Workspace identity.
//!
//! A [`WorkspaceId`] names the tenant boundary a session attaches to. The
//! gateway never looks inside `url`; it is opaque data forwarded to clients
//! so they can build links back into the account service.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Identity of a workspace as carried by a decoded token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceId {
    /// Human-assigned workspace name.
    pub name: String,
    /// The product this workspace belongs to, checked against the
    /// gateway's configured product id on handshake.
    pub product_id: String,
    /// Link back to the account service's page for this workspace.
    pub url: Url,
}

/// The canonical registry key for a [`WorkspaceId`].
///
/// Two `WorkspaceId`s with the same `product_id` and `name` (case
/// insensitive) must resolve to the same [`WorkspaceKey`], since they
/// identify the same tenant boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkspaceKey(String);

impl WorkspaceId {
    /// Computes the canonical registry key for this workspace.
    pub fn canonical(&self) -> WorkspaceKey {
        WorkspaceKey(format!(
            "{}/{}",
            self.product_id.trim().to_ascii_lowercase(),
            self.name.trim().to_ascii_lowercase()
        ))
    }
}

impl WorkspaceKey {
    /// Wraps an already-canonical key string, as returned by
    /// [`WorkspaceId::canonical`] and echoed back to clients (e.g. in an
    /// admin statistics breakdown) for addressing a workspace directly.
    pub fn from_canonical(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspaceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(name: &str, product: &str) -> WorkspaceId {
        WorkspaceId {
            name: name.to_owned(),
            product_id: product.to_owned(),
            url: "https://example.com/w".parse().unwrap(),
        }
    }

    #[test]
    fn canonical_key_is_case_insensitive() {
        let a = workspace("Acme Corp", "prod");
        let b = workspace("acme corp", "PROD");
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn canonical_key_distinguishes_products() {
        let a = workspace("acme", "prod");
        let b = workspace("acme", "staging");
        assert_ne!(a.canonical(), b.canonical());
    }
}
