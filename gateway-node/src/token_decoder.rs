//! A development-only [`TokenDecoder`] for running the gateway without a
//! real authentication token issuer wired up.
//!
//! Tokens are expected to be the base64 (URL-safe, unpadded) encoding of
//! the JSON serialization of [`Token`]. There is no signature, no expiry,
//! no issuer trust of any kind — anyone who can reach the handshake
//! endpoint can mint whatever claims they like. [`DevTokenDecoder::new`]
//! refuses to construct outside [`Environment::Dev`].

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gateway_core::config::Environment;
use gateway_types::token::{Token, TokenDecodeError, TokenDecoder};

/// Decodes a bearer token as base64(JSON) with no verification whatsoever.
pub struct DevTokenDecoder;

impl DevTokenDecoder {
    /// Builds the decoder. Panics outside [`Environment::Dev`]; this
    /// decoder must never be reachable from a production binary.
    pub fn new(environment: Environment) -> Self {
        environment.assert_is_dev();
        Self
    }
}

#[async_trait]
impl TokenDecoder for DevTokenDecoder {
    async fn decode(&self, raw: &str) -> Result<Token, TokenDecodeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|err| TokenDecodeError::Malformed(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| TokenDecodeError::Malformed(err.to_string()))
    }
}
