//! Encodes/decodes wire frames honoring a session's binary/compression
//! flags (§6 Wire Format).
//!
//! Framing mirrors the dual JSON/CBOR convention used throughout the
//! surrounding stack: a textual (`Message::Text`) frame carries JSON, a
//! `Message::Binary` frame carries CBOR. A single leading flag byte
//! records whether the remainder was DEFLATE-compressed, since axum does
//! not expose per-message `permessage-deflate` negotiation to decide
//! that for us.

use gateway_types::wire::{Request, Response};

use crate::api::errors::Error;
use crate::compression::{compress, decompress, should_compress};

const FLAG_PLAIN: u8 = 0;
const FLAG_COMPRESSED: u8 = 1;

/// A payload ready to hand to [`crate::connection::ConnectionSocket::send`],
/// together with which websocket message variant it must travel in.
pub struct EncodedFrame {
    /// The flag byte followed by the (possibly compressed) serialized body.
    pub bytes: Vec<u8>,
    /// Whether this frame must travel as `Message::Binary` rather than `Message::Text`.
    pub binary: bool,
}

/// Serializes `response` as JSON or CBOR depending on `binary`, then
/// compresses it when `compression_enabled` and the frame clears the
/// threshold.
pub fn encode_response(response: &Response, binary: bool, compression_enabled: bool) -> EncodedFrame {
    let raw = if binary {
        let mut buf = Vec::new();
        ciborium::into_writer(response, &mut buf).expect("Response always serializes");
        buf
    } else {
        serde_json::to_vec(response).expect("Response always serializes")
    };

    let (flag, body) = if compression_enabled && should_compress(raw.len()) {
        (FLAG_COMPRESSED, compress(&raw))
    } else {
        (FLAG_PLAIN, raw)
    };

    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.push(flag);
    bytes.extend_from_slice(&body);
    EncodedFrame { bytes, binary }
}

/// Decodes a request frame encoded by a client following the same
/// leading-flag convention. `binary` mirrors which websocket message
/// variant carried it.
pub fn decode_request(payload: &[u8], binary: bool) -> Result<Request, Error> {
    let (flag, rest) = payload.split_first().ok_or(Error::UnexpectedMessage)?;
    let raw = match *flag {
        FLAG_COMPRESSED => decompress(rest)?,
        _ => rest.to_vec(),
    };
    if binary {
        Ok(ciborium::from_reader(raw.as_slice())?)
    } else {
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::wire::RequestId;
    use serde_json::json;

    #[test]
    fn round_trips_small_text_frame() {
        let response = Response::ok(RequestId::Number(1), json!({"ok": true}));
        let encoded = encode_response(&response, false, true);
        assert!(!encoded.binary);
        assert_eq!(encoded.bytes[0], FLAG_PLAIN, "below threshold stays uncompressed");
    }

    #[test]
    fn compresses_large_text_frame_when_enabled() {
        let response = Response::ok(RequestId::Number(1), json!({"blob": "x".repeat(4096)}));
        let encoded = encode_response(&response, false, true);
        assert_eq!(encoded.bytes[0], FLAG_COMPRESSED);
    }

    #[test]
    fn decode_round_trips_request() {
        let request = Request {
            id: RequestId::String("r1".to_owned()),
            method: "findAll".to_owned(),
            params: json!({"class": "doc"}),
        };
        let raw = serde_json::to_vec(&request).unwrap();
        let mut framed = vec![FLAG_PLAIN];
        framed.extend_from_slice(&raw);
        let decoded = decode_request(&framed, false).unwrap();
        assert_eq!(decoded.method, "findAll");
    }
}
