//! Fixed-parameter per-frame DEFLATE compression (§6).
//!
//! Parameters are fixed defaults, not negotiated beyond the single
//! enable/disable flag: 32 KiB chunks, compression level 1, no context
//! carried between frames (a fresh encoder runs per call), applied only
//! to frames at or above the 1 KiB threshold. `memLevel` is not exposed
//! by `flate2`'s safe API and is therefore left at its default; see the
//! design document for the resulting deviation.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

/// Minimum frame size, in bytes, before compression is attempted.
pub const COMPRESSION_THRESHOLD_BYTES: usize = 1024;
const CHUNK_SIZE: usize = 32 * 1024;
const COMPRESSION_LEVEL: u32 = 1;

/// Compresses `data` with DEFLATE. No context is carried across calls.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(
        Vec::with_capacity(data.len().min(CHUNK_SIZE)),
        Compression::new(COMPRESSION_LEVEL),
    );
    encoder
        .write_all(data)
        .expect("compressing into an in-memory buffer cannot fail");
    encoder
        .finish()
        .expect("compressing into an in-memory buffer cannot fail")
}

/// Decompresses a DEFLATE frame produced by [`compress`].
pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

/// Returns `true` if a frame of `len` bytes clears the compression
/// threshold.
pub fn should_compress(len: usize) -> bool {
    len >= COMPRESSION_THRESHOLD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"a".repeat(4096);
        let compressed = compress(&data);
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn threshold_respects_one_kib() {
        assert!(!should_compress(1023));
        assert!(should_compress(1024));
    }
}
