//! Lossless payload compression for the disk tier.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Compress `data` with zlib at `level` (0-9).
pub fn compress(data: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Largest output a deflate stream can produce per input byte.
const MAX_EXPANSION_RATIO: u64 = 1032;

/// Largest buffer reserved up front; bigger outputs grow as data arrives.
const MAX_PREALLOC_BYTES: u64 = 64 * 1024 * 1024;

/// Decompress a zlib stream that is expected to expand to `expected_len` bytes.
///
/// A length mismatch is reported as `InvalidData` so truncated or swapped
/// payloads are caught here rather than handed to callers. Output is never
/// read past `expected_len + 1` bytes, and a declared length the stream
/// cannot possibly hold is rejected before any allocation.
pub fn decompress(data: &[u8], expected_len: u64) -> std::io::Result<Vec<u8>> {
    let ceiling = (data.len() as u64).saturating_mul(MAX_EXPANSION_RATIO);
    if expected_len > ceiling {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "declared size {} exceeds the {} bytes a {} byte stream can hold",
                expected_len,
                ceiling,
                data.len()
            ),
        ));
    }

    let mut out = Vec::with_capacity(expected_len.min(MAX_PREALLOC_BYTES) as usize);
    ZlibDecoder::new(data)
        .take(expected_len.saturating_add(1))
        .read_to_end(&mut out)?;

    let produced = out.len() as u64;
    if produced > expected_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("stream expands past the expected {} bytes", expected_len),
        ));
    }
    if produced < expected_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("decompressed {} bytes, expected {}", produced, expected_len),
        ));
    }
    Ok(out)
}
