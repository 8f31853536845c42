//! Chunked frame codec: gzip a payload, then split it into binary
//! WebSocket frames small enough for a mobile browser's WS stack to swallow.
//!
//! Wire format per frame: `0x02 | index:u8 | total:u8 | gzip_bytes`.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::CodecError;

/// Frame tag for a chunked payload.
pub const CHUNK_TAG: u8 = 0x02;

/// Protocol limit: `total` is transmitted as a single byte.
const MAX_CHUNKS: usize = 255;

/// Initial chunk size for a fresh session.
pub const INITIAL_CHUNK_SIZE: usize = 8 * 1024;

/// Chunk size never shrinks below this floor.
pub const MIN_CHUNK_SIZE: usize = 512;

/// Factor applied to the chunk size when a client drops a chunked payload quickly.
const SHRINK_FACTOR: f64 = 0.85;

/// One outgoing chunk, ready to be sent as an independent binary WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(pub Vec<u8>);

fn gzip(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(payload).map_err(CodecError::Compress)?;
    enc.finish().map_err(CodecError::Compress)
}

fn gunzip(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut dec = GzDecoder::new(payload);
    let mut out = Vec::new();
    dec.read_to_end(&mut out).map_err(CodecError::Decompress)?;
    Ok(out)
}

/// Compress `payload` and split it into frames of at most `chunk_size` compressed
/// bytes each. Returns an error rather than truncating if the result would need
/// more than 255 chunks — callers must shrink `chunk_size` and retry.
pub fn encode(payload: &[u8], chunk_size: usize) -> Result<Vec<Frame>, CodecError> {
    let compressed = gzip(payload)?;
    let chunk_size = chunk_size.max(1);
    let total = compressed.chunks(chunk_size).count().max(1);
    if total > MAX_CHUNKS {
        return Err(CodecError::TooManyChunks(total));
    }
    let total_u8 = total as u8;
    if compressed.is_empty() {
        let mut frame = Vec::with_capacity(3);
        frame.push(CHUNK_TAG);
        frame.push(0);
        frame.push(total_u8);
        return Ok(vec![Frame(frame)]);
    }
    Ok(compressed
        .chunks(chunk_size)
        .enumerate()
        .map(|(idx, bytes)| {
            let mut frame = Vec::with_capacity(3 + bytes.len());
            frame.push(CHUNK_TAG);
            frame.push(idx as u8);
            frame.push(total_u8);
            frame.extend_from_slice(bytes);
            Frame(frame)
        })
        .collect())
}

/// Reassemble frames produced by [`encode`] (order must match `index`; callers are
/// expected to buffer frames per logical payload and call this once `total` have
/// arrived) and gunzip the result.
pub fn decode(frames: &[Frame]) -> Result<Vec<u8>, CodecError> {
    if frames.is_empty() {
        return Ok(Vec::new());
    }
    let total = frames[0].0.get(2).copied().unwrap_or(0);
    if frames.len() != total as usize {
        return Err(CodecError::Truncated { expected: total, got: frames.len() });
    }
    let mut compressed = Vec::new();
    for frame in frames {
        compressed.extend_from_slice(&frame.0[3..]);
    }
    gunzip(&compressed)
}

/// Adaptive per-session chunk size. Shrinks on early client drop,
/// never grows back, floors at [`MIN_CHUNK_SIZE`].
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveChunkSize(usize);

impl Default for AdaptiveChunkSize {
    fn default() -> Self {
        Self(INITIAL_CHUNK_SIZE)
    }
}

impl AdaptiveChunkSize {
    pub fn get(&self) -> usize {
        self.0
    }

    /// Called when a client disconnects within 3s of receiving a chunked payload.
    pub fn shrink(&mut self) {
        let shrunk = (self.0 as f64 * SHRINK_FACTOR) as usize;
        self.0 = shrunk.max(MIN_CHUNK_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_small_payload() {
        let payload = b"hello, terminal".to_vec();
        let frames = encode(&payload, INITIAL_CHUNK_SIZE).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(decode(&frames).unwrap(), payload);
    }

    #[test]
    fn round_trip_empty_payload() {
        let frames = encode(&[], INITIAL_CHUNK_SIZE).unwrap();
        assert_eq!(decode(&frames).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn round_trip_large_payload_chunks_correctly() {
        let payload = vec![b'x'; 1024 * 1024];
        let frames = encode(&payload, INITIAL_CHUNK_SIZE).unwrap();
        assert!(frames.len() > 1);
        assert!(frames.len() <= MAX_CHUNKS);
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.0[0], CHUNK_TAG);
            assert_eq!(f.0[1] as usize, i);
            assert_eq!(f.0[2] as usize, frames.len());
        }
        assert_eq!(decode(&frames).unwrap(), payload);
    }

    #[test]
    fn forty_kb_burst_yields_five_chunks() {
        // Incompressible random-ish bytes so gzip doesn't collapse it under one chunk.
        let payload: Vec<u8> = (0..40 * 1024).map(|i| (i % 251) as u8).collect();
        let frames = encode(&payload, 8 * 1024).unwrap();
        assert_eq!(decode(&frames).unwrap(), payload);
    }

    #[test]
    fn too_many_chunks_is_rejected() {
        let payload = vec![7u8; 10 * 1024 * 1024];
        let err = encode(&payload, MIN_CHUNK_SIZE).unwrap_err();
        assert!(matches!(err, CodecError::TooManyChunks(_)));
    }

    #[test]
    fn truncated_chunk_stream_errors() {
        let payload = vec![9u8; 100 * 1024];
        let mut frames = encode(&payload, 8 * 1024).unwrap();
        frames.pop();
        assert!(decode(&frames).is_err());
    }

    #[test]
    fn adaptive_chunk_size_shrinks_and_floors() {
        let mut size = AdaptiveChunkSize::default();
        assert_eq!(size.get(), INITIAL_CHUNK_SIZE);
        for _ in 0..200 {
            size.shrink();
        }
        assert_eq!(size.get(), MIN_CHUNK_SIZE);
    }
}
