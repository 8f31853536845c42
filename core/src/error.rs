//! Typed errors for the parts of the core that need to map to an HTTP status,
//! a WebSocket close reason, or a structured log line rather than just "it failed".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn pty: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("no preview ports available")]
    PortsExhausted,

    #[error("session {0} not found")]
    NotFound(crate::session::SessionId),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("filename is empty after sanitisation")]
    EmptyName,

    #[error("filename too long")]
    TooLong,

    #[error("failed to write upload: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload requires {0} chunks, exceeding the u8 protocol limit of 255")]
    TooManyChunks(usize),

    #[error("gzip compression failed: {0}")]
    Compress(std::io::Error),

    #[error("gzip decompression failed: {0}")]
    Decompress(std::io::Error),

    #[error("truncated or out-of-order chunk stream: expected {expected} chunks, got {got}")]
    Truncated { expected: u8, got: usize },
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("backend on port {0} is not reachable")]
    BackendUnreachable(u16),

    #[error("malformed url: {0}")]
    MalformedUrl(String),

    #[error("no shell client attached")]
    NoShellClient,
}
