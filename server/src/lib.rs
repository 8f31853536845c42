//! In-container workspace server: PTY terminal sessions fanned out over
//! WebSocket, plus a preview reverse proxy with an injected debug channel.
//! The HTTP/WebSocket edge lives here; PTY handling, the wire codec, the
//! session registry and the proxy/debug-hub logic live in `sweswe_core`.

pub mod assets;
pub mod cli;
pub mod http;
pub mod logging;
pub mod preview;
pub mod state;
pub mod ws;

pub use state::AppState;
