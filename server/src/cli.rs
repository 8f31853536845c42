//! CLI flags via `clap`'s derive API, plus the ambient `-v`/`--log-file`
//! flags alongside the domain flags (`--addr`, `--shell`, `--working-directory`,
//! `--open`, `--no-preview-proxy`).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "sweswe-server", about = "in-container workspace server")]
pub struct Cli {
    /// Address to listen on, e.g. ":9898" or "127.0.0.1:9898".
    #[arg(long, default_value = ":9898")]
    pub addr: String,

    /// Disable the preview reverse proxy entirely.
    #[arg(long)]
    pub no_preview_proxy: bool,

    /// Shell or assistant CLI command run inside each session's PTY.
    #[arg(long, default_value = "claude")]
    pub shell: String,

    /// Working directory sessions are rooted at.
    #[arg(long, default_value = ".")]
    pub working_directory: PathBuf,

    /// One-shot: POST this URL to the running server's open endpoint and exit.
    #[arg(long)]
    pub open: Option<String>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Resolve `--addr` (which may omit a host, e.g. `:9898`) to a bindable
    /// socket address on `127.0.0.1`.
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        let addr = if let Some(port) = self.addr.strip_prefix(':') {
            format!("127.0.0.1:{port}")
        } else {
            self.addr.clone()
        };
        addr.parse().map_err(|e| anyhow::anyhow!("invalid --addr {:?}: {e}", self.addr))
    }
}
