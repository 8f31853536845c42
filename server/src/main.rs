//! In-container workspace server entry point.

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use sweswe_core::ports::preview_port_for_app_port;
use sweswe_server::cli::Cli;
use sweswe_server::{http, logging, AppState};

/// How often the preview-proxy reaper checks for sessions that disappeared
/// from the registry without their preview proxy being torn down explicitly.
/// Ports are released once the owning session is removed.
const REAP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// How long graceful shutdown waits for clients to drain after broadcasting
/// `processExited`.
const SHUTDOWN_DRAIN: std::time::Duration = std::time::Duration::from_secs(10);

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Some(url) = cli.open.clone() {
        return match run_open(&url) {
            Ok(()) => std::process::ExitCode::from(0),
            Err(e) => {
                eprintln!("sweswe-server --open failed: {e}");
                std::process::ExitCode::from(1)
            }
        };
    }

    if let Err(e) = logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("failed to initialize logging: {e}");
        return std::process::ExitCode::from(2);
    }

    let addr = match cli.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "invalid --addr");
            return std::process::ExitCode::from(2);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return std::process::ExitCode::from(1);
        }
    };

    match rt.block_on(run_server(cli, addr)) {
        Ok(()) => std::process::ExitCode::from(0),
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            std::process::ExitCode::from(1)
        }
    }
}

/// One-shot mode: `--open <url>` is invoked as the `$BROWSER` shim inside a
/// running session's PTY child. It inherits that session's environment, so
/// `PORT` (the app port) is already set; the preview proxy listens on the
/// deterministic `5` + `PORT` port, so no other discovery is needed.
fn run_open(url: &str) -> anyhow::Result<()> {
    let app_port: u16 = std::env::var("PORT")
        .map_err(|_| anyhow::anyhow!("PORT is not set in the environment (are we running inside a session?)"))?
        .parse()
        .map_err(|_| anyhow::anyhow!("PORT is not a valid port number"))?;
    let preview_port =
        preview_port_for_app_port(app_port).map_err(|_| anyhow::anyhow!("app port {app_port} has no valid preview port"))?;

    let endpoint = format!("http://127.0.0.1:{preview_port}/__swe-swe-debug__/open?url={}", urlencoding(url));
    let response = reqwest::blocking::get(&endpoint)?;
    if !response.status().is_success() {
        anyhow::bail!("open endpoint returned {}", response.status());
    }
    Ok(())
}

fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

async fn run_server(cli: Cli, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let state = AppState::new(cli.shell.clone(), cli.working_directory.clone(), !cli.no_preview_proxy);

    tokio::spawn(reap_orphaned_previews(state.clone()));

    let router = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, shell = %cli.shell, preview_enabled = !cli.no_preview_proxy, "sweswe-server listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(state.clone())).await?;

    broadcast_process_exited(&state);
    tokio::time::sleep(SHUTDOWN_DRAIN).await;
    state.previews.stop_all();
    Ok(())
}

/// Cancel the shared shutdown scope on `SIGINT`/`SIGTERM`: every task started
/// by the server is owned by a cancelable scope, and shutdown cancels the
/// root scope.
async fn shutdown_signal(state: AppState) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    tracing::info!("shutdown signal received, draining connections");
    state.shutdown.cancel();
}

fn broadcast_process_exited(state: &AppState) {
    for id in state.registry.list_ids() {
        if let Some(session) = state.registry.get(id) {
            session.kill();
        }
    }
}

/// Periodically tear down preview proxies whose session has left the
/// registry. The registry's own grace-period removal has no
/// direct hook into the server crate's preview bookkeeping, so this loop is
/// the seam that keeps the two in sync without coupling `sweswe_core` to axum.
async fn reap_orphaned_previews(state: AppState) {
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        for session_id in state.previews.session_ids() {
            if state.registry.get(session_id).is_none() {
                if let Some(released) = state.previews.stop(session_id) {
                    state.ports.release(released.preview_port);
                    state.app_ports.release(released.app_port);
                    tracing::debug!(session = %session_id, preview_port = released.preview_port, "reaped orphaned preview proxy");
                }
            }
        }
    }
}
