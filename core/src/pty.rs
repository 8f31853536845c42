//! PTY session child process: spawn a shell or assistant CLI in a
//! pseudo-terminal and bridge its stdin/stdout to the rest of the server.
//!
//! `portable-pty`'s reader is a blocking `Read`, so a dedicated blocking
//! thread feeds an async `mpsc::Receiver<Vec<u8>>`; a separate thread
//! applies resize requests and another polls for child exit.
//! `build_session_env` force-overwrites `TERM`, `PORT`, `BROWSER`, `PATH`
//! and strips cert-related host envs before the child ever sees them.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::{self, Arc, Mutex};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::mpsc;

/// Host environment variables that must never reach the child process verbatim:
/// they carry host filesystem paths to CA bundles that don't exist inside the
/// container.
const FILTERED_CERT_ENVS: &[&str] = &["NODE_EXTRA_CA_CERTS", "SSL_CERT_FILE", "NODE_EXTRA_CA_CERTS_BUNDLE"];

/// Directory (relative to the project working directory) holding the `BROWSER`
/// shim and anything else shell utilities need prepended onto `PATH`.
pub const SHIM_DIR: &str = ".swe-swe/bin";

/// Write the `$BROWSER` shim a session's child process invokes to ask the
/// preview proxy to navigate the shell page: a tiny shell script that
/// re-execs this same binary with `--open <url>`, which
/// inherits `PORT` from the child's environment and POSTs to the debug hub's
/// URL-open endpoint on the deterministic preview port. Idempotent — safe to
/// call on every session spawn.
fn ensure_browser_shim(working_dir: &Path) -> std::io::Result<()> {
    let shim_dir = working_dir.join(SHIM_DIR);
    std::fs::create_dir_all(&shim_dir)?;
    let self_exe = std::env::current_exe()?;
    let script = format!("#!/bin/sh\nexec \"{}\" --open \"$1\"\n", self_exe.display());
    let path = shim_dir.join("browser-open");
    std::fs::write(&path, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Build the environment for a freshly spawned PTY child.
/// `TERM`, `PORT`, `BROWSER` and `PATH` are force-overwritten regardless of
/// whatever the parent process has set for them; cert-related envs are
/// stripped outright.
pub fn build_session_env(app_port: u16, working_dir: &Path) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars()
        .filter(|(k, _)| !FILTERED_CERT_ENVS.contains(&k.as_str()))
        .filter(|(k, _)| !matches!(k.as_str(), "TERM" | "PORT" | "BROWSER" | "PATH"))
        .collect();

    let shim_dir = working_dir.join(SHIM_DIR);
    let existing_path = std::env::var("PATH").unwrap_or_default();
    let path = if existing_path.is_empty() {
        shim_dir.to_string_lossy().into_owned()
    } else {
        format!("{}:{}", shim_dir.to_string_lossy(), existing_path)
    };

    env.push(("TERM".into(), "xterm-256color".into()));
    env.push(("PORT".into(), app_port.to_string()));
    env.push(("BROWSER".into(), shim_dir.join("browser-open").to_string_lossy().into_owned()));
    env.push(("PATH".into(), path));
    env
}

/// Run state of the PTY child, broadcast to clients as a `processExited` status
/// frame once it terminates.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PtyRunState {
    Running,
    Exited { exit_code: u32 },
}

/// PTY bridge: a writer for stdin and the owned child handle. Reading happens
/// on a dedicated blocking thread (see [`spawn_pty`]) because `portable-pty`'s
/// reader is a blocking `Read`, which cannot live on a tokio worker thread.
pub struct PtyBridge {
    pub writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send + Sync>>>,
}

/// Sender used to request a PTY window resize; consumed by a dedicated thread
/// that calls `master.resize()`.
pub type ResizeSender = sync::mpsc::Sender<(u16, u16)>;

pub struct SpawnedPty {
    pub bridge: PtyBridge,
    pub output_rx: mpsc::Receiver<Vec<u8>>,
    pub resize_tx: ResizeSender,
    pub state_rx: mpsc::Receiver<PtyRunState>,
}

/// Spawn `command` (a shell or an assistant CLI invocation) inside a PTY rooted
/// at `cwd`, with the environment built by [`build_session_env`].
pub fn spawn_pty(
    command: &str,
    cwd: &Path,
    app_port: u16,
) -> Result<SpawnedPty, std::io::Error> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize { rows: 24, cols: 80, pixel_width: 0, pixel_height: 0 })
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    if let Err(e) = ensure_browser_shim(cwd) {
        tracing::warn!(error = %e, "failed to write $BROWSER shim, url-open from inside sessions will not work");
    }

    let mut cmd = shell_wrapped_command(command);
    cmd.cwd(cwd);
    for (k, v) in build_session_env(app_port, cwd) {
        cmd.env(k, v);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let master = pair.master;

    let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
    let (resize_tx, resize_rx) = sync::mpsc::channel::<(u16, u16)>();
    let (state_tx, state_rx) = mpsc::channel::<PtyRunState>(4);
    let child = Arc::new(Mutex::new(child));

    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    std::thread::spawn(move || {
        while let Ok((cols, rows)) = resize_rx.recv() {
            let size = PtySize { cols, rows, pixel_width: 0, pixel_height: 0 };
            let _ = master.resize(size);
        }
    });

    let child_poll = Arc::clone(&child);
    std::thread::spawn(move || {
        let mut sent_running = false;
        loop {
            let exit_status = {
                let mut guard = match child_poll.lock() {
                    Ok(g) => g,
                    Err(_) => break,
                };
                match guard.try_wait() {
                    Ok(None) => None,
                    Ok(Some(status)) => Some(status.exit_code()),
                    Err(_) => break,
                }
            };
            if let Some(code) = exit_status {
                let _ = state_tx.blocking_send(PtyRunState::Exited { exit_code: code });
                break;
            }
            if !sent_running {
                sent_running = true;
                let _ = state_tx.blocking_send(PtyRunState::Running);
            }
            std::thread::sleep(std::time::Duration::from_millis(250));
        }
    });

    Ok(SpawnedPty {
        bridge: PtyBridge { writer: Arc::new(Mutex::new(writer)), child },
        output_rx: rx,
        resize_tx,
        state_rx,
    })
}

/// Wrap the configured shell/assistant command in `bash -lc "<command>"` so
/// shell syntax (pipes, `&&`, env expansion) in the user-configured `--shell`
/// flag behaves as expected. On Windows, run the command directly.
#[cfg(unix)]
fn shell_wrapped_command(command: &str) -> CommandBuilder {
    let mut c = CommandBuilder::new("bash");
    c.arg("-lc");
    c.arg(command);
    c
}

#[cfg(windows)]
fn shell_wrapped_command(command: &str) -> CommandBuilder {
    let mut c = CommandBuilder::new("cmd.exe");
    c.arg("/C");
    c.arg(command);
    c
}

impl PtyBridge {
    /// Kill the PTY child. Used by the registry when the last client disconnects
    /// from an already-exited session, and by graceful shutdown.
    pub fn kill(&self) -> Result<(), std::io::Error> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| std::io::Error::other("pty child mutex poisoned"))?;
        guard.kill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn build_session_env_force_overwrites_core_vars() {
        std::env::set_var("NODE_EXTRA_CA_CERTS", "/host/ca.pem");
        std::env::set_var("TERM", "dumb");
        let env = build_session_env(53000, &PathBuf::from("/work"));
        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(get("TERM").as_deref(), Some("xterm-256color"));
        assert_eq!(get("PORT").as_deref(), Some("53000"));
        assert!(get("BROWSER").unwrap().contains(".swe-swe/bin"));
        assert!(get("PATH").unwrap().starts_with("/work/.swe-swe/bin"));
        assert_eq!(get("NODE_EXTRA_CA_CERTS"), None);
        std::env::remove_var("NODE_EXTRA_CA_CERTS");
        std::env::remove_var("TERM");
    }
}
