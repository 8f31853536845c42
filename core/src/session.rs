//! PTY session: owns the PTY child, the scrollback ring, the connected
//! client set, the authoritative terminal size, chat log and
//! detected-assistant label. Every connected client reports its own
//! terminal size; the PTY's actual size is kept as the coordinate-wise
//! minimum over all of them so rendering fits every viewer.

use std::collections::{HashMap, VecDeque};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::assistant;
use crate::chunk::{self, AdaptiveChunkSize};
use crate::protocol::ServerTextMessage;
use crate::pty::{self, PtyBridge, PtyRunState, ResizeSender};
use crate::ring::ScrollbackRing;

/// Bounded tail of chat messages kept per session.
pub const MAX_CHAT_LOG: usize = 10;

/// Fan-out payloads larger than this go through the chunked codec rather than
/// a single binary frame: large bursts over a plain WS message can destabilise
/// some mobile browsers' WS stacks.
pub const CHUNK_THRESHOLD: usize = 6 * 1024;

/// If a client disconnects within this window of receiving a chunked payload,
/// the session's adaptive chunk size shrinks.
const ADAPTIVE_SHRINK_WINDOW: Duration = Duration::from_secs(3);

/// How long the registry keeps a `processExited`, now-clientless session
/// around before dropping it, to tolerate a quick page reload.
pub const REMOVAL_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Capacity of a client's outbound queue. A client that falls this far behind
/// is treated as unresponsive and dropped.
pub const CLIENT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

pub type ClientId = u64;

/// A unit of work for a client's dedicated writer task.
#[derive(Debug, Clone)]
pub enum OutMessage {
    Binary(Bytes),
    Text(String),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub user: String,
    pub text: String,
    pub timestamp: u64,
}

struct ClientState {
    tx: mpsc::Sender<OutMessage>,
    /// Last size this client reported, as (rows, cols).
    size: (u16, u16),
    last_chunked_at: Option<Instant>,
}

struct Inner {
    clients: HashMap<ClientId, ClientState>,
    /// (rows, cols), the coordinate-wise minimum over `clients`.
    authoritative: (u16, u16),
    assistant_tag: &'static str,
    chat_log: VecDeque<ChatMessage>,
    chunk_size: AdaptiveChunkSize,
    run_state: PtyRunState,
}

impl Inner {
    fn new() -> Self {
        Self {
            clients: HashMap::new(),
            authoritative: (24, 80),
            assistant_tag: "unknown",
            chat_log: VecDeque::with_capacity(MAX_CHAT_LOG),
            chunk_size: AdaptiveChunkSize::default(),
            run_state: PtyRunState::Running,
        }
    }

    /// The coordinate-wise minimum of every connected client's reported size,
    /// defaulting to 24x80 when no client has reported one yet.
    fn min_client_size(&self) -> (u16, u16) {
        self.clients.values().map(|c| c.size).reduce(|a, b| (a.0.min(b.0), a.1.min(b.1))).unwrap_or((24, 80))
    }

    fn push_chat(&mut self, msg: ChatMessage) {
        if self.chat_log.len() >= MAX_CHAT_LOG {
            self.chat_log.pop_front();
        }
        self.chat_log.push_back(msg);
    }
}

/// One live PTY session plus everything needed to share it with many clients.
pub struct Session {
    pub id: SessionId,
    pub created_at: u64,
    pub project_path: PathBuf,
    pub command: String,
    pub app_port: u16,
    pub worktree: Option<String>,
    bridge: PtyBridge,
    resize_tx: ResizeSender,
    ring: ScrollbackRing,
    inner: Mutex<Inner>,
    next_client_id: AtomicU64,
}

fn unix_now_secs() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl Session {
    /// Spawn a PTY child and wire up the background reader/state tasks. This
    /// is the only place a PTY is spawned for a given id (enforced by the
    /// registry's creation lock: at most one PTY per id).
    pub fn spawn(
        id: SessionId,
        command: String,
        project_path: PathBuf,
        app_port: u16,
        worktree: Option<String>,
    ) -> Result<Arc<Session>, std::io::Error> {
        let spawned = pty::spawn_pty(&command, &project_path, app_port)?;

        let session = Arc::new(Session {
            id,
            created_at: unix_now_secs(),
            project_path,
            command,
            app_port,
            worktree,
            bridge: spawned.bridge,
            resize_tx: spawned.resize_tx,
            ring: ScrollbackRing::new(),
            inner: Mutex::new(Inner::new()),
            next_client_id: AtomicU64::new(0),
        });

        tokio::spawn(Self::reader_loop(session.clone(), spawned.output_rx));
        tokio::spawn(Self::state_loop(session.clone(), spawned.state_rx));

        Ok(session)
    }

    async fn reader_loop(session: Arc<Session>, mut output_rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(bytes) = output_rx.recv().await {
            session.broadcast_output(Bytes::from(bytes));
        }
    }

    async fn state_loop(session: Arc<Session>, mut state_rx: mpsc::Receiver<PtyRunState>) {
        while let Some(state) = state_rx.recv().await {
            let exit_code = match &state {
                PtyRunState::Running => None,
                PtyRunState::Exited { exit_code } => Some(*exit_code),
            };
            {
                let mut inner = session.inner.lock().expect("session lock poisoned");
                inner.run_state = state;
            }
            if let Some(code) = exit_code {
                tracing::info!(session = %session.id, exit_code = code, "pty child exited");
                session.fanout_text(ServerTextMessage::ProcessExited { code }.to_json());
                break;
            }
        }
    }

    /// Append to the scrollback ring, run assistant detection, and fan the
    /// bytes out to every connected client — chunked if large.
    fn broadcast_output(&self, bytes: Bytes) {
        self.ring.push(&bytes);

        if let Some(tag) = assistant::detect(&bytes) {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            if inner.assistant_tag != tag {
                inner.assistant_tag = tag;
                drop(inner);
                self.broadcast_status();
            }
        }

        if bytes.len() > CHUNK_THRESHOLD {
            let chunk_size = {
                let inner = self.inner.lock().expect("session lock poisoned");
                inner.chunk_size.get()
            };
            match chunk::encode(&bytes, chunk_size) {
                Ok(frames) => {
                    let messages: Vec<OutMessage> =
                        frames.into_iter().map(|f| OutMessage::Binary(Bytes::from(f.0))).collect();
                    self.fanout(messages, true);
                }
                Err(e) => {
                    tracing::error!(session = %self.id, error = %e, "dropping oversized pty burst: chunk count overflow");
                }
            }
        } else {
            self.fanout(vec![OutMessage::Binary(bytes)], false);
        }
    }

    fn fanout(&self, messages: Vec<OutMessage>, mark_chunked: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("session lock poisoned");
        let mut dead = Vec::new();
        for (id, client) in inner.clients.iter_mut() {
            let mut ok = true;
            for m in &messages {
                if client.tx.try_send(m.clone()).is_err() {
                    ok = false;
                    break;
                }
            }
            if !ok {
                dead.push(*id);
            } else if mark_chunked {
                client.last_chunked_at = Some(now);
            }
        }
        for id in dead {
            inner.clients.remove(&id);
            tracing::warn!(session = %self.id, client = id, "client outbound queue full, dropping client");
        }
    }

    fn fanout_text(&self, text: String) {
        self.fanout(vec![OutMessage::Text(text)], false);
    }

    fn broadcast_status(&self) {
        let inner = self.inner.lock().expect("session lock poisoned");
        let (rows, cols) = inner.authoritative;
        let msg = ServerTextMessage::Status {
            viewers: inner.clients.len(),
            cols,
            rows,
            assistant: inner.assistant_tag,
        }
        .to_json();
        drop(inner);
        self.fanout_text(msg);
    }

    /// Register a new client, recompute the authoritative size, and return
    /// its id plus the snapshot (scrollback + chat log) it should replay
    /// locally before subscribing to live output. The snapshot always goes
    /// through the chunked codec regardless of size, unlike live output
    /// which only chunks above [`CHUNK_THRESHOLD`].
    pub fn add_client(&self, tx: mpsc::Sender<OutMessage>, rows: u16, cols: u16) -> (ClientId, Vec<OutMessage>, Vec<ChatMessage>) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.ring.snapshot();
        let chat_log;
        let chunk_size;
        {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            inner.clients.insert(client_id, ClientState { tx, size: (rows, cols), last_chunked_at: None });
            chat_log = inner.chat_log.iter().cloned().collect();
            chunk_size = inner.chunk_size.get();
        }
        self.recompute_authoritative();

        let snapshot_frames = if snapshot.is_empty() {
            Vec::new()
        } else {
            match chunk::encode(&snapshot, chunk_size) {
                Ok(frames) => frames.into_iter().map(|f| OutMessage::Binary(Bytes::from(f.0))).collect(),
                Err(e) => {
                    tracing::error!(session = %self.id, error = %e, "snapshot too large to chunk at current chunk size");
                    Vec::new()
                }
            }
        };
        (client_id, snapshot_frames, chat_log)
    }

    /// Remove a client. If it disconnected shortly after receiving a chunked
    /// payload, shrink the session's adaptive chunk size.
    pub fn remove_client(&self, client_id: ClientId) {
        let shrink;
        {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            let removed = inner.clients.remove(&client_id);
            shrink = removed
                .and_then(|c| c.last_chunked_at)
                .is_some_and(|t| t.elapsed() < ADAPTIVE_SHRINK_WINDOW);
            if shrink {
                inner.chunk_size.shrink();
            }
        }
        if shrink {
            tracing::debug!(session = %self.id, "client dropped shortly after a chunked payload, shrinking chunk size");
        }
        self.recompute_authoritative();
    }

    pub fn set_client_size(&self, client_id: ClientId, rows: u16, cols: u16) {
        {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            if let Some(c) = inner.clients.get_mut(&client_id) {
                c.size = (rows, cols);
            }
        }
        self.recompute_authoritative();
    }

    /// Recompute `(rows, cols)` as the coordinate-wise minimum over every
    /// connected client, apply it to the PTY, and broadcast a status frame.
    fn recompute_authoritative(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        let size = inner.min_client_size();
        let changed = inner.authoritative != size;
        inner.authoritative = size;
        drop(inner);
        if changed {
            let _ = self.resize_tx.send((size.1, size.0));
        }
        self.broadcast_status();
    }

    /// Append a chat message (bounded to [`MAX_CHAT_LOG`]) and broadcast it.
    pub fn post_chat(&self, user: String, text: String, timestamp: Option<u64>) {
        let timestamp = timestamp.unwrap_or_else(unix_now_secs);
        let msg = ChatMessage { user: user.clone(), text: text.clone(), timestamp };
        {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            inner.push_chat(msg);
        }
        let json = ServerTextMessage::Chat { user_name: &user, text: &text, timestamp }.to_json();
        self.fanout_text(json);
    }

    pub fn send_to(&self, tx: &mpsc::Sender<OutMessage>, message: OutMessage) {
        let _ = tx.try_send(message);
    }

    /// Write raw bytes to the PTY's stdin. Blocking I/O, so callers should
    /// invoke this from a `spawn_blocking` context if on a tokio worker thread
    /// handling many sessions.
    pub fn write_input(&self, bytes: &[u8]) {
        if let Ok(mut w) = self.bridge.writer.lock() {
            let _ = w.write_all(bytes);
        }
    }

    pub fn run_state(&self) -> PtyRunState {
        self.inner.lock().expect("session lock poisoned").run_state.clone()
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.lock().expect("session lock poisoned").clients.len()
    }

    pub fn assistant_tag(&self) -> &'static str {
        self.inner.lock().expect("session lock poisoned").assistant_tag
    }

    pub fn kill(&self) {
        let _ = self.bridge.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These exercise the pure client-bookkeeping logic directly on `Inner`,
    // sidestepping the need to spawn a real PTY bridge for a unit test.
    // The PTY-spawning path (`Session::spawn`) is covered by the server
    // crate's integration tests, which run against a real `bash`.

    #[test]
    fn authoritative_size_is_min_of_clients() {
        let mut inner = Inner::new();
        inner.clients.insert(0, ClientState { tx: mpsc::channel(8).0, size: (24, 80), last_chunked_at: None });
        inner.clients.insert(1, ClientState { tx: mpsc::channel(8).0, size: (30, 120), last_chunked_at: None });
        assert_eq!(inner.min_client_size(), (24, 80));

        inner.clients.remove(&0);
        assert_eq!(inner.min_client_size(), (30, 120));
    }

    #[test]
    fn no_clients_defaults_to_24x80() {
        let inner = Inner::new();
        assert_eq!(inner.min_client_size(), (24, 80));
    }

    #[test]
    fn chat_log_is_bounded() {
        let mut inner = Inner::new();
        for i in 0..15 {
            inner.push_chat(ChatMessage { user: "ada".into(), text: format!("msg {i}"), timestamp: i });
        }
        assert_eq!(inner.chat_log.len(), MAX_CHAT_LOG);
        assert_eq!(inner.chat_log.front().unwrap().text, "msg 5");
    }
}
