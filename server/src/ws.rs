//! `/ws/<session-id>` terminal WebSocket endpoint: an upgrade handler plus a
//! per-connection task that selects between "bytes arrived from the pty" and
//! "the client sent a frame", on top of the multi-client snapshot-on-join
//! and client-size-tracking model `sweswe_core::session` implements.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use sweswe_core::protocol::{self, ClientFrame, ClientTextMessage, ServerTextMessage};
use sweswe_core::registry::NewSessionOpts;
use sweswe_core::session::{OutMessage, Session, SessionId, CLIENT_OUTBOX_CAPACITY};
use sweswe_core::upload;

use crate::state::AppState;

/// A client that sends nothing at all for this long is dropped.
const CLIENT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub async fn ws_handler(State(state): State<AppState>, Path(id): Path<String>, ws: WebSocketUpgrade) -> Response {
    let Some(session_id) = SessionId::parse(&id) else {
        return (StatusCode::BAD_REQUEST, "malformed session id").into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id)).into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: SessionId) {
    let app_port = match state.app_ports.allocate() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(session = %session_id, error = %e, "no app ports available for new session");
            return;
        }
    };

    let opts = NewSessionOpts {
        command: state.shell_cmd.clone(),
        project_path: state.working_directory.clone(),
        app_port,
        worktree: None,
    };
    let session = match state.registry.get_or_create(session_id, opts).await {
        Ok((session, created)) => {
            if !created {
                // A session already existed under this id; hand back the app port
                // just reserved since this connection reuses the existing PTY's.
                state.app_ports.release(app_port);
            } else if state.preview_enabled {
                spawn_preview(&state, session_id, session.app_port);
            }
            session
        }
        Err(e) => {
            state.app_ports.release(app_port);
            tracing::error!(session = %session_id, error = %e, "failed to create session");
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<OutMessage>(CLIENT_OUTBOX_CAPACITY);
    let (client_id, snapshot_frames, chat_log) = session.add_client(tx.clone(), 24, 80);

    let (mut ws_tx, mut ws_rx) = socket.split();

    for frame in snapshot_frames {
        let msg = match frame {
            OutMessage::Binary(b) => Message::Binary(b),
            OutMessage::Text(t) => Message::Text(t.into()),
        };
        if ws_tx.send(msg).await.is_err() {
            break;
        }
    }
    for chat in chat_log {
        let json = ServerTextMessage::Chat { user_name: &chat.user, text: &chat.text, timestamp: chat.timestamp }.to_json();
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    let writer_task = async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg {
                OutMessage::Binary(b) => Message::Binary(b),
                OutMessage::Text(t) => Message::Text(t.into()),
            };
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    };

    let reader_session = session.clone();
    let reader_tx = tx.clone();
    let reader_working_directory = state.working_directory.clone();
    let reader_task = async move {
        loop {
            let next = match tokio::time::timeout(CLIENT_IDLE_TIMEOUT, ws_rx.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_elapsed) => {
                    tracing::debug!(session = %session_id, client = client_id, "client idle for 90s, closing");
                    break;
                }
            };
            match next {
                Message::Binary(bytes) => {
                    handle_binary_frame(&reader_session, &reader_tx, &reader_working_directory, client_id, &bytes).await
                }
                Message::Text(text) => handle_text_message(&reader_session, &reader_tx, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = writer_task => {}
        _ = reader_task => {}
    }

    session.remove_client(client_id);
    state.registry.schedule_removal_if_idle(session_id);
}

async fn handle_binary_frame(
    session: &Arc<Session>,
    client_tx: &mpsc::Sender<OutMessage>,
    project_root: &std::path::Path,
    client_id: u64,
    bytes: &[u8],
) {
    match protocol::parse_binary_frame(bytes) {
        ClientFrame::Resize(resize) => {
            session.set_client_size(client_id, resize.rows, resize.cols);
        }
        ClientFrame::Upload(upload_frame) => {
            let project_root = project_root.to_path_buf();
            let result = tokio::task::spawn_blocking(move || upload::write_upload(&project_root, &upload_frame.name, &upload_frame.data))
                .await
                .expect("upload write task panicked");
            let ack = match &result {
                Ok(filename) => {
                    let saved_path = format!("{}/{filename}", upload::UPLOAD_DIR);
                    let line = format!("{saved_path}\n").into_bytes();
                    let session = session.clone();
                    tokio::task::spawn_blocking(move || session.write_input(&line)).await.expect("pty write task panicked");
                    ServerTextMessage::FileUpload { success: true, filename, error: None }.to_json()
                }
                Err(e) => ServerTextMessage::FileUpload { success: false, filename: "", error: Some(&e.to_string()) }.to_json(),
            };
            session.send_to(client_tx, OutMessage::Text(ack));
        }
        ClientFrame::Keystrokes(bytes) => {
            let session = session.clone();
            tokio::task::spawn_blocking(move || session.write_input(&bytes)).await.expect("pty write task panicked");
        }
    }
}

fn handle_text_message(session: &Arc<Session>, client_tx: &mpsc::Sender<OutMessage>, text: &str) {
    let Ok(msg) = serde_json::from_str::<ClientTextMessage>(text) else {
        return;
    };
    match msg {
        ClientTextMessage::Ping { data } => {
            let pong = ServerTextMessage::Pong { data }.to_json();
            session.send_to(client_tx, OutMessage::Text(pong));
        }
        ClientTextMessage::Chat { user_name, text, timestamp } => {
            session.post_chat(user_name, text, timestamp);
        }
    }
}

fn spawn_preview(state: &AppState, session_id: SessionId, app_port: u16) {
    let preview_port = match state.ports.allocate(app_port) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(session = %session_id, error = %e, "could not allocate preview proxy port");
            return;
        }
    };
    state.previews.spawn(&state.shutdown, state.hub.clone(), session_id, app_port, preview_port);
}
