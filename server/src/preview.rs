//! Preview reverse proxy + debug hub HTTP surface. Each session gets its own
//! small axum server bound to the port formed by prepending `5` to the app
//! port's digits, started when the session is created and torn down when
//! the session is removed from the registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use sweswe_core::debughub::DebugHub;
use sweswe_core::proxy;
use sweswe_core::session::SessionId;

use crate::assets;

const MAX_PROXY_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Per-request timeout for the HTTP reverse proxy; a hung backend shouldn't
/// block the proxy task forever.
const PROXY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct PreviewState {
    session_id: SessionId,
    app_port: u16,
    hub: Arc<DebugHub>,
    client: reqwest::Client,
}

/// Bookkeeping for one session's running preview proxy: explicit init/drain
/// rather than lazy statics.
struct PreviewEntry {
    app_port: u16,
    preview_port: u16,
    stop: CancellationToken,
}

/// The two ports freed when a preview proxy is torn down.
pub struct ReleasedPorts {
    pub app_port: u16,
    pub preview_port: u16,
}

#[derive(Default)]
pub struct PreviewSupervisor {
    entries: DashMap<SessionId, PreviewEntry>,
}

impl PreviewSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preview_port_for(&self, session_id: SessionId) -> Option<u16> {
        self.entries.get(&session_id).map(|e| e.preview_port)
    }

    /// Sessions this supervisor currently has a preview proxy running for —
    /// used by the reaper task to find orphans no longer in the registry.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Start the preview proxy + debug hub server for a freshly created
    /// session, bound to `preview_port` and forwarding to `127.0.0.1:app_port`.
    pub fn spawn(&self, parent_shutdown: &CancellationToken, hub: Arc<DebugHub>, session_id: SessionId, app_port: u16, preview_port: u16) {
        let stop = parent_shutdown.child_token();
        self.entries.insert(session_id, PreviewEntry { app_port, preview_port, stop: stop.clone() });

        tokio::spawn(async move {
            let client = reqwest::Client::builder()
                .timeout(PROXY_REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client with timeout always builds");
            let state = PreviewState { session_id, app_port, hub, client };
            let app = router(state);
            let addr = SocketAddr::from(([127, 0, 0, 1], preview_port));
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(session = %session_id, port = preview_port, error = %e, "failed to bind preview proxy port");
                    return;
                }
            };
            tracing::info!(session = %session_id, port = preview_port, app_port, "preview proxy listening");
            let serve = axum::serve(listener, app);
            let graceful = serve.with_graceful_shutdown(stop.cancelled_owned());
            if let Err(e) = graceful.await {
                tracing::error!(session = %session_id, error = %e, "preview proxy server error");
            }
        });
    }

    /// Stop and forget the preview proxy for a session that has left the
    /// registry: ports are released once the owning session is removed.
    pub fn stop(&self, session_id: SessionId) -> Option<ReleasedPorts> {
        let (_, entry) = self.entries.remove(&session_id)?;
        entry.stop.cancel();
        Some(ReleasedPorts { app_port: entry.app_port, preview_port: entry.preview_port })
    }

    pub fn stop_all(&self) {
        for entry in self.entries.iter() {
            entry.stop.cancel();
        }
        self.entries.clear();
    }
}

fn router(state: PreviewState) -> Router {
    Router::new()
        .route("/__swe-swe-shell__", get(shell_page_handler))
        .route("/__swe-swe-debug__/inject.js", get(inject_script_handler))
        .route("/__swe-swe-debug__/open", get(open_url_handler))
        .route("/__swe-swe-debug__/ws", get(debug_shell_ws_handler))
        .route("/__swe-swe-debug__/ui", get(debug_ui_ws_handler))
        .fallback(catch_all)
        .with_state(state)
}

async fn shell_page_handler() -> Response {
    ([("content-type", "text/html; charset=utf-8")], assets::shell_page()).into_response()
}

async fn inject_script_handler() -> Response {
    ([("content-type", "application/javascript; charset=utf-8")], assets::debug_inject_script()).into_response()
}

#[derive(serde::Deserialize)]
struct OpenQuery {
    url: String,
}

/// `GET /__swe-swe-debug__/open?url=<url-encoded>`.
async fn open_url_handler(State(state): State<PreviewState>, Query(query): Query<OpenQuery>) -> Response {
    if http::Uri::try_from(query.url.as_str()).is_err() {
        return (StatusCode::BAD_REQUEST, "malformed url").into_response();
    }
    if state.hub.send_navigate(state.session_id, &query.url) {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no shell client attached").into_response()
    }
}

/// `/__swe-swe-debug__/ws` — the injected page / shell page's own connection.
async fn debug_shell_ws_handler(State(state): State<PreviewState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| debug_hub_pump(socket, state, Side::Shell))
}

/// `/__swe-swe-debug__/ui` — a UI observer connection.
async fn debug_ui_ws_handler(State(state): State<PreviewState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| debug_hub_pump(socket, state, Side::Observer))
}

enum Side {
    Shell,
    Observer,
}

async fn debug_hub_pump(socket: WebSocket, state: PreviewState, side: Side) {
    let (mut tx, mut rx) = socket.split();
    let (outbound, observer_id) = match side {
        Side::Shell => (state.hub.register_shell(state.session_id), None),
        Side::Observer => {
            let (id, outbound) = state.hub.register_observer(state.session_id);
            (outbound, Some(id))
        }
    };
    let mut outbound = outbound;

    let write_task = async {
        while let Some(text) = outbound.recv().await {
            if tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    };
    let read_task = async {
        while let Some(Ok(msg)) = rx.next().await {
            if let Message::Text(text) = msg {
                state.hub.relay(state.session_id, &text);
            }
        }
    };
    tokio::select! {
        _ = write_task => {}
        _ = read_task => {}
    }

    match side {
        Side::Shell => state.hub.unregister_shell(state.session_id),
        Side::Observer => {
            if let Some(id) = observer_id {
                state.hub.unregister_observer(state.session_id, id);
            }
        }
    }
}

fn is_websocket_upgrade(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Everything not matched above: a WebSocket upgrade is hijacked and piped
/// to the backend verbatim; everything else is a regular HTTP reverse proxy
/// with HTML injection, falling back to the 502 "listening for app" page if
/// the backend hasn't started yet.
async fn catch_all(State(state): State<PreviewState>, req: Request) -> Response {
    if is_websocket_upgrade(req.headers()) {
        let path_and_query = req.uri().path_and_query().map(|p| p.as_str().to_string()).unwrap_or_else(|| "/".to_string());
        let client_headers = req.headers().clone();
        let (mut parts, _body) = req.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => {
                upgrade.on_upgrade(move |socket| hijack_ws(socket, state.app_port, path_and_query, client_headers)).into_response()
            }
            Err(rejection) => rejection.into_response(),
        };
    }

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, MAX_PROXY_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_REQUEST, "body too large").into_response(),
    };
    let backend_req = http::Request::from_parts(parts, body_bytes);

    match proxy::forward_http(&state.client, state.app_port, backend_req).await {
        Ok(resp) => response_from_core(resp),
        Err(_) => response_from_core(proxy::listening_page(state.app_port)),
    }
}

fn response_from_core(resp: http::Response<bytes::Bytes>) -> Response {
    let (parts, body) = resp.into_parts();
    Response::from_parts(parts, Body::from(body))
}

/// Dial the backend's websocket endpoint and pipe messages bidirectionally
/// until either side closes.
async fn hijack_ws(client_socket: WebSocket, app_port: u16, path_and_query: String, client_headers: http::HeaderMap) {
    let backend = match proxy::dial_backend_ws(app_port, &path_and_query, &client_headers).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(app_port, error = %e, "preview proxy could not reach backend websocket");
            return;
        }
    };
    let (mut client_tx, mut client_rx) = client_socket.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let client_to_backend = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let forwarded = match msg {
                Message::Text(t) => tokio_tungstenite::tungstenite::Message::Text(t.as_str().into()),
                Message::Binary(b) => tokio_tungstenite::tungstenite::Message::Binary(b),
                Message::Close(_) => break,
                _ => continue,
            };
            if backend_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    };
    let backend_to_client = async {
        while let Some(Ok(msg)) = backend_rx.next().await {
            let forwarded = match msg {
                tokio_tungstenite::tungstenite::Message::Text(t) => Message::Text(t.as_str().into()),
                tokio_tungstenite::tungstenite::Message::Binary(b) => Message::Binary(b),
                tokio_tungstenite::tungstenite::Message::Close(_) => break,
                _ => continue,
            };
            if client_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    };
    tokio::select! {
        _ = client_to_backend => {}
        _ = backend_to_client => {}
    }
}

/// A no-op query map type alias so `Query<OpenQuery>` rejections read nicely;
/// kept local since this is the only query-string extraction in this module.
#[allow(dead_code)]
type _QueryParams = HashMap<String, String>;
