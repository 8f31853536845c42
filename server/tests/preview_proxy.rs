//! Integration tests for the preview reverse proxy, exercised end to end
//! against a real backend HTTP server and a real debug-hub WebSocket client
//! — no PTY is spawned, since `PreviewSupervisor` only needs an app port to
//! forward to.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use sweswe_core::debughub::DebugHub;
use sweswe_core::session::SessionId;
use sweswe_server::preview::PreviewSupervisor;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Spin up a trivial backend app on a fresh loopback port, serving an HTML
/// page at `/` (S4) and a JSON document at `/data.json` (S5).
async fn spawn_fake_backend() -> u16 {
    let app = Router::new()
        .route("/", get(|| async { axum::response::Html("<!doctype html><html><head></head><body>hi</body></html>") }))
        .route(
            "/data.json",
            get(|| async { ([("content-type", "application/json")], r#"{"a":1}"#) }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

async fn spawn_preview(app_port: u16) -> (u16, Arc<DebugHub>, SessionId, CancellationToken) {
    let hub = Arc::new(DebugHub::new());
    let session_id = SessionId::new();
    let shutdown = CancellationToken::new();
    let supervisor = PreviewSupervisor::new();

    // Pick a free preview port ourselves (tests don't go through PortAllocator's
    // deterministic 5x scheme, since several tests run concurrently and would
    // otherwise collide on the same app port range).
    let preview_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let preview_port = preview_listener.local_addr().unwrap().port();
    drop(preview_listener);

    supervisor.spawn(&shutdown, hub.clone(), session_id, app_port, preview_port);
    // give the proxy's own listener a moment to bind
    tokio::time::sleep(Duration::from_millis(100)).await;

    // leak the supervisor for the test's lifetime; cancellation tears down its task
    Box::leak(Box::new(supervisor));
    (preview_port, hub, session_id, shutdown)
}

#[tokio::test]
async fn html_response_gets_debug_script_injected_before_head_close() {
    let app_port = spawn_fake_backend().await;
    let (preview_port, _hub, _session, _shutdown) = spawn_preview(app_port).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{preview_port}/")).await.unwrap();
    assert!(resp.status().is_success());
    let body = resp.text().await.unwrap();
    assert!(body.contains("<script src=\"/__swe-swe-debug__/inject.js\"></script>"));
    assert!(body.find("<script").unwrap() < body.find("</head>").unwrap());
}

#[tokio::test]
async fn non_html_response_is_forwarded_byte_exact() {
    let app_port = spawn_fake_backend().await;
    let (preview_port, _hub, _session, _shutdown) = spawn_preview(app_port).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{preview_port}/data.json")).await.unwrap();
    assert!(resp.status().is_success());
    let body = resp.text().await.unwrap();
    assert_eq!(body, r#"{"a":1}"#);
}

#[tokio::test]
async fn backend_absent_renders_listening_page_with_502() {
    // An app port nothing is listening on.
    let app_port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (preview_port, _hub, _session, _shutdown) = spawn_preview(app_port).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{preview_port}/")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 502);
    let body = resp.text().await.unwrap();
    assert!(body.contains("Waiting for the app"));
}

#[tokio::test]
async fn open_url_without_shell_client_is_503() {
    let app_port = spawn_fake_backend().await;
    let (preview_port, _hub, _session, _shutdown) = spawn_preview(app_port).await;

    let resp = reqwest::get(format!(
        "http://127.0.0.1:{preview_port}/__swe-swe-debug__/open?url=http%3A%2F%2Flocalhost%3A3000%2Fabout"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
}

#[tokio::test]
async fn open_url_with_shell_client_connected_broadcasts_navigate() {
    let app_port = spawn_fake_backend().await;
    let (preview_port, _hub, _session, _shutdown) = spawn_preview(app_port).await;

    let (ws_stream, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{preview_port}/__swe-swe-debug__/ws"))
        .await
        .unwrap();
    let (_write, mut read) = ws_stream.split();

    // give the server a moment to register the shell connection
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = reqwest::get(format!(
        "http://127.0.0.1:{preview_port}/__swe-swe-debug__/open?url=http%3A%2F%2Flocalhost%3A3000%2Fabout"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("timed out waiting for navigate message")
        .expect("stream ended")
        .unwrap();
    match msg {
        Message::Text(text) => {
            assert!(text.contains("\"t\":\"navigate\""));
            assert!(text.contains("http://localhost:3000/about"));
        }
        other => panic!("expected a text frame, got {other:?}"),
    }
}
