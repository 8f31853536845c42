//! Top-level HTTP surface: the session list/landing page, the terminal UI
//! shell, embedded static assets, liveness, and the `/ws/<id>` upgrade wired
//! in from [`crate::ws`]. Deliberately narrow — no job queue, no arbitrary
//! preview-by-id route, no chat webhook — this server only ever proxies one
//! dev server per session through its own deterministic port.

use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_embed::ServeEmbed;

use sweswe_core::session::SessionId;

use crate::assets::{self, StaticAssets};
use crate::state::AppState;
use crate::ws::ws_handler;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/session/{id}", get(session_page_handler))
        .route("/healthz", get(healthz_handler))
        .route("/ws/{id}", get(ws_handler))
        .nest_service("/static", ServeEmbed::<StaticAssets>::new())
        .with_state(state)
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// `GET /` — active session list plus a "new session" link. Non-persistent:
/// there is nothing to store, a session is created the moment its first
/// `/ws/<id>` connection arrives, so the "form" just points at a freshly
/// minted id.
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    let mut rows = String::new();
    for id in state.registry.list_ids() {
        let Some(session) = state.registry.get(id) else { continue };
        rows.push_str(&format!(
            "<tr><td><a href=\"/session/{id}\">{id}</a></td><td>{}</td><td>{}</td><td>{}</td></tr>",
            html_escape(&session.command),
            session.viewer_count(),
            html_escape(session.assistant_tag()),
        ));
    }
    if rows.is_empty() {
        rows.push_str("<tr><td colspan=\"4\"><em>no active sessions</em></td></tr>");
    }

    let new_id = SessionId::new();
    let body = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>sweswe</title></head><body>\
         <h1>sweswe</h1>\
         <p><a href=\"/session/{new_id}\">start a new session</a></p>\
         <table border=\"1\" cellpadding=\"4\"><thead><tr><th>session</th><th>command</th><th>viewers</th><th>assistant</th></tr></thead>\
         <tbody>{rows}</tbody></table>\
         </body></html>"
    );
    Html(body)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[derive(serde::Deserialize, Default)]
pub struct SessionPageQuery {
    pub assistant: Option<String>,
    pub preview: Option<String>,
    pub yolo: Option<String>,
}

/// `GET /session/<id>` — the terminal UI shell. `?preview`
/// suppresses the live WebSocket client-side for UI development; that's a
/// front-end concern handled by `terminal.js` reading the query string
/// itself, so this handler only needs to pass the raw flags through.
async fn session_page_handler(Path(id): Path<String>, Query(query): Query<SessionPageQuery>) -> Response {
    if SessionId::parse(&id).is_none() {
        return (axum::http::StatusCode::BAD_REQUEST, "malformed session id").into_response();
    }
    let assistant = query.assistant.as_deref().unwrap_or("unknown");
    let yolo = query.yolo.is_some();
    Html(assets::session_page(&id, assistant, yolo)).into_response()
}
