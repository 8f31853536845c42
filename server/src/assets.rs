//! Embedded static assets: the session page shell, the shell page document,
//! the injected debug script and the CSS/JS the session page needs are
//! compiled into the binary with `rust-embed`, so the container image needs
//! no extra `COPY` step for a handful of static files.

use rust_embed::RustEmbed;

#[derive(RustEmbed, Clone)]
#[folder = "assets/static"]
pub struct StaticAssets;

fn asset_str(name: &str) -> &'static str {
    let file = StaticAssets::get(name).unwrap_or_else(|| panic!("missing embedded asset {name}"));
    // Leaked once per process: assets are a handful of small files read at
    // most a few times per request, not a hot allocation path.
    Box::leak(String::from_utf8(file.data.into_owned()).expect("embedded asset is valid utf-8").into_boxed_str())
}

/// The injected debug bridge script served at `/__swe-swe-debug__/inject.js`
/// — the same bytes [`crate::preview`] hands back for that route.
pub fn debug_inject_script() -> &'static str {
    asset_str("debug-inject.js")
}

/// The shell page document served at `/__swe-swe-shell__`.
pub fn shell_page() -> &'static str {
    asset_str("shell.html")
}

/// The session page shell served at `/session/<id>`, with the
/// session id and detected-assistant hint substituted in.
pub fn session_page(session_id: &str, assistant: &str, yolo: bool) -> String {
    asset_str("session.html")
        .replace("{{SESSION_ID}}", session_id)
        .replace("{{ASSISTANT}}", assistant)
        .replace("{{YOLO}}", if yolo { "true" } else { "false" })
}
