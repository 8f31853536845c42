//! Preview reverse proxy: forward HTTP/WebSocket traffic to the user's dev
//! server running inside the PTY, injecting the debug bridge script into
//! HTML responses along the way. Deliberately framework-agnostic
//! (`http::Request`/`http::Response` rather than `axum::extract::Request`)
//! so the server crate, the only crate that depends on `axum`, does the
//! conversion at its edges.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::error::ProxyError;

/// Request headers that a WebSocket handshake manages itself and must not be
/// copied over verbatim from the client's original upgrade request.
const HANDSHAKE_MANAGED_HEADERS: &[http::HeaderName] = &[
    http::header::HOST,
    http::header::CONNECTION,
    http::header::UPGRADE,
    http::header::SEC_WEBSOCKET_KEY,
    http::header::SEC_WEBSOCKET_VERSION,
    http::header::SEC_WEBSOCKET_ACCEPT,
];

/// Injected before `</head>` in proxied HTML documents so the page can talk
/// to the debug hub.
pub const INJECTED_SCRIPT_TAG: &str = "<script src=\"/__swe-swe-debug__/inject.js\"></script>";

/// How many leading bytes of a response body are inspected for an `<html`
/// marker before deciding whether to inject.
const HTML_SNIFF_WINDOW: usize = 512;

/// Forward an HTTP request to the app listening on `app_port`, injecting
/// the debug script into HTML responses. Returns [`ProxyError::BackendUnreachable`]
/// if the app hasn't started listening yet — callers render [`listening_page`]
/// in that case instead of a raw 502.
pub async fn forward_http(
    client: &reqwest::Client,
    app_port: u16,
    req: http::Request<Bytes>,
) -> Result<http::Response<Bytes>, ProxyError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = format!("http://127.0.0.1:{app_port}{path_and_query}");

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut builder = client.request(method, &url);
    for (name, value) in parts.headers.iter() {
        if name == http::header::HOST {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let upstream = builder.body(body.to_vec()).send().await.map_err(|_| ProxyError::BackendUnreachable(app_port))?;

    let status = upstream.status().as_u16();
    let headers = upstream.headers().clone();
    let body = upstream.bytes().await.map_err(|_| ProxyError::BackendUnreachable(app_port))?;
    let body = maybe_inject(&headers, body);

    let mut response = http::Response::builder().status(status);
    for (name, value) in headers.iter() {
        if name == http::header::CONTENT_LENGTH {
            continue; // injection changes the body length; let the server recompute it
        }
        response = response.header(name.as_str(), value.as_bytes());
    }
    response.body(body).map_err(|e| ProxyError::MalformedUrl(e.to_string()))
}

fn content_type_is_html(headers: &HeaderMap<HeaderValue>) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.starts_with("text/html"))
        .unwrap_or(false)
}

fn looks_like_html(body: &[u8]) -> bool {
    let probe_len = body.len().min(HTML_SNIFF_WINDOW);
    let probe = String::from_utf8_lossy(&body[..probe_len]).to_lowercase();
    probe.contains("<html")
}

fn maybe_inject(headers: &HeaderMap<HeaderValue>, body: Bytes) -> Bytes {
    if content_type_is_html(headers) && looks_like_html(&body) {
        inject_before_head_close(body)
    } else {
        body
    }
}

/// Inject just before `</head>`, or append to the end of the document if no
/// `</head>` is present.
fn inject_before_head_close(body: Bytes) -> Bytes {
    let haystack = String::from_utf8_lossy(&body);
    let mut out = Vec::with_capacity(body.len() + INJECTED_SCRIPT_TAG.len());
    match haystack.to_lowercase().find("</head>") {
        Some(idx) => {
            out.extend_from_slice(&body[..idx]);
            out.extend_from_slice(INJECTED_SCRIPT_TAG.as_bytes());
            out.extend_from_slice(&body[idx..]);
        }
        None => {
            out.extend_from_slice(&body);
            out.extend_from_slice(INJECTED_SCRIPT_TAG.as_bytes());
        }
    }
    Bytes::from(out)
}

/// The page served in place of a proxied response while the app hasn't
/// started listening on its port yet.
pub fn listening_page(app_port: u16) -> http::Response<Bytes> {
    let html = format!(
        "<!doctype html><html><head><meta http-equiv=\"refresh\" content=\"1\"></head>\
         <body style=\"font-family: sans-serif; padding: 2rem;\">\
         <p>Waiting for the app on port {app_port} to start…</p></body></html>"
    );
    http::Response::builder()
        .status(502)
        .header(http::header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Bytes::from(html))
        .expect("static listening page always builds")
}

/// Dial the backend's WebSocket endpoint for a hijacked `Upgrade: websocket`
/// request, carrying over the client's original upgrade headers (subprotocol
/// negotiation, cookies, auth) verbatim except the ones the handshake itself
/// manages.
pub async fn dial_backend_ws(
    app_port: u16,
    path_and_query: &str,
    client_headers: &HeaderMap<HeaderValue>,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, ProxyError> {
    let url = format!("ws://127.0.0.1:{app_port}{path_and_query}");
    let mut request = url.into_client_request().map_err(|e| ProxyError::MalformedUrl(e.to_string()))?;
    for (name, value) in client_headers.iter() {
        if HANDSHAKE_MANAGED_HEADERS.contains(name) {
            continue;
        }
        request.headers_mut().insert(name.clone(), value.clone());
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(|_| ProxyError::BackendUnreachable(app_port))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_script_before_head_close() {
        let body = Bytes::from_static(b"<html><head><title>x</title></head><body></body></html>");
        let out = inject_before_head_close(body);
        let text = String::from_utf8(out.to_vec()).unwrap();
        assert!(text.contains(INJECTED_SCRIPT_TAG));
        assert!(text.find(INJECTED_SCRIPT_TAG).unwrap() < text.find("</head>").unwrap());
    }

    #[test]
    fn appends_script_when_head_close_is_absent() {
        let body = Bytes::from_static(b"<html><body>no head tag here</body></html>");
        let out = inject_before_head_close(body.clone());
        let text = String::from_utf8(out.to_vec()).unwrap();
        assert!(text.starts_with("<html><body>no head tag here</body></html>"));
        assert!(text.ends_with(INJECTED_SCRIPT_TAG));
    }

    #[test]
    fn non_html_content_type_is_not_sniffed() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = Bytes::from_static(b"{\"html\": \"<html>not real</html>\"}");
        assert!(!content_type_is_html(&headers) || !looks_like_html(&body));
        assert_eq!(maybe_inject(&headers, body.clone()), body);
    }

    #[test]
    fn html_content_type_with_marker_is_injected() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        let body = Bytes::from_static(b"<html><head></head><body>hi</body></html>");
        let out = maybe_inject(&headers, body);
        assert!(String::from_utf8(out.to_vec()).unwrap().contains(INJECTED_SCRIPT_TAG));
    }
}
