//! Debug hub: a small pub/sub relay between the script injected into
//! proxied pages (the "shell" connection) and one or more UI observer
//! connections (devtools-style panels attached to a session), routing each
//! message by its `t` tag. Per-connection bounded `mpsc` channels with
//! drop-and-log back-pressure rather than an unbounded broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::session::SessionId;

/// Outbound queue depth for a single debug hub connection. A connection this
/// far behind is considered stalled; further sends to it are dropped rather
/// than blocking the relay.
const HUB_OUTBOX_CAPACITY: usize = 64;

pub type ObserverId = u64;

/// Wire tag is `t`, matching `debug-inject.js`/`shell.html`'s `{t: "...", ...}`
/// messages — not `type`, which would collide with nothing here but is the
/// more common serde convention; this hub follows what the injected script
/// actually sends. Unrecognised fields are ignored (no `deny_unknown_fields`)
/// since most variants only need the tag to route correctly.
#[derive(Debug, Deserialize)]
#[serde(tag = "t")]
enum DebugMessage {
    // UI observer -> shell (commands)
    Navigate { #[allow(dead_code)] url: String },
    Reload,
    Back,
    Forward,
    Eval { #[allow(dead_code)] id: String, #[allow(dead_code)] code: String },
    Query { #[allow(dead_code)] id: String, #[allow(dead_code)] selector: String },
    Click { #[allow(dead_code)] id: String, #[allow(dead_code)] selector: String },
    Fill { #[allow(dead_code)] id: String, #[allow(dead_code)] selector: String, #[allow(dead_code)] value: String },
    #[serde(rename = "getText")]
    GetText { #[allow(dead_code)] id: String, #[allow(dead_code)] selector: String },
    #[serde(rename = "getAttribute")]
    GetAttribute { #[allow(dead_code)] id: String, #[allow(dead_code)] selector: String, #[allow(dead_code)] name: String },
    #[serde(rename = "waitForSelector")]
    WaitForSelector {
        #[allow(dead_code)] id: String,
        #[allow(dead_code)] selector: String,
        #[allow(dead_code)] #[serde(rename = "timeoutMs")] timeout_ms: Option<u64>,
    },
    #[serde(rename = "getUrl")]
    GetUrl { #[allow(dead_code)] id: String },
    #[serde(rename = "getTitle")]
    GetTitle { #[allow(dead_code)] id: String },

    // Shell/inject -> UI observers (events and results)
    #[serde(rename = "urlchange")]
    UrlChange { #[allow(dead_code)] url: String },
    Console { #[allow(dead_code)] level: String, #[allow(dead_code)] args: Vec<serde_json::Value> },
    Error { #[allow(dead_code)] message: String, #[allow(dead_code)] stack: Option<String> },
    Fetch {
        #[allow(dead_code)] url: String,
        #[allow(dead_code)] method: String,
        #[allow(dead_code)] status: u16,
        #[allow(dead_code)] #[serde(rename = "durationMs")] duration_ms: u64,
    },
    #[serde(rename = "evalResult")]
    EvalResult { #[allow(dead_code)] id: String, #[allow(dead_code)] result: serde_json::Value, #[allow(dead_code)] error: Option<String> },
    #[serde(rename = "queryResult")]
    QueryResult { #[allow(dead_code)] id: String, #[allow(dead_code)] result: serde_json::Value, #[allow(dead_code)] error: Option<String> },
}

enum Route {
    ToShell,
    ToObservers,
}

fn route_for(msg: &DebugMessage) -> Route {
    match msg {
        DebugMessage::Navigate { .. }
        | DebugMessage::Reload
        | DebugMessage::Back
        | DebugMessage::Forward
        | DebugMessage::Eval { .. }
        | DebugMessage::Query { .. }
        | DebugMessage::Click { .. }
        | DebugMessage::Fill { .. }
        | DebugMessage::GetText { .. }
        | DebugMessage::GetAttribute { .. }
        | DebugMessage::WaitForSelector { .. }
        | DebugMessage::GetUrl { .. }
        | DebugMessage::GetTitle { .. } => Route::ToShell,
        DebugMessage::UrlChange { .. }
        | DebugMessage::Console { .. }
        | DebugMessage::Error { .. }
        | DebugMessage::Fetch { .. }
        | DebugMessage::QueryResult { .. }
        | DebugMessage::EvalResult { .. } => Route::ToObservers,
    }
}

#[derive(Default)]
struct HubChannels {
    shell: Mutex<Option<mpsc::Sender<String>>>,
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<String>>>,
    next_observer_id: AtomicU64,
}

impl HubChannels {
    fn send_to_shell(&self, text: &str) -> bool {
        let guard = self.shell.lock().expect("debug hub lock poisoned");
        let Some(tx) = guard.as_ref() else { return false };
        if tx.try_send(text.to_string()).is_err() {
            tracing::warn!("debug hub shell connection backed up, dropping message");
        }
        true
    }

    fn send_to_observers(&self, text: &str) {
        let observers = self.observers.lock().expect("debug hub lock poisoned");
        for (id, tx) in observers.iter() {
            if tx.try_send(text.to_string()).is_err() {
                tracing::warn!(observer = id, "debug hub observer backed up, dropping message");
            }
        }
    }
}

/// Per-session shell/observer connection registry plus the relay logic that
/// routes a raw JSON message between them.
#[derive(Default)]
pub struct DebugHub {
    hubs: DashMap<SessionId, std::sync::Arc<HubChannels>>,
}

impl DebugHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self, session: SessionId) -> std::sync::Arc<HubChannels> {
        self.hubs.entry(session).or_default().clone()
    }

    /// Attach the injected page's "shell" connection, replacing any previous
    /// one (only one shell connection per session makes sense; a page reload
    /// naturally supersedes the last one).
    pub fn register_shell(&self, session: SessionId) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(HUB_OUTBOX_CAPACITY);
        *self.hub(session).shell.lock().expect("debug hub lock poisoned") = Some(tx);
        rx
    }

    pub fn unregister_shell(&self, session: SessionId) {
        if let Some(hub) = self.hubs.get(&session) {
            *hub.shell.lock().expect("debug hub lock poisoned") = None;
        }
    }

    /// Attach a new UI observer connection, returning its id (for later
    /// unregistration) and its receiver.
    pub fn register_observer(&self, session: SessionId) -> (ObserverId, mpsc::Receiver<String>) {
        let hub = self.hub(session);
        let id = hub.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(HUB_OUTBOX_CAPACITY);
        hub.observers.lock().expect("debug hub lock poisoned").insert(id, tx);
        (id, rx)
    }

    pub fn unregister_observer(&self, session: SessionId, observer: ObserverId) {
        if let Some(hub) = self.hubs.get(&session) {
            hub.observers.lock().expect("debug hub lock poisoned").remove(&observer);
        }
    }

    /// Parse and route a raw JSON message from either side of the hub.
    /// Malformed or unrecognised messages are dropped and logged rather than
    /// propagated.
    pub fn relay(&self, session: SessionId, raw: &str) {
        let msg: DebugMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(session = %session, error = %e, "dropping malformed debug hub message");
                return;
            }
        };
        let Some(hub) = self.hubs.get(&session) else {
            return;
        };
        match route_for(&msg) {
            Route::ToShell => {
                hub.send_to_shell(raw);
            }
            Route::ToObservers => hub.send_to_observers(raw),
        }
    }

    /// Broadcast a `{"t":"navigate","url":...}` command to the session's
    /// shell connection. Returns `false` if no shell client is currently
    /// attached, so the HTTP caller can answer 503 rather than silently
    /// dropping the navigation.
    pub fn send_navigate(&self, session: SessionId, url: &str) -> bool {
        let Some(hub) = self.hubs.get(&session) else { return false };
        let msg = serde_json::json!({"t": "navigate", "url": url}).to_string();
        hub.send_to_shell(&msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn navigate_routes_to_shell_not_observers() {
        let hub = DebugHub::new();
        let session = SessionId::new();
        let mut shell_rx = hub.register_shell(session);
        let (_oid, mut observer_rx) = hub.register_observer(session);

        hub.relay(session, r#"{"t":"navigate","url":"http://localhost:3000"}"#);

        assert!(shell_rx.try_recv().is_ok());
        assert!(observer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn console_routes_to_observers_not_shell() {
        let hub = DebugHub::new();
        let session = SessionId::new();
        let mut shell_rx = hub.register_shell(session);
        let (_oid, mut observer_rx) = hub.register_observer(session);

        hub.relay(session, r#"{"t":"console","level":"log","args":[]}"#);

        assert!(observer_rx.try_recv().is_ok());
        assert!(shell_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_json_is_dropped_silently() {
        let hub = DebugHub::new();
        let session = SessionId::new();
        let mut shell_rx = hub.register_shell(session);
        hub.relay(session, "not json");
        assert!(shell_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_observer_no_longer_receives() {
        let hub = DebugHub::new();
        let session = SessionId::new();
        let (oid, mut observer_rx) = hub.register_observer(session);
        hub.unregister_observer(session, oid);
        hub.relay(session, r#"{"t":"reload"}"#);
        hub.relay(session, r#"{"t":"console","level":"log","args":[]}"#);
        assert!(observer_rx.try_recv().is_err());
    }
}
