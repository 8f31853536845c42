//! Process-wide shared state, with its lifecycle made explicit rather than
//! living in lazy module statics. One `AppState` is built in `main` and
//! cloned (cheaply, via `Arc`) into every axum handler.

use std::path::PathBuf;
use std::sync::Arc;

use sweswe_core::debughub::DebugHub;
use sweswe_core::ports::{AppPortPool, PortAllocator};
use sweswe_core::registry::SessionRegistry;
use tokio_util::sync::CancellationToken;

use crate::preview::PreviewSupervisor;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<DebugHub>,
    pub ports: Arc<PortAllocator>,
    pub app_ports: Arc<AppPortPool>,
    pub previews: Arc<PreviewSupervisor>,
    pub shell_cmd: String,
    pub working_directory: PathBuf,
    pub preview_enabled: bool,
    /// Cancelled on SIGINT/SIGTERM; every long-lived task is spawned bound
    /// to this scope so shutdown can cancel them uniformly.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(shell_cmd: String, working_directory: PathBuf, preview_enabled: bool) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            hub: Arc::new(DebugHub::new()),
            ports: Arc::new(PortAllocator::new()),
            app_ports: Arc::new(AppPortPool::new()),
            previews: Arc::new(PreviewSupervisor::new()),
            shell_cmd,
            working_directory,
            preview_enabled,
            shutdown: CancellationToken::new(),
        }
    }
}
