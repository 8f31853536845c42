//! Session registry: the concurrent `SessionId -> Session` table plus the
//! per-id creation lock that guarantees at most one PTY is ever spawned for
//! a given id, even under a thundering herd of simultaneous first connects.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::SessionError;
use crate::pty::PtyRunState;
use crate::session::{Session, SessionId, REMOVAL_GRACE_PERIOD};

/// Parameters needed to spawn a session that doesn't exist yet.
pub struct NewSessionOpts {
    pub command: String,
    pub project_path: PathBuf,
    pub app_port: u16,
    pub worktree: Option<String>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    creation_locks: DashMap<SessionId, Arc<AsyncMutex<()>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    pub fn list_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Return the existing session for `id`, or spawn one. Concurrent callers
    /// racing on the same unseen id serialize on a per-id async lock so
    /// exactly one PTY is ever spawned for that id.
    pub async fn get_or_create(&self, id: SessionId, opts: NewSessionOpts) -> Result<(Arc<Session>, bool), SessionError> {
        if let Some(existing) = self.get(id) {
            return Ok((existing, false));
        }

        let lock = {
            let entry = self.creation_locks.entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(())));
            entry.value().clone()
        };
        let _guard = lock.lock().await;

        // Re-check: another caller may have won the race while we waited for the lock.
        if let Some(existing) = self.get(id) {
            return Ok((existing, false));
        }

        let session = Session::spawn(id, opts.command, opts.project_path, opts.app_port, opts.worktree)?;
        self.sessions.insert(id, session.clone());
        Ok((session, true))
    }

    pub fn remove(&self, id: SessionId) {
        self.sessions.remove(&id);
        self.creation_locks.remove(&id);
    }

    /// Called whenever a client disconnects from `id`. If the PTY has already
    /// exited and no client is left watching, schedule the session's removal
    /// after a grace period, so a quick page reload still sees the exited
    /// session's final scrollback instead of spawning a brand new shell.
    pub fn schedule_removal_if_idle(self: &Arc<Self>, id: SessionId) {
        let Some(session) = self.get(id) else { return };
        if session.viewer_count() > 0 {
            return;
        }
        if !matches!(session.run_state(), PtyRunState::Exited { .. }) {
            return;
        }

        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REMOVAL_GRACE_PERIOD).await;
            if let Some(session) = registry.get(id) {
                if session.viewer_count() == 0 {
                    registry.remove(id);
                    tracing::info!(session = %id, "removed exited session after grace period");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_get_or_create_spawns_exactly_one_session() {
        let registry = Arc::new(SessionRegistry::new());
        let id = SessionId::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_create(
                        id,
                        NewSessionOpts {
                            command: "true".into(),
                            project_path: std::env::temp_dir(),
                            app_port: 53100,
                            worktree: None,
                        },
                    )
                    .await
            }));
        }

        let mut created_count = 0;
        for h in handles {
            let (_session, created) = h.await.unwrap().expect("spawn should succeed");
            if created {
                created_count += 1;
            }
        }

        assert_eq!(created_count, 1, "exactly one caller should have created the session");
        assert_eq!(registry.list_ids().len(), 1);
    }

    #[test]
    fn unknown_id_returns_none() {
        let registry = SessionRegistry::new();
        assert!(registry.get(SessionId::new()).is_none());
    }
}
