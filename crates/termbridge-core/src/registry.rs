//! The session registry.
//!
//! The registry is the sole owner of the id → session map. It allocates
//! ids, starts and stores sessions, routes per-session operations through
//! lookup + state validation, and tears everything down at host shutdown.
//! It carries no ambient state — construct one per host process (or one
//! per test) and drop it when done.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::collector::Collected;
use crate::error::{Error, Result};
use crate::session::{Session, SessionState, SessionSummary};
use crate::spec::SessionSpec;
use crate::validate::ValidationGate;

/// In-memory map of live sessions, keyed by id.
///
/// Operations against different sessions proceed fully in parallel; the
/// map lock is held only for lookup, insert, and remove.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    next_seq: AtomicU64,
    gate: Arc<dyn ValidationGate>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl SessionRegistry {
    /// Creates an empty registry whose sessions screen outbound text
    /// through `gate`.
    pub fn new(gate: Arc<dyn ValidationGate>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            gate,
        }
    }

    /// Ids combine a monotonic counter with creation-time milliseconds, so
    /// concurrent creation never collides and ids are not guessable from
    /// the counter alone.
    fn next_id(&self) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("sess-{seq}-{millis:x}")
    }

    /// Starts a session for `spec` and registers it.
    ///
    /// # Errors
    ///
    /// [`Error::SpawnFailed`] or [`Error::InvalidSpec`] from session
    /// startup; nothing is registered on failure.
    pub async fn create_session(&self, spec: &SessionSpec, extra_args: &[String]) -> Result<String> {
        let id = self.next_id();
        let session =
            Session::start(id.clone(), spec.clone(), extra_args, Arc::clone(&self.gate)).await?;
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(session));
        Ok(id)
    }

    /// Sends one input line to a session.
    pub async fn send(&self, id: &str, text: &str) -> Result<()> {
        self.lookup(id).await?.send(text).await
    }

    /// Collects output from a session.
    pub async fn receive(
        &self,
        id: &str,
        wait: Option<Duration>,
        end_marker: Option<&str>,
    ) -> Result<Collected> {
        self.lookup(id).await?.receive(wait, end_marker).await
    }

    /// Sends, settles, and collects in one linearized call.
    pub async fn send_and_receive(
        &self,
        id: &str,
        text: &str,
        wait: Option<Duration>,
        end_marker: Option<&str>,
    ) -> Result<Collected> {
        self.lookup(id)
            .await?
            .send_and_receive(text, wait, end_marker)
            .await
    }

    /// Closes a session and removes it from the registry.
    pub async fn close_session(&self, id: &str, extra_shutdown: &[String]) -> Result<()> {
        let session = self.lookup(id).await?;
        session.close(extra_shutdown).await?;
        self.sessions.write().await.remove(id);
        Ok(())
    }

    /// Ids of sessions currently in the `Active` state.
    pub async fn list_active(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| session.state() == SessionState::Active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Snapshots of every tracked session, ordered by id.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let mut all: Vec<SessionSummary> = self
            .sessions
            .read()
            .await
            .values()
            .map(|session| session.summary())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Best-effort close of every tracked session, for host shutdown.
    /// Individual failures are logged; the sweep never aborts.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, session)| session).collect()
        };
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "closing all sessions");
        for session in drained {
            if let Err(e) = session.close(&[]).await {
                warn!(session = %session.id(), error = %e, "failed to close session during sweep");
            }
        }
    }

    async fn lookup(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{PatternGate, ScreeningLevel};

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(Arc::new(PatternGate::new(
            ScreeningLevel::Disabled,
        ))))
    }

    #[tokio::test]
    async fn unknown_ids_report_not_found_everywhere() {
        let registry = registry();
        assert!(matches!(
            registry.send("sess-999-0", "x").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.receive("sess-999-0", None, None).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            registry.close_session("sess-999-0", &[]).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ids_are_unique_and_counter_based() {
        let registry = registry();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
        assert!(a.starts_with("sess-1-"));
        assert!(b.starts_with("sess-2-"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn created_session_appears_in_list_active() {
        let registry = registry();
        let spec = SessionSpec::new("cat");
        let id = registry.create_session(&spec, &[]).await.expect("create");
        assert!(registry.list_active().await.contains(&id));
        registry.close_session(&id, &[]).await.expect("close");
        assert!(registry.list_active().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_yields_distinct_ids() {
        let registry = registry();
        let spec = SessionSpec::new("cat");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let spec = spec.clone();
            handles.push(tokio::spawn(async move {
                registry.create_session(&spec, &[]).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.expect("join").expect("create"));
        }

        let unique: std::collections::HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 8, "id collision: {ids:?}");
        assert_eq!(registry.list_active().await.len(), 8);

        registry.close_all().await;
        assert!(registry.list_active().await.is_empty());
    }
}
