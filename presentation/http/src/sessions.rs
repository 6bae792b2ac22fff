//! Research session registry
//!
//! Process-wide map of session id to session handle. Session metadata is
//! guarded so status reads observe a consistent snapshot; entries are
//! evicted after completion plus a retention window, or on cancellation.

use chrono::{DateTime, Utc};
use kgforge_core::types::ResearchState;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Session-level status (the in-flight step lives on the state)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Complete,
    Error,
    Cancelled,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Complete => "complete",
            SessionStatus::Error => "error",
            SessionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Mutable session metadata, written by the background task and the cancel
/// handler
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub status: SessionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_time_ms: u64,
    pub error: Option<String>,
}

/// One research session
pub struct ResearchSession {
    pub id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub state: Arc<RwLock<ResearchState>>,
    pub meta: RwLock<SessionMeta>,
    pub task: Mutex<Option<JoinHandle<()>>>,
}

impl ResearchSession {
    pub fn new(query: impl Into<String>, max_iterations: u32, namespace: &str) -> Arc<Self> {
        let query = query.into();
        Arc::new(Self {
            id: new_session_id(),
            query: query.clone(),
            created_at: Utc::now(),
            state: Arc::new(RwLock::new(ResearchState::new(query, max_iterations, namespace))),
            meta: RwLock::new(SessionMeta {
                status: SessionStatus::Pending,
                completed_at: None,
                total_time_ms: 0,
                error: None,
            }),
            task: Mutex::new(None),
        })
    }

    /// Mark complete with timing
    pub async fn mark_complete(&self) {
        let now = Utc::now();
        let mut meta = self.meta.write().await;
        // A cancelled session stays cancelled
        if meta.status == SessionStatus::Cancelled {
            return;
        }
        meta.status = SessionStatus::Complete;
        meta.completed_at = Some(now);
        meta.total_time_ms = (now - self.created_at).num_milliseconds().max(0) as u64;
    }

    /// Mark failed with the error recorded
    pub async fn mark_error(&self, error: impl Into<String>) {
        let mut meta = self.meta.write().await;
        if meta.status == SessionStatus::Cancelled {
            return;
        }
        meta.status = SessionStatus::Error;
        meta.completed_at = Some(Utc::now());
        meta.error = Some(error.into());
    }

    /// Cancel: abort the background task and mark the session. Terminates
    /// promptly since the task is aborted rather than joined.
    pub async fn cancel(&self, reason: Option<&str>) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        let mut meta = self.meta.write().await;
        meta.status = SessionStatus::Cancelled;
        meta.completed_at = Some(Utc::now());
        meta.error = Some(match reason {
            Some(reason) => format!("Cancelled by user: {}", reason),
            None => "Cancelled by user".to_string(),
        });
        info!(session_id = %self.id, "research_session_cancelled");
    }
}

/// Generate a `research_<hex12>` session id
pub fn new_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("research_{}", &hex[..12])
}

/// Registry of active sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ResearchSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<ResearchSession>) {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ResearchSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<ResearchSession>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Evict terminal sessions older than the retention window
    pub async fn evict_expired(&self, retention: Duration) {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let mut keep = HashMap::new();
        for (id, session) in sessions.drain() {
            let meta = session.meta.read().await;
            let terminal = meta.status != SessionStatus::Pending;
            let expired = terminal && meta.completed_at.map(|at| at < cutoff).unwrap_or(false);
            drop(meta);
            if !expired {
                keep.insert(id, session);
            }
        }
        let evicted = before - keep.len();
        *sessions = keep;
        if evicted > 0 {
            debug!(evicted, "research_sessions_evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id();
        assert!(id.starts_with("research_"));
        assert_eq!(id.len(), "research_".len() + 12);
        assert!(id["research_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_registry_insert_get_remove() {
        let registry = SessionRegistry::new();
        let session = ResearchSession::new("q", 3, "default");
        let id = session.id.clone();

        registry.insert(session).await;
        assert!(registry.get(&id).await.is_some());
        assert_eq!(registry.len().await, 1);

        registry.remove(&id).await;
        assert!(registry.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let session = ResearchSession::new("q", 3, "default");
        session.cancel(Some("user request")).await;
        // A later completion must not overwrite the cancellation
        session.mark_complete().await;
        let meta = session.meta.read().await;
        assert_eq!(meta.status, SessionStatus::Cancelled);
        assert!(meta.error.as_deref().unwrap().contains("user request"));
    }

    #[tokio::test]
    async fn test_mark_complete_records_timing() {
        let session = ResearchSession::new("q", 3, "default");
        session.mark_complete().await;
        let meta = session.meta.read().await;
        assert_eq!(meta.status, SessionStatus::Complete);
        assert!(meta.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_eviction_keeps_pending_sessions() {
        let registry = SessionRegistry::new();
        let pending = ResearchSession::new("q", 3, "default");
        let done = ResearchSession::new("q", 3, "default");
        done.mark_complete().await;

        registry.insert(pending.clone()).await;
        registry.insert(done.clone()).await;

        // Zero retention evicts everything terminal immediately
        registry.evict_expired(Duration::from_secs(0)).await;
        assert!(registry.get(&pending.id).await.is_some());
        assert!(registry.get(&done.id).await.is_none());
    }
}
