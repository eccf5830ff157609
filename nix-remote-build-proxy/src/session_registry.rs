use nix_remote_build_common::session::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: SessionId,
    pub status: SessionStatus,
    pub worker_addr: Option<(String, u16)>,
}

impl SessionRecord {
    pub fn new(id: SessionId) -> Self {
        SessionRecord {
            id,
            status: SessionStatus::Pending,
            worker_addr: None,
        }
    }
}

/// In-memory map from session id to live session record. The only shared mutable state in
/// the proxy process, so a single multi-reader/single-writer lock is enough discipline;
/// deliberately no iteration is exposed to keep lock scopes small.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: SessionRecord) {
        let mut guard = self.inner.write().await;
        guard.insert(record.id, record);
    }

    pub async fn remove(&self, id: &SessionId) -> Option<SessionRecord> {
        let mut guard = self.inner.write().await;
        guard.remove(id)
    }

    pub async fn count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.len()
    }

    pub async fn set_status(&self, id: &SessionId, status: SessionStatus) {
        let mut guard = self.inner.write().await;
        if let Some(record) = guard.get_mut(id) {
            record.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_count() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.insert(SessionRecord::new(id)).await;
        assert_eq!(registry.count().await, 1);
        let removed = registry.remove(&id).await;
        assert!(removed.is_some());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn remove_unknown_is_noop() {
        let registry = SessionRegistry::new();
        assert!(registry.remove(&SessionId::new()).await.is_none());
    }
}
