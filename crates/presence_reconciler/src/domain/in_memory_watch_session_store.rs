use crate::domain::{WatchSessionHandle, WatchSessionStore};
use async_trait::async_trait;
use common::domain::DomainResult;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory implementation of `WatchSessionStore` using a `HashMap`
pub struct InMemoryWatchSessionStore {
    sessions: RwLock<HashMap<String, WatchSessionHandle>>,
}

impl InMemoryWatchSessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryWatchSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WatchSessionStore for InMemoryWatchSessionStore {
    async fn upsert(&self, receiver_id: String, handle: WatchSessionHandle) -> DomainResult<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.insert(receiver_id, handle) {
            previous.cancel();
        }
        Ok(())
    }

    async fn remove(&self, receiver_id: &str) -> DomainResult<Option<WatchSessionHandle>> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(receiver_id))
    }

    async fn list_receiver_ids(&self) -> DomainResult<Vec<String>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.keys().cloned().collect())
    }

    async fn is_running(&self, receiver_id: &str) -> DomainResult<bool> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(receiver_id)
            .is_some_and(|handle| !handle.is_finished()))
    }

    async fn count(&self) -> DomainResult<usize> {
        let sessions = self.sessions.read().await;
        Ok(sessions.len())
    }
}
