use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::domain::DomainResult;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running presence watcher for one receiver
pub struct WatchSessionHandle {
    pub join_handle: JoinHandle<()>,
    pub cancellation_token: CancellationToken,
    pub receiver_id: String,
    pub started_at: DateTime<Utc>,
}

impl WatchSessionHandle {
    pub fn new(
        join_handle: JoinHandle<()>,
        cancellation_token: CancellationToken,
        receiver_id: String,
    ) -> Self {
        Self {
            join_handle,
            cancellation_token,
            receiver_id,
            started_at: Utc::now(),
        }
    }

    /// Cancel the watcher
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// True once the watcher task has returned, e.g. after giving up on retries
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

/// Trait for storing watch session handles, keyed by receiver id
#[async_trait]
pub trait WatchSessionStore: Send + Sync {
    /// Insert or replace a session handle
    async fn upsert(&self, receiver_id: String, handle: WatchSessionHandle) -> DomainResult<()>;

    /// Remove a session handle, returning it if it existed
    async fn remove(&self, receiver_id: &str) -> DomainResult<Option<WatchSessionHandle>>;

    /// List receivers with a stored session
    async fn list_receiver_ids(&self) -> DomainResult<Vec<String>>;

    /// Whether a session is stored and its watcher is still running
    async fn is_running(&self, receiver_id: &str) -> DomainResult<bool>;

    /// Number of stored sessions
    async fn count(&self) -> DomainResult<usize>;
}
