use crate::domain::{
    run_presence_watcher, PresenceWatcherConfig, WatchSessionHandle, WatchSessionStore,
    WatcherDeps,
};
use common::domain::DomainResult;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Starts and stops the per-receiver presence watchers
pub struct SessionOrchestrator {
    deps: WatcherDeps,
    session_store: Arc<dyn WatchSessionStore>,
    config: PresenceWatcherConfig,
    shutdown_token: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(
        deps: WatcherDeps,
        session_store: Arc<dyn WatchSessionStore>,
        config: PresenceWatcherConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            deps,
            session_store,
            config,
            shutdown_token,
        }
    }

    /// Open a session for each receiver, continuing past failures
    #[instrument(skip(self, receiver_ids))]
    pub async fn open_sessions(&self, receiver_ids: &[String]) -> DomainResult<()> {
        debug!("opening {} watch sessions", receiver_ids.len());

        for receiver_id in receiver_ids {
            if let Err(e) = self.open_session(receiver_id).await {
                error!(receiver_id = %receiver_id, error = %e, "failed to open watch session");
            }
        }

        Ok(())
    }

    /// Start watching `receiver_id`. Returns `false` if a live session already exists.
    /// A session whose watcher gave up is replaced.
    #[instrument(skip(self), fields(receiver_id = %receiver_id))]
    pub async fn open_session(&self, receiver_id: &str) -> DomainResult<bool> {
        if self.session_store.is_running(receiver_id).await? {
            debug!(receiver_id = %receiver_id, "watch session already running, skipping");
            return Ok(false);
        }

        if self.session_store.remove(receiver_id).await?.is_some() {
            warn!(receiver_id = %receiver_id, "replacing finished watch session");
        }

        let process_token = CancellationToken::new();
        let join_handle = tokio::spawn(run_presence_watcher(
            receiver_id.to_string(),
            self.deps.clone(),
            self.config.clone(),
            process_token.clone(),
            self.shutdown_token.clone(),
        ));

        let handle = WatchSessionHandle::new(join_handle, process_token, receiver_id.to_string());
        self.session_store
            .upsert(receiver_id.to_string(), handle)
            .await?;

        info!(receiver_id = %receiver_id, "opened watch session");
        Ok(true)
    }

    /// Stop watching `receiver_id`
    #[instrument(skip(self), fields(receiver_id = %receiver_id))]
    pub async fn close_session(&self, receiver_id: &str) -> DomainResult<()> {
        match self.session_store.remove(receiver_id).await? {
            Some(handle) => {
                info!(receiver_id = %receiver_id, "closing watch session");
                handle.cancel();

                match tokio::time::timeout(self.config.stop_timeout(), handle.join_handle).await {
                    Ok(Ok(())) => {
                        debug!(receiver_id = %receiver_id, "watch session stopped gracefully");
                    }
                    Ok(Err(e)) => {
                        error!(receiver_id = %receiver_id, "watch session panicked: {:?}", e);
                    }
                    Err(_) => {
                        warn!(receiver_id = %receiver_id, "watch session did not stop within timeout");
                    }
                }

                Ok(())
            }
            None => {
                warn!(receiver_id = %receiver_id, "no watch session found");
                Ok(())
            }
        }
    }

    /// Receivers with a stored session
    pub async fn receiver_ids(&self) -> DomainResult<Vec<String>> {
        self.session_store.list_receiver_ids().await
    }

    /// Stop every watch session
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> DomainResult<()> {
        let receiver_ids = self.session_store.list_receiver_ids().await?;
        info!("stopping {} watch sessions", receiver_ids.len());

        for receiver_id in receiver_ids {
            if let Err(e) = self.close_session(&receiver_id).await {
                error!(receiver_id = %receiver_id, error = %e, "failed to close watch session");
            }
        }

        debug!("session orchestrator shutdown complete");
        Ok(())
    }
}
