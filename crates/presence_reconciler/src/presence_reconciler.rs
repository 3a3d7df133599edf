use crate::domain::{
    InMemoryWatchSessionStore, PresenceWatcherConfig, ReconciliationService, SessionOrchestrator,
    WatcherDeps,
};
use common::domain::{PresenceFeed, ShipmentRepository};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Background reconciliation for a fixed set of receivers, packaged as a
/// runner process
pub struct PresenceReconciler {
    orchestrator: Arc<SessionOrchestrator>,
    receiver_ids: Vec<String>,
}

impl PresenceReconciler {
    pub fn new(
        presence_feed: Arc<dyn PresenceFeed>,
        shipment_repository: Arc<dyn ShipmentRepository>,
        config: PresenceWatcherConfig,
        receiver_ids: Vec<String>,
        shutdown_token: CancellationToken,
    ) -> Self {
        debug!("initializing presence reconciler module");

        let deps = WatcherDeps {
            presence_feed,
            reconciler: Arc::new(ReconciliationService::new(Arc::clone(&shipment_repository))),
            shipment_repository,
        };
        let orchestrator = Arc::new(SessionOrchestrator::new(
            deps,
            Arc::new(InMemoryWatchSessionStore::new()),
            config,
            shutdown_token,
        ));

        Self {
            orchestrator,
            receiver_ids,
        }
    }

    /// The orchestrator, for opening sessions beyond the configured receivers
    pub fn orchestrator(&self) -> Arc<SessionOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// Open the configured sessions, wait for cancellation, then stop them all
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        self.orchestrator.open_sessions(&self.receiver_ids).await?;
        ctx.cancelled().await;
        self.orchestrator.shutdown().await?;
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        Box::new(move |ctx| Box::pin(async move { self.run(ctx).await }))
    }
}
