use crate::domain::{PresenceWatcherConfig, ReconciliationService};
use common::domain::{
    DomainError, DomainResult, PresenceFeed, PresenceProjection, Shipment, ShipmentRepository,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Collaborators a watcher needs, shared by every session
#[derive(Clone)]
pub struct WatcherDeps {
    pub presence_feed: Arc<dyn PresenceFeed>,
    pub shipment_repository: Arc<dyn ShipmentRepository>,
    pub reconciler: Arc<ReconciliationService>,
}

enum SessionExit {
    Cancelled,
    Failed { error: DomainError, snapshots: usize },
}

/// Keep one receiver's shipments in line with the presence projection.
///
/// Subscribes to the presence feed and to the receiver's shipments and runs a
/// reconciliation pass whenever either side emits a new snapshot. A terminal
/// feed error ends the subscription; the watcher then resubscribes after
/// `retry_delay`, giving up after `max_retry_attempts` consecutive failures.
#[instrument(name = "presence_watcher", skip_all, fields(receiver_id = %receiver_id))]
pub async fn run_presence_watcher(
    receiver_id: String,
    deps: WatcherDeps,
    config: PresenceWatcherConfig,
    process_token: CancellationToken,
    shutdown_token: CancellationToken,
) {
    info!(receiver_id = %receiver_id, "starting presence watcher");

    let mut retry_count = 0;

    loop {
        if process_token.is_cancelled() || shutdown_token.is_cancelled() {
            debug!(receiver_id = %receiver_id, "presence watcher cancelled before subscribing");
            break;
        }

        match run_watch_session(&receiver_id, &deps, &process_token, &shutdown_token).await {
            SessionExit::Cancelled => {
                debug!(receiver_id = %receiver_id, "presence watcher stopped cleanly");
                break;
            }
            SessionExit::Failed { error, snapshots } => {
                error!(
                    receiver_id = %receiver_id,
                    error = %error,
                    snapshots = snapshots,
                    "presence subscription ended"
                );

                // A session that delivered data counts as a recovery
                if snapshots > 0 {
                    retry_count = 0;
                }
                retry_count += 1;
                if retry_count >= config.max_retry_attempts {
                    error!(
                        receiver_id = %receiver_id,
                        max_retries = config.max_retry_attempts,
                        "max retry attempts reached, stopping presence watcher"
                    );
                    break;
                }

                warn!(
                    receiver_id = %receiver_id,
                    attempt = retry_count,
                    max_attempts = config.max_retry_attempts,
                    "resubscribing to presence feed"
                );

                tokio::select! {
                    _ = process_token.cancelled() => break,
                    _ = shutdown_token.cancelled() => break,
                    _ = tokio::time::sleep(config.retry_delay()) => {}
                }
            }
        }
    }

    info!(receiver_id = %receiver_id, "presence watcher stopped");
}

async fn run_watch_session(
    receiver_id: &str,
    deps: &WatcherDeps,
    process_token: &CancellationToken,
    shutdown_token: &CancellationToken,
) -> SessionExit {
    let mut snapshots = 0;

    let subscriptions = deps.presence_feed.subscribe_presence().and_then(|presence| {
        deps.shipment_repository
            .subscribe_by_receiver(receiver_id)
            .map(|shipments| (presence, shipments))
    });
    let (mut presence_stream, mut shipment_stream) = match subscriptions {
        Ok(streams) => streams,
        Err(error) => return SessionExit::Failed { error, snapshots },
    };

    let mut projection: Option<PresenceProjection> = None;
    let mut shipments: Option<Vec<Shipment>> = None;

    loop {
        tokio::select! {
            _ = process_token.cancelled() => return SessionExit::Cancelled,
            _ = shutdown_token.cancelled() => return SessionExit::Cancelled,
            item = presence_stream.next() => {
                match next_snapshot(item, "presence") {
                    Ok(snapshot) => projection = Some(snapshot),
                    Err(error) => return SessionExit::Failed { error, snapshots },
                }
            }
            item = shipment_stream.next() => {
                match next_snapshot(item, "shipments") {
                    Ok(snapshot) => shipments = Some(snapshot),
                    Err(error) => return SessionExit::Failed { error, snapshots },
                }
            }
        }
        snapshots += 1;

        // Wait until both sides have been seen once
        if let (Some(projection), Some(shipments)) = (&projection, &shipments) {
            deps.reconciler
                .reconcile_shipments(receiver_id, shipments, projection)
                .await;
        }
    }
}

fn next_snapshot<T>(item: Option<DomainResult<T>>, source: &str) -> DomainResult<T> {
    match item {
        Some(result) => result,
        None => Err(DomainError::StoreUnavailable(format!(
            "{} subscription closed",
            source
        ))),
    }
}
