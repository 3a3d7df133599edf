use crate::domain::{CreateShipmentRequest, ShipmentService};
use chrono::Utc;
use common::domain::{
    ActorIdentity, DetectionEntry, DomainError, DomainResult, PresenceFeed, PresenceProjection,
    Role, ScannerControl, ScannerHealth, Shipment, SnapshotStream,
};
use presence_reconciler::SessionOrchestrator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use verification::{VerificationService, VerificationSummary};

/// Services the command surface is built from
pub struct TrackerApiServices {
    pub shipment_service: Arc<ShipmentService>,
    pub verification_service: Arc<VerificationService>,
    pub presence_feed: Arc<dyn PresenceFeed>,
    pub scanner_control: Arc<dyn ScannerControl>,
    /// When set, opening the receiver's shipment list also starts its watch session
    pub session_orchestrator: Option<Arc<SessionOrchestrator>>,
}

/// Commands and subscriptions offered to the presentation layer
pub struct TrackerApi {
    services: TrackerApiServices,
}

impl TrackerApi {
    pub fn new(services: TrackerApiServices) -> Self {
        debug!("initializing tracker API module");
        Self { services }
    }

    pub async fn create_shipment(
        &self,
        actor: &ActorIdentity,
        request: CreateShipmentRequest,
    ) -> DomainResult<Shipment> {
        self.services
            .shipment_service
            .create_shipment(actor, request)
            .await
    }

    pub async fn mark_received(
        &self,
        actor: &ActorIdentity,
        shipment_id: &str,
    ) -> DomainResult<Shipment> {
        self.services
            .shipment_service
            .mark_received(actor, shipment_id)
            .await
    }

    pub async fn delete_shipment(&self, actor: &ActorIdentity, shipment_id: &str) -> DomainResult<()> {
        self.services
            .shipment_service
            .delete_shipment(actor, shipment_id)
            .await
    }

    pub async fn sent_shipments(&self, actor: &ActorIdentity) -> DomainResult<Vec<Shipment>> {
        self.services.shipment_service.list_sent(actor).await
    }

    pub async fn received_shipments(&self, actor: &ActorIdentity) -> DomainResult<Vec<Shipment>> {
        self.services.shipment_service.list_received(actor).await
    }

    /// Run the verification protocol for the calling receiver
    pub async fn verify_now(
        &self,
        actor: &ActorIdentity,
        cancel: &CancellationToken,
    ) -> DomainResult<VerificationSummary> {
        if actor.role == Role::Sender {
            return Err(DomainError::PermissionDenied(format!(
                "role {} may not run verification",
                actor.role
            )));
        }
        self.services
            .verification_service
            .verify_now(&actor.user_id, cancel)
            .await
    }

    /// Live view of the caller's shipments. Also makes sure a background
    /// watch session keeps them reconciled.
    pub async fn subscribe_my_shipments(
        &self,
        actor: &ActorIdentity,
    ) -> DomainResult<SnapshotStream<Vec<Shipment>>> {
        if let Some(orchestrator) = &self.services.session_orchestrator {
            orchestrator.open_session(&actor.user_id).await?;
        }
        self.services.shipment_service.subscribe_received(actor)
    }

    /// Live view of the current-presence projection
    pub fn subscribe_presence(&self) -> DomainResult<SnapshotStream<PresenceProjection>> {
        self.services.presence_feed.subscribe_presence()
    }

    /// Newest detection per device, newest first
    pub async fn latest_detections(&self, limit: usize) -> DomainResult<Vec<DetectionEntry>> {
        self.services.presence_feed.latest_detections(limit).await
    }

    /// Scanner liveness; a scanner that never reported is `Disconnected`
    pub async fn scanner_health(&self) -> DomainResult<ScannerHealth> {
        let state = self.services.scanner_control.scanner_state().await?;
        Ok(state
            .map(|state| state.health(Utc::now()))
            .unwrap_or(ScannerHealth::Disconnected))
    }

    pub fn is_verification_in_progress(&self) -> bool {
        self.services.verification_service.is_in_progress()
    }
}
