use chrono::Utc;
use common::domain::{
    ActorIdentity, CreateShipmentRepoInput, DomainError, DomainResult, Role, Shipment,
    ShipmentRepository, ShipmentStatus, SnapshotStream, UpdateShipmentRepoInput,
};
use garde::Validate;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Service request for registering a new shipment
#[derive(Debug, Clone, Validate)]
pub struct CreateShipmentRequest {
    #[garde(length(min = 1))]
    pub product_name: String,
    #[garde(length(min = 1))]
    pub product_id: String,
    #[garde(email)]
    pub receiver_id: String,
    #[garde(length(min = 1))]
    pub receiver_name: String,
    #[garde(length(min = 1))]
    pub device_id: String,
    #[garde(skip)]
    pub notes: String,
}

/// Domain service for shipment commands and queries
pub struct ShipmentService {
    shipment_repository: Arc<dyn ShipmentRepository>,
}

impl ShipmentService {
    pub fn new(shipment_repository: Arc<dyn ShipmentRepository>) -> Self {
        Self {
            shipment_repository,
        }
    }

    /// Register a shipment from `actor` with status `sent`.
    ///
    /// A beacon can only be on one active shipment per receiver at a time.
    #[instrument(skip(self, actor, request), fields(sender_id = %actor.user_id, receiver_id = %request.receiver_id, device_id = %request.device_id))]
    pub async fn create_shipment(
        &self,
        actor: &ActorIdentity,
        request: CreateShipmentRequest,
    ) -> DomainResult<Shipment> {
        common::garde::validate_struct(&request)?;
        require_role(actor, &[Role::Sender, Role::Admin], "create shipments")?;

        let active = self
            .shipment_repository
            .list_by_receiver(&request.receiver_id)
            .await?;
        if let Some(existing) = active
            .iter()
            .find(|s| s.device_id == request.device_id && s.is_active())
        {
            return Err(DomainError::BeaconInUse {
                device_id: request.device_id,
                shipment_id: existing.shipment_id.clone(),
            });
        }

        let repo_input = CreateShipmentRepoInput {
            product_name: request.product_name,
            product_id: request.product_id,
            sender_id: actor.user_id.clone(),
            sender_name: actor.name().to_string(),
            receiver_id: request.receiver_id,
            receiver_name: request.receiver_name,
            device_id: request.device_id,
            notes: request.notes,
            status: ShipmentStatus::Sent,
            shipment_date: Utc::now(),
        };

        let shipment = self.shipment_repository.create_shipment(repo_input).await?;

        info!(shipment_id = %shipment.shipment_id, "shipment created");
        Ok(shipment)
    }

    /// Confirm physical receipt. Only a `present` shipment can be received,
    /// and only by its receiver or an admin.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id, shipment_id = %shipment_id))]
    pub async fn mark_received(
        &self,
        actor: &ActorIdentity,
        shipment_id: &str,
    ) -> DomainResult<Shipment> {
        let shipment = self.get_shipment(shipment_id).await?;

        if !actor.is_admin() && !shipment.is_owned_by(&actor.user_id) {
            return Err(DomainError::PermissionDenied(format!(
                "{} cannot receive shipment {} addressed to {}",
                actor.user_id, shipment_id, shipment.receiver_id
            )));
        }

        if shipment.status != ShipmentStatus::Present {
            return Err(DomainError::InvalidTransition {
                from: shipment.status,
                to: ShipmentStatus::Received,
            });
        }

        let received_date = Utc::now();
        self.shipment_repository
            .update_shipment(UpdateShipmentRepoInput {
                shipment_id: shipment_id.to_string(),
                status: Some(ShipmentStatus::Received),
                received_date: Some(received_date),
                ..Default::default()
            })
            .await?;

        info!(shipment_id = %shipment_id, "shipment marked received");
        Ok(Shipment {
            status: ShipmentStatus::Received,
            received_date: Some(received_date),
            updated_date: Some(received_date),
            ..shipment
        })
    }

    /// Get a shipment by id
    pub async fn get_shipment(&self, shipment_id: &str) -> DomainResult<Shipment> {
        debug!(shipment_id = %shipment_id, "getting shipment");

        if shipment_id.is_empty() {
            return Err(DomainError::ValidationError(
                "Shipment ID cannot be empty".to_string(),
            ));
        }

        self.shipment_repository
            .get_shipment(shipment_id)
            .await?
            .ok_or_else(|| DomainError::ShipmentNotFound(shipment_id.to_string()))
    }

    /// Shipments addressed to `actor`
    pub async fn list_received(&self, actor: &ActorIdentity) -> DomainResult<Vec<Shipment>> {
        let shipments = self
            .shipment_repository
            .list_by_receiver(&actor.user_id)
            .await?;
        debug!(count = shipments.len(), "listed shipments for receiver");
        Ok(shipments)
    }

    /// Shipments sent by `actor`, newest first
    pub async fn list_sent(&self, actor: &ActorIdentity) -> DomainResult<Vec<Shipment>> {
        let shipments = self
            .shipment_repository
            .list_by_sender(&actor.user_id)
            .await?;
        debug!(count = shipments.len(), "listed shipments for sender");
        Ok(shipments)
    }

    /// Remove a shipment. Only its sender or an admin may do this.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id, shipment_id = %shipment_id))]
    pub async fn delete_shipment(&self, actor: &ActorIdentity, shipment_id: &str) -> DomainResult<()> {
        let shipment = self.get_shipment(shipment_id).await?;

        if !actor.is_admin() && shipment.sender_id != actor.user_id {
            return Err(DomainError::PermissionDenied(format!(
                "{} cannot delete shipment {} sent by {}",
                actor.user_id, shipment_id, shipment.sender_id
            )));
        }

        self.shipment_repository.delete_shipment(shipment_id).await?;
        info!(shipment_id = %shipment_id, "shipment deleted");
        Ok(())
    }

    /// Live view of the shipments addressed to `actor`
    pub fn subscribe_received(
        &self,
        actor: &ActorIdentity,
    ) -> DomainResult<SnapshotStream<Vec<Shipment>>> {
        self.shipment_repository.subscribe_by_receiver(&actor.user_id)
    }
}

fn require_role(actor: &ActorIdentity, allowed: &[Role], action: &str) -> DomainResult<()> {
    if allowed.contains(&actor.role) {
        return Ok(());
    }
    Err(DomainError::PermissionDenied(format!(
        "role {} may not {}",
        actor.role, action
    )))
}
