use crate::domain::result::{DomainError, DomainResult};
use crate::domain::SnapshotStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Delivery status of a shipment.
///
/// `Sent` is set at creation; `Present`/`Missing` are owned by reconciliation and
/// flip freely; `Received` is terminal and only reachable through an explicit
/// receiver command. `Irrelevant` marks a beacon seen by a receiver it does not
/// belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShipmentStatus {
    Sent,
    Present,
    Missing,
    Irrelevant,
    Received,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Present => "present",
            Self::Missing => "missing",
            Self::Irrelevant => "irrelevant",
            Self::Received => "received",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Received)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sent" => Ok(Self::Sent),
            "present" => Ok(Self::Present),
            "missing" => Ok(Self::Missing),
            "irrelevant" => Ok(Self::Irrelevant),
            "received" => Ok(Self::Received),
            other => Err(DomainError::ValidationError(format!(
                "unknown shipment status '{}'",
                other
            ))),
        }
    }
}

/// Shipment entity: one package with one beacon, from one sender to one receiver
#[derive(Debug, Clone, PartialEq)]
pub struct Shipment {
    pub shipment_id: String,
    pub product_name: String,
    pub product_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub device_id: String,
    pub notes: String,
    pub status: ShipmentStatus,
    pub shipment_date: DateTime<Utc>,
    pub received_date: Option<DateTime<Utc>>,
    pub created_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
}

impl Shipment {
    pub fn is_owned_by(&self, receiver_id: &str) -> bool {
        self.receiver_id == receiver_id
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Repository input for creating a shipment. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateShipmentRepoInput {
    pub product_name: String,
    pub product_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub device_id: String,
    pub notes: String,
    pub status: ShipmentStatus,
    pub shipment_date: DateTime<Utc>,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateShipmentRepoInput {
    pub shipment_id: String,
    pub status: Option<ShipmentStatus>,
    pub received_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub receiver_name: Option<String>,
}

impl UpdateShipmentRepoInput {
    pub fn status(shipment_id: impl Into<String>, status: ShipmentStatus) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Outcome of a guarded status write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    /// The new status was stored
    Written,
    /// The record already held the target status; nothing was written
    Unchanged,
    /// The record is terminal; nothing was written
    Terminal,
}

/// Shipment registry: CRUD over shipment records keyed by id.
/// Every write stamps `updated_date`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    /// Create a shipment and return it with its store-assigned id
    async fn create_shipment(&self, input: CreateShipmentRepoInput) -> DomainResult<Shipment>;

    /// Get a shipment by id
    async fn get_shipment(&self, shipment_id: &str) -> DomainResult<Option<Shipment>>;

    /// Merge the given fields into the stored record
    async fn update_shipment(&self, input: UpdateShipmentRepoInput) -> DomainResult<()>;

    /// Set the status unless the stored record is terminal or already holds
    /// `status`. The check and the write happen atomically in the store, so a
    /// concurrent receive is never overwritten.
    async fn update_status_unless_terminal(
        &self,
        shipment_id: &str,
        status: ShipmentStatus,
    ) -> DomainResult<StatusWrite>;

    /// Remove a shipment record
    async fn delete_shipment(&self, shipment_id: &str) -> DomainResult<()>;

    /// All shipments addressed to a receiver
    async fn list_by_receiver(&self, receiver_id: &str) -> DomainResult<Vec<Shipment>>;

    /// All shipments created by a sender, newest `shipment_date` first
    async fn list_by_sender(&self, sender_id: &str) -> DomainResult<Vec<Shipment>>;

    /// Push-driven view of a receiver's shipments
    fn subscribe_by_receiver(&self, receiver_id: &str)
        -> DomainResult<SnapshotStream<Vec<Shipment>>>;
}
