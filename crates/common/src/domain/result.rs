use crate::domain::ShipmentStatus;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Permission denied: {0}. Check the store access policy for this path and role")]
    PermissionDenied(String),

    #[error("A verification is already in progress for scanner {0}")]
    AlreadyInProgress(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ShipmentStatus,
        to: ShipmentStatus,
    },

    #[error("Verification failed: {0}")]
    VerificationFailed(#[source] Box<DomainError>),

    #[error("Shipment not found: {0}")]
    ShipmentNotFound(String),

    #[error("Beacon {device_id} is already assigned to active shipment {shipment_id}")]
    BeaconInUse {
        device_id: String,
        shipment_id: String,
    },

    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Wrap a failure that happened inside the verification protocol.
    pub fn verification_failed(cause: DomainError) -> Self {
        match cause {
            // Never nest wrappers
            DomainError::VerificationFailed(_) => cause,
            other => DomainError::VerificationFailed(Box::new(other)),
        }
    }

    /// The innermost cause, looking through `VerificationFailed`.
    pub fn root_cause(&self) -> &DomainError {
        match self {
            DomainError::VerificationFailed(cause) => cause.root_cause(),
            other => other,
        }
    }

    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            DomainError::StoreUnavailable(_) | DomainError::AlreadyInProgress(_)
        )
    }
}
