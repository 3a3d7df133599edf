use common::domain::{PresenceProjection, Shipment, ShipmentStatus};

/// Outcome of applying the presence rule to one stored shipment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Shipment is terminal; the rule never touches it
    Terminal,
    /// Stored status already matches the rule
    Unchanged(ShipmentStatus),
    /// Stored status must be rewritten
    Change {
        from: ShipmentStatus,
        to: ShipmentStatus,
    },
}

/// Status `shipment` should hold according to `projection`, as observed by
/// receiver `observer_id`. Returns `None` for terminal shipments.
///
/// Depends only on ownership, the assigned device, and that device's entry in
/// the projection, so re-applying it to the same inputs is a no-op.
pub fn target_status(
    shipment: &Shipment,
    observer_id: &str,
    projection: &PresenceProjection,
) -> Option<ShipmentStatus> {
    if shipment.status.is_terminal() {
        return None;
    }

    if !projection.is_present(&shipment.device_id) {
        return Some(ShipmentStatus::Missing);
    }

    if shipment.is_owned_by(observer_id) {
        Some(ShipmentStatus::Present)
    } else {
        Some(ShipmentStatus::Irrelevant)
    }
}

pub fn plan_transition(
    shipment: &Shipment,
    observer_id: &str,
    projection: &PresenceProjection,
) -> Transition {
    match target_status(shipment, observer_id, projection) {
        None => Transition::Terminal,
        Some(to) if to == shipment.status => Transition::Unchanged(to),
        Some(to) => Transition::Change {
            from: shipment.status,
            to,
        },
    }
}
