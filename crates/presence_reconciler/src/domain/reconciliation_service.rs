use crate::domain::{plan_transition, Transition};
use common::domain::{
    DomainResult, PresenceProjection, Shipment, ShipmentRepository, ShipmentStatus, StatusWrite,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One status rewrite performed by a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub shipment_id: String,
    pub device_id: String,
    pub from: ShipmentStatus,
    pub to: ShipmentStatus,
}

/// A write that failed; the stored status was left as it was
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationFailure {
    pub shipment_id: String,
    pub error: String,
}

/// What a single pass saw and did for one receiver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub receiver_id: String,
    /// Owned, non-terminal shipments the rule was applied to
    pub evaluated: usize,
    pub changes: Vec<StatusChange>,
    pub failures: Vec<ReconciliationFailure>,
    /// Owned shipments left alone because they are `received`
    pub skipped_terminal: usize,
    /// Shipments of other receivers in the input; evaluated for logging only
    pub cross_tenant: usize,
    /// Owned shipments holding `present` after the pass
    pub present: usize,
    /// Owned shipments holding `missing` after the pass
    pub missing: usize,
    pub received: usize,
}

impl ReconciliationReport {
    fn new(receiver_id: &str) -> Self {
        Self {
            receiver_id: receiver_id.to_string(),
            ..Default::default()
        }
    }

    fn tally(&mut self, status: ShipmentStatus) {
        match status {
            ShipmentStatus::Present => self.present += 1,
            ShipmentStatus::Missing => self.missing += 1,
            ShipmentStatus::Received => self.received += 1,
            ShipmentStatus::Sent | ShipmentStatus::Irrelevant => {}
        }
    }

    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Applies the presence rule to a receiver's shipments and persists only the
/// statuses that differ.
///
/// Only shipments owned by the observing receiver are written. The same
/// service backs the passive watchers and explicit verification, so any
/// interleaving of the two converges on the same stored state.
pub struct ReconciliationService {
    shipment_repository: Arc<dyn ShipmentRepository>,
}

impl ReconciliationService {
    pub fn new(shipment_repository: Arc<dyn ShipmentRepository>) -> Self {
        Self {
            shipment_repository,
        }
    }

    /// Load the receiver's shipments and reconcile them against `projection`
    #[instrument(skip(self, projection), fields(receiver_id = %receiver_id))]
    pub async fn reconcile_receiver(
        &self,
        receiver_id: &str,
        projection: &PresenceProjection,
    ) -> DomainResult<ReconciliationReport> {
        let shipments = self
            .shipment_repository
            .list_by_receiver(receiver_id)
            .await?;
        Ok(self
            .reconcile_shipments(receiver_id, &shipments, projection)
            .await)
    }

    /// Reconcile an already loaded set of shipments.
    ///
    /// Never fails as a whole: a failed write is recorded in the report and the
    /// remaining shipments are still processed.
    #[instrument(skip(self, shipments, projection), fields(receiver_id = %receiver_id, shipments = shipments.len()))]
    pub async fn reconcile_shipments(
        &self,
        receiver_id: &str,
        shipments: &[Shipment],
        projection: &PresenceProjection,
    ) -> ReconciliationReport {
        let mut report = ReconciliationReport::new(receiver_id);

        for shipment in shipments {
            if !shipment.is_owned_by(receiver_id) {
                report.cross_tenant += 1;
                debug!(
                    shipment_id = %shipment.shipment_id,
                    owner = %shipment.receiver_id,
                    transition = ?plan_transition(shipment, receiver_id, projection),
                    "not persisting status for shipment of another receiver"
                );
                continue;
            }

            match plan_transition(shipment, receiver_id, projection) {
                Transition::Terminal => {
                    report.skipped_terminal += 1;
                    report.tally(shipment.status);
                }
                Transition::Unchanged(status) => {
                    report.evaluated += 1;
                    report.tally(status);
                }
                Transition::Change { from, to } => {
                    report.evaluated += 1;
                    match self.apply_change(shipment, to).await {
                        Ok(StatusWrite::Written) => {
                            debug!(
                                shipment_id = %shipment.shipment_id,
                                device_id = %shipment.device_id,
                                from = %from,
                                to = %to,
                                "shipment status reconciled"
                            );
                            report.tally(to);
                            report.changes.push(StatusChange {
                                shipment_id: shipment.shipment_id.clone(),
                                device_id: shipment.device_id.clone(),
                                from,
                                to,
                            });
                        }
                        Ok(StatusWrite::Unchanged) => {
                            debug!(
                                shipment_id = %shipment.shipment_id,
                                status = %to,
                                "stored status already current"
                            );
                            report.tally(to);
                        }
                        Ok(StatusWrite::Terminal) => {
                            debug!(
                                shipment_id = %shipment.shipment_id,
                                "shipment was received concurrently, leaving it alone"
                            );
                            report.skipped_terminal += 1;
                            report.tally(ShipmentStatus::Received);
                        }
                        Err(e) => {
                            warn!(
                                shipment_id = %shipment.shipment_id,
                                error = %e,
                                "failed to persist reconciled status"
                            );
                            report.tally(from);
                            report.failures.push(ReconciliationFailure {
                                shipment_id: shipment.shipment_id.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if report.changed() || !report.failures.is_empty() {
            info!(
                receiver_id = %receiver_id,
                changed = report.changes.len(),
                failed = report.failures.len(),
                present = report.present,
                missing = report.missing,
                "reconciliation pass complete"
            );
        }

        report
    }

    /// Write `to` against the stored record rather than the snapshot the plan
    /// was made from: a receive or an equal write that landed since is kept.
    async fn apply_change(
        &self,
        shipment: &Shipment,
        to: ShipmentStatus,
    ) -> DomainResult<StatusWrite> {
        self.shipment_repository
            .update_status_unless_terminal(&shipment.shipment_id, to)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::{DomainError, MockShipmentRepository, PresenceEntry};

    fn shipment(id: &str, receiver_id: &str, device_id: &str, status: ShipmentStatus) -> Shipment {
        Shipment {
            shipment_id: id.to_string(),
            product_name: "Medical Supplies".to_string(),
            product_id: format!("PKG-{}", id),
            sender_id: "sam@example.com".to_string(),
            sender_name: "Sam".to_string(),
            receiver_id: receiver_id.to_string(),
            receiver_name: "Jane".to_string(),
            device_id: device_id.to_string(),
            notes: String::new(),
            status,
            shipment_date: Utc::now(),
            received_date: None,
            created_date: None,
            updated_date: None,
        }
    }

    fn projection(present: &[&str]) -> PresenceProjection {
        PresenceProjection::from_entries(present.iter().map(|device_id| PresenceEntry {
            device_id: device_id.to_string(),
            present: true,
            last_seen: None,
            rssi: Some(-60),
        }))
    }

    #[tokio::test]
    async fn test_writes_only_deltas() {
        let shipments = vec![
            shipment("s1", "jane@example.com", "D1", ShipmentStatus::Sent),
            shipment("s2", "jane@example.com", "D2", ShipmentStatus::Missing),
        ];
        let mut mock = MockShipmentRepository::new();
        mock.expect_update_status_unless_terminal()
            .withf(|id, status| id == "s1" && *status == ShipmentStatus::Missing)
            .times(1)
            .returning(|_, _| Ok(StatusWrite::Written));

        let service = ReconciliationService::new(Arc::new(mock));
        let report = service
            .reconcile_shipments("jane@example.com", &shipments, &projection(&[]))
            .await;

        assert_eq!(report.evaluated, 2);
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.missing, 2);
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let shipments = vec![shipment(
            "s1",
            "jane@example.com",
            "D1",
            ShipmentStatus::Present,
        )];
        let mut mock = MockShipmentRepository::new();
        mock.expect_update_status_unless_terminal().never();

        let service = ReconciliationService::new(Arc::new(mock));
        let report = service
            .reconcile_shipments("jane@example.com", &shipments, &projection(&["D1"]))
            .await;

        assert!(!report.changed());
        assert_eq!(report.present, 1);
    }

    #[tokio::test]
    async fn test_received_shipments_are_never_written() {
        let shipments = vec![shipment(
            "s1",
            "jane@example.com",
            "D1",
            ShipmentStatus::Received,
        )];
        let mut mock = MockShipmentRepository::new();
        mock.expect_update_status_unless_terminal().never();

        let service = ReconciliationService::new(Arc::new(mock));
        let report = service
            .reconcile_shipments("jane@example.com", &shipments, &projection(&[]))
            .await;

        assert_eq!(report.skipped_terminal, 1);
        assert_eq!(report.received, 1);
        assert_eq!(report.evaluated, 0);
    }

    #[tokio::test]
    async fn test_concurrently_received_shipment_is_left_alone() {
        let stale = shipment("s1", "jane@example.com", "D1", ShipmentStatus::Present);
        let mut mock = MockShipmentRepository::new();
        mock.expect_update_status_unless_terminal()
            .times(1)
            .returning(|_, _| Ok(StatusWrite::Terminal));
        mock.expect_update_shipment().never();

        let service = ReconciliationService::new(Arc::new(mock));
        let report = service
            .reconcile_shipments("jane@example.com", &[stale], &projection(&[]))
            .await;

        assert!(!report.changed());
        assert_eq!(report.skipped_terminal, 1);
        assert_eq!(report.received, 1);
        assert_eq!(report.missing, 0);
    }

    #[tokio::test]
    async fn test_stale_snapshot_of_current_status_records_no_change() {
        let stale = shipment("s1", "jane@example.com", "D1", ShipmentStatus::Present);
        let mut mock = MockShipmentRepository::new();
        mock.expect_update_status_unless_terminal()
            .withf(|_, status| *status == ShipmentStatus::Missing)
            .times(1)
            .returning(|_, _| Ok(StatusWrite::Unchanged));

        let service = ReconciliationService::new(Arc::new(mock));
        let report = service
            .reconcile_shipments("jane@example.com", &[stale], &projection(&[]))
            .await;

        assert!(!report.changed());
        assert!(report.failures.is_empty());
        assert_eq!(report.missing, 1);
        assert_eq!(report.present, 0);
    }

    #[tokio::test]
    async fn test_foreign_shipments_are_not_persisted() {
        let shipments = vec![
            shipment("s1", "jane@example.com", "D1", ShipmentStatus::Sent),
            shipment("s2", "omar@example.com", "D2", ShipmentStatus::Sent),
        ];
        let mut mock = MockShipmentRepository::new();
        mock.expect_update_status_unless_terminal()
            .withf(|id, _| id == "s1")
            .times(1)
            .returning(|_, _| Ok(StatusWrite::Written));

        let service = ReconciliationService::new(Arc::new(mock));
        let report = service
            .reconcile_shipments("jane@example.com", &shipments, &projection(&["D1", "D2"]))
            .await;

        assert_eq!(report.cross_tenant, 1);
        assert_eq!(report.present, 1);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_block_others() {
        let shipments = vec![
            shipment("s1", "jane@example.com", "D1", ShipmentStatus::Sent),
            shipment("s2", "jane@example.com", "D2", ShipmentStatus::Sent),
        ];
        let mut mock = MockShipmentRepository::new();
        mock.expect_update_status_unless_terminal()
            .withf(|id, _| id == "s1")
            .times(1)
            .returning(|_, _| {
                Err(DomainError::PermissionDenied(
                    "write on 'shipments/s1'".to_string(),
                ))
            });
        mock.expect_update_status_unless_terminal()
            .withf(|id, _| id == "s2")
            .times(1)
            .returning(|_, _| Ok(StatusWrite::Written));

        let service = ReconciliationService::new(Arc::new(mock));
        let report = service
            .reconcile_shipments("jane@example.com", &shipments, &projection(&["D1", "D2"]))
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].shipment_id, "s1");
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].shipment_id, "s2");
    }

    #[tokio::test]
    async fn test_reconcile_receiver_propagates_list_failure() {
        let mut mock = MockShipmentRepository::new();
        mock.expect_list_by_receiver()
            .returning(|_| Err(DomainError::StoreUnavailable("offline".to_string())));

        let service = ReconciliationService::new(Arc::new(mock));
        let result = service
            .reconcile_receiver("jane@example.com", &projection(&[]))
            .await;

        assert!(matches!(result, Err(DomainError::StoreUnavailable(_))));
    }
}
