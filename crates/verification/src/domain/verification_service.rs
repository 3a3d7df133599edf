use crate::domain::{poll_until, ScannerClaim, VerificationConfig};
use chrono::{DateTime, Utc};
use common::domain::{
    DomainError, DomainResult, PresenceFeed, ScannerControl, ScannerStatus, ShipmentRepository,
};
use presence_reconciler::{ReconciliationFailure, ReconciliationService, StatusChange};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Result of one verification run for a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSummary {
    pub receiver_id: String,
    pub scanner_id: String,
    /// Devices the projection reported present when it was read
    pub devices_detected: usize,
    /// Receiver's shipments holding `present` after the pass
    pub present: usize,
    /// Receiver's shipments holding `missing` after the pass
    pub missing: usize,
    pub received: usize,
    /// Whether a fresh detection showed up before the poll ran out
    pub scan_evidence_found: bool,
    pub poll_attempts: u32,
    pub changes: Vec<StatusChange>,
    /// Per-shipment writes that failed; the rest of the pass still ran
    pub failures: Vec<ReconciliationFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Runs the on-demand "verify now" protocol against the shared scanner
pub struct VerificationService {
    scanner_control: Arc<dyn ScannerControl>,
    presence_feed: Arc<dyn PresenceFeed>,
    reconciler: Arc<ReconciliationService>,
    claim: ScannerClaim,
    config: VerificationConfig,
}

impl VerificationService {
    pub fn new(
        scanner_control: Arc<dyn ScannerControl>,
        presence_feed: Arc<dyn PresenceFeed>,
        shipment_repository: Arc<dyn ShipmentRepository>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            claim: ScannerClaim::new(Arc::clone(&scanner_control)),
            scanner_control,
            presence_feed,
            reconciler: Arc::new(ReconciliationService::new(shipment_repository)),
            config,
        }
    }

    /// Whether a verification currently holds the scanner
    pub fn is_in_progress(&self) -> bool {
        self.claim.is_held()
    }

    /// Trigger a scan, wait a bounded time for fresh telemetry, reconcile the
    /// receiver's shipments against the current projection, and reset the
    /// scanner.
    ///
    /// Fails with `AlreadyInProgress` if the scanner is claimed. Any later
    /// failure, cancellation included, comes back as `VerificationFailed`
    /// after the scanner has been reset. Dropping the returned future also
    /// releases the claim and schedules the reset.
    #[instrument(skip(self, cancel), fields(receiver_id = %receiver_id, scanner_id = %self.claim.scanner_id()))]
    pub async fn verify_now(
        &self,
        receiver_id: &str,
        cancel: &CancellationToken,
    ) -> DomainResult<VerificationSummary> {
        let lease = self.claim.try_acquire(receiver_id)?;

        let outcome = self.run_protocol(receiver_id, cancel).await;
        let reset = lease.release().await;

        match (outcome, reset) {
            (Ok(summary), Ok(())) => {
                info!(
                    receiver_id = %receiver_id,
                    devices_detected = summary.devices_detected,
                    present = summary.present,
                    missing = summary.missing,
                    scan_evidence_found = summary.scan_evidence_found,
                    poll_attempts = summary.poll_attempts,
                    "verification complete"
                );
                Ok(summary)
            }
            (Ok(_), Err(e)) => {
                warn!(receiver_id = %receiver_id, error = %e, "scanner reset failed after verification");
                Err(DomainError::verification_failed(e))
            }
            (Err(e), reset) => {
                if let Err(reset_err) = reset {
                    warn!(receiver_id = %receiver_id, error = %reset_err, "scanner reset failed after verification error");
                }
                warn!(receiver_id = %receiver_id, error = %e, "verification failed");
                Err(DomainError::verification_failed(e))
            }
        }
    }

    async fn run_protocol(
        &self,
        receiver_id: &str,
        cancel: &CancellationToken,
    ) -> DomainResult<VerificationSummary> {
        ensure_not_cancelled(cancel)?;
        let window = self.config.freshness_window()?;
        let started_at = Utc::now();

        self.scanner_control
            .request_scan(receiver_id, started_at)
            .await?;
        self.scanner_control
            .set_status(ScannerStatus::Scanning, started_at)
            .await?;
        debug!(receiver_id = %receiver_id, "scan requested");

        let feed = Arc::clone(&self.presence_feed);
        let poll = poll_until(
            self.config.poll_interval(),
            self.config.max_poll_attempts,
            cancel,
            |attempt| {
                let feed = Arc::clone(&feed);
                async move {
                    let now = Utc::now();
                    let detections = feed.detections_since(now - window).await?;
                    let fresh = detections
                        .iter()
                        .filter(|entry| entry.is_fresh(now, window))
                        .count();
                    debug!(attempt = attempt, fresh = fresh, "checked detection log");
                    Ok(fresh > 0)
                }
            },
        )
        .await?;

        if !poll.is_satisfied() {
            warn!(
                receiver_id = %receiver_id,
                attempts = poll.attempts(),
                "no fresh detections before timeout, reconciling with current projection"
            );
        }

        ensure_not_cancelled(cancel)?;
        let projection = self.presence_feed.current_presence().await?;
        let report = self
            .reconciler
            .reconcile_receiver(receiver_id, &projection)
            .await?;

        Ok(VerificationSummary {
            receiver_id: receiver_id.to_string(),
            scanner_id: self.claim.scanner_id(),
            devices_detected: projection.detected_count(),
            present: report.present,
            missing: report.missing,
            received: report.received,
            scan_evidence_found: poll.is_satisfied(),
            poll_attempts: poll.attempts(),
            changes: report.changes,
            failures: report.failures,
            started_at,
            completed_at: Utc::now(),
        })
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> DomainResult<()> {
    if cancel.is_cancelled() {
        return Err(DomainError::Cancelled("verification cancelled".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        DetectionEntry, MockPresenceFeed, MockScannerControl, MockShipmentRepository,
        PresenceEntry, PresenceProjection,
    };

    fn control_expecting_full_cycle() -> MockScannerControl {
        let mut control = MockScannerControl::new();
        control
            .expect_scanner_id()
            .returning(|| "dock-a".to_string());
        control
            .expect_request_scan()
            .withf(|requested_by, _| requested_by == "jane@example.com")
            .times(1)
            .returning(|_, _| Ok(()));
        control
            .expect_set_status()
            .withf(|status, _| *status == ScannerStatus::Scanning)
            .times(1)
            .returning(|_, _| Ok(()));
        control
            .expect_clear_scan_request()
            .times(1)
            .returning(|| Ok(()));
        control
            .expect_set_status()
            .withf(|status, _| *status == ScannerStatus::Online)
            .times(1)
            .returning(|_, _| Ok(()));
        control
    }

    fn fresh_detection() -> DetectionEntry {
        DetectionEntry {
            entry_id: "e1".to_string(),
            device_id: "D1".to_string(),
            present: true,
            observed_at: Some(Utc::now()),
            rssi: Some(-55),
        }
    }

    fn empty_repo() -> MockShipmentRepository {
        let mut repo = MockShipmentRepository::new();
        repo.expect_list_by_receiver().returning(|_| Ok(vec![]));
        repo
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_poll_on_first_evidence() {
        let mut feed = MockPresenceFeed::new();
        feed.expect_detections_since()
            .times(1)
            .returning(|_| Ok(vec![fresh_detection()]));
        feed.expect_current_presence().times(1).returning(|| {
            Ok(PresenceProjection::from_entries(vec![PresenceEntry {
                device_id: "D1".to_string(),
                present: true,
                last_seen: None,
                rssi: None,
            }]))
        });

        let service = VerificationService::new(
            Arc::new(control_expecting_full_cycle()),
            Arc::new(feed),
            Arc::new(empty_repo()),
            VerificationConfig::default(),
        );

        let summary = service
            .verify_now("jane@example.com", &CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.scan_evidence_found);
        assert_eq!(summary.poll_attempts, 1);
        assert_eq!(summary.devices_detected, 1);
        assert!(!service.is_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn test_projection_read_failure_still_resets_scanner() {
        let mut feed = MockPresenceFeed::new();
        feed.expect_detections_since()
            .returning(|_| Ok(vec![fresh_detection()]));
        feed.expect_current_presence().times(1).returning(|| {
            Err(DomainError::PermissionDenied(
                "read on 'telemetry/current'".to_string(),
            ))
        });

        let service = VerificationService::new(
            Arc::new(control_expecting_full_cycle()),
            Arc::new(feed),
            Arc::new(MockShipmentRepository::new()),
            VerificationConfig::default(),
        );

        let err = service
            .verify_now("jane@example.com", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::VerificationFailed(_)));
        assert!(matches!(err.root_cause(), DomainError::PermissionDenied(_)));
        assert!(!service.is_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_write_failure_is_wrapped_and_cleaned_up() {
        let mut control = MockScannerControl::new();
        control
            .expect_scanner_id()
            .returning(|| "dock-a".to_string());
        control
            .expect_request_scan()
            .times(1)
            .returning(|_, _| Err(DomainError::StoreUnavailable("timeout".to_string())));
        control
            .expect_clear_scan_request()
            .times(1)
            .returning(|| Ok(()));
        control
            .expect_set_status()
            .withf(|status, _| *status == ScannerStatus::Online)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = VerificationService::new(
            Arc::new(control),
            Arc::new(MockPresenceFeed::new()),
            Arc::new(MockShipmentRepository::new()),
            VerificationConfig::default(),
        );

        let err = service
            .verify_now("jane@example.com", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), DomainError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_freshness_window_fails_before_triggering() {
        let mut control = MockScannerControl::new();
        control
            .expect_scanner_id()
            .returning(|| "dock-a".to_string());
        control.expect_request_scan().never();
        control
            .expect_clear_scan_request()
            .times(1)
            .returning(|| Ok(()));
        control
            .expect_set_status()
            .withf(|status, _| *status == ScannerStatus::Online)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = VerificationService::new(
            Arc::new(control),
            Arc::new(MockPresenceFeed::new()),
            Arc::new(MockShipmentRepository::new()),
            VerificationConfig {
                freshness_window_secs: u64::MAX,
                ..Default::default()
            },
        );

        let err = service
            .verify_now("jane@example.com", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), DomainError::ValidationError(_)));
        assert!(!service.is_in_progress());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_failure_after_success_is_reported() {
        let mut control = MockScannerControl::new();
        control
            .expect_scanner_id()
            .returning(|| "dock-a".to_string());
        control.expect_request_scan().returning(|_, _| Ok(()));
        control.expect_set_status().returning(|_, _| Ok(()));
        control.expect_clear_scan_request().times(1).returning(|| {
            Err(DomainError::PermissionDenied(
                "write on 'scanner/trigger'".to_string(),
            ))
        });

        let mut feed = MockPresenceFeed::new();
        feed.expect_detections_since()
            .returning(|_| Ok(vec![fresh_detection()]));
        feed.expect_current_presence()
            .returning(|| Ok(PresenceProjection::new()));

        let service = VerificationService::new(
            Arc::new(control),
            Arc::new(feed),
            Arc::new(empty_repo()),
            VerificationConfig::default(),
        );

        let err = service
            .verify_now("jane@example.com", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.root_cause(), DomainError::PermissionDenied(_)));
    }
}
