use chrono::Utc;
use common::domain::{
    CreateShipmentRepoInput, DomainError, ScannerControl, ShipmentRepository, ShipmentStatus,
};
use common::realtime::{
    InMemoryRealtimeStore, RealtimeStore, StorePaths, StorePresenceFeed, StoreScannerControl,
    StoreShipmentRepository,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use verification::{VerificationConfig, VerificationService};

const RECEIVER: &str = "jane@example.com";

struct Harness {
    store: Arc<InMemoryRealtimeStore>,
    repo: Arc<StoreShipmentRepository>,
    control: Arc<StoreScannerControl>,
    service: Arc<VerificationService>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryRealtimeStore::new());
    let paths = StorePaths::default();
    let repo = Arc::new(StoreShipmentRepository::new(store.clone(), paths.clone()));
    let control = Arc::new(StoreScannerControl::new(store.clone(), paths.clone(), "dock-a"));
    let feed = Arc::new(StorePresenceFeed::new(store.clone(), paths));

    let service = Arc::new(VerificationService::new(
        control.clone(),
        feed,
        repo.clone(),
        VerificationConfig::default(),
    ));

    Harness {
        store,
        repo,
        control,
        service,
    }
}

async fn create(repo: &StoreShipmentRepository, device: &str) -> String {
    repo.create_shipment(CreateShipmentRepoInput {
        product_name: "Dell Laptop XPS 15".to_string(),
        product_id: format!("PKG-{}", device),
        sender_id: "sam@example.com".to_string(),
        sender_name: "Sam Sender".to_string(),
        receiver_id: RECEIVER.to_string(),
        receiver_name: "Jane Smith".to_string(),
        device_id: device.to_string(),
        notes: String::new(),
        status: ShipmentStatus::Sent,
        shipment_date: Utc::now(),
    })
    .await
    .unwrap()
    .shipment_id
}

async fn status_of(repo: &StoreShipmentRepository, shipment_id: &str) -> ShipmentStatus {
    repo.get_shipment(shipment_id).await.unwrap().unwrap().status
}

async fn log_detection(store: &InMemoryRealtimeStore, device: &str) {
    store
        .push(
            "telemetry/log",
            json!({"deviceName": device, "timestamp": Utc::now().timestamp_millis(), "rssi": -60}),
        )
        .await
        .unwrap();
}

async fn assert_scanner_reset(h: &Harness) {
    let request = h.control.scan_request().await.unwrap().unwrap();
    assert!(!request.requested);
    let state = h.control.scanner_state().await.unwrap().unwrap();
    assert_eq!(state.status.as_deref(), Some("online"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_still_reconciles_and_resets() {
    let h = harness();
    let here = create(&h.repo, "D1").await;
    let gone = create(&h.repo, "D2").await;
    h.store
        .set("telemetry/current/D1", json!({"present": true}))
        .await
        .unwrap();

    let start = tokio::time::Instant::now();
    let summary = h
        .service
        .verify_now(RECEIVER, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!summary.scan_evidence_found);
    assert_eq!(summary.poll_attempts, 15);
    assert_eq!(start.elapsed(), Duration::from_secs(30));
    assert_eq!(summary.devices_detected, 1);
    assert_eq!(summary.present, 1);
    assert_eq!(summary.missing, 1);
    assert_eq!(status_of(&h.repo, &here).await, ShipmentStatus::Present);
    assert_eq!(status_of(&h.repo, &gone).await, ShipmentStatus::Missing);
    assert_scanner_reset(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_fresh_detection_ends_poll_early() {
    let h = harness();
    create(&h.repo, "D1").await;

    let store = h.store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        log_detection(&store, "D1").await;
        store
            .set("telemetry/current/D1", json!({"present": true}))
            .await
            .unwrap();
    });

    let summary = h
        .service
        .verify_now(RECEIVER, &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.scan_evidence_found);
    assert_eq!(summary.poll_attempts, 3);
    assert_eq!(summary.present, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scan_request_is_visible_while_running() {
    let h = harness();
    let service = h.service.clone();
    let task = tokio::spawn(async move {
        service
            .verify_now(RECEIVER, &CancellationToken::new())
            .await
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let request = h.control.scan_request().await.unwrap().unwrap();
    assert!(request.requested);
    assert_eq!(request.requested_by.as_deref(), Some(RECEIVER));
    let state = h.control.scanner_state().await.unwrap().unwrap();
    assert_eq!(state.status.as_deref(), Some("scanning"));

    task.await.unwrap().unwrap();
    assert_scanner_reset(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_verifications_are_exclusive() {
    let h = harness();
    log_detection(&h.store, "D1").await;

    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(
        h.service.verify_now(RECEIVER, &cancel),
        h.service.verify_now("omar@example.com", &cancel),
    );

    let results = [first, second];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(DomainError::AlreadyInProgress(_))))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 1);

    // The claim is free again afterwards
    assert!(h
        .service
        .verify_now(RECEIVER, &CancellationToken::new())
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_projection_read_failure_cleans_up() {
    let h = harness();
    create(&h.repo, "D1").await;
    log_detection(&h.store, "D1").await;
    h.store.deny_reads("telemetry/current");

    let err = h
        .service
        .verify_now(RECEIVER, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::VerificationFailed(_)));
    assert!(matches!(err.root_cause(), DomainError::PermissionDenied(_)));
    assert!(!h.service.is_in_progress());
    assert_scanner_reset(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_releases_claim_and_resets() {
    let h = harness();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let start = tokio::time::Instant::now();
    let err = h.service.verify_now(RECEIVER, &cancel).await.unwrap_err();

    assert!(matches!(err.root_cause(), DomainError::Cancelled(_)));
    assert!(start.elapsed() < Duration::from_secs(30));
    assert!(!h.service.is_in_progress());
    assert_scanner_reset(&h).await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_verification_resets_scanner() {
    let h = harness();

    let abandoned = tokio::time::timeout(
        Duration::from_secs(3),
        h.service.verify_now(RECEIVER, &CancellationToken::new()),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::timeout(Duration::from_secs(1), async {
        while h.service.is_in_progress() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_scanner_reset(&h).await;
}
