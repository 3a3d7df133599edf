use common::domain::{PresenceFeed, ScannerControl, ShipmentRepository};
use common::logging::{init_logging, LoggingConfig};
use common::realtime::{
    InMemoryRealtimeStore, RealtimeStore, StorePaths, StorePresenceFeed, StoreScannerControl,
    StoreShipmentRepository,
};
use presence_reconciler::PresenceReconciler;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracker_all_in_one::config::ServiceConfig;
use tracker_all_in_one::scanner_simulator::{ScannerSimulator, ScannerSimulatorConfig};
use tracker_api::{ShipmentService, TrackerApi, TrackerApiServices};
use tracker_runner::Runner;
use verification::VerificationService;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&LoggingConfig {
        service_name: "tracker-all-in-one".to_string(),
        log_level: config.log_level.clone(),
        json: config.log_json,
    }) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(
        scanner_id = %config.scanner_id,
        receivers = ?config.receiver_ids(),
        simulator_enabled = config.simulator_enabled,
        "Starting tracker-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    // Shared store and its typed views
    let store: Arc<dyn RealtimeStore> = Arc::new(InMemoryRealtimeStore::new());
    let paths = StorePaths::default();

    let shipment_repository: Arc<dyn ShipmentRepository> = Arc::new(
        StoreShipmentRepository::new(Arc::clone(&store), paths.clone()),
    );
    let presence_feed: Arc<dyn PresenceFeed> =
        Arc::new(StorePresenceFeed::new(Arc::clone(&store), paths.clone()));
    let scanner_control: Arc<dyn ScannerControl> = Arc::new(StoreScannerControl::new(
        Arc::clone(&store),
        paths.clone(),
        &config.scanner_id,
    ));

    // Reconciler shutdown token - owned by main for lifecycle coordination
    let reconciler_shutdown_token = tokio_util::sync::CancellationToken::new();

    let presence_reconciler = PresenceReconciler::new(
        Arc::clone(&presence_feed),
        Arc::clone(&shipment_repository),
        config.watcher_config(),
        config.receiver_ids(),
        reconciler_shutdown_token.clone(),
    );

    let tracker_api = Arc::new(TrackerApi::new(TrackerApiServices {
        shipment_service: Arc::new(ShipmentService::new(Arc::clone(&shipment_repository))),
        verification_service: Arc::new(VerificationService::new(
            Arc::clone(&scanner_control),
            Arc::clone(&presence_feed),
            Arc::clone(&shipment_repository),
            config.verification_config(),
        )),
        presence_feed,
        scanner_control,
        session_orchestrator: Some(presence_reconciler.orchestrator()),
    }));

    let mut runner = Runner::new()
        .with_app_process(presence_reconciler.into_runner_process());

    if config.simulator_enabled {
        let simulator = ScannerSimulator::new(
            Arc::clone(&store),
            paths,
            ScannerSimulatorConfig {
                devices: config.simulator_device_ids(),
                absent_devices: config.simulator_absent_device_ids(),
                poll_interval_ms: config.simulator_poll_interval_ms,
            },
        );
        runner = runner.with_app_process(simulator.into_runner_process());
    }

    runner = runner
        .with_closer({
            let tracker_api = Arc::clone(&tracker_api);
            move || {
                Box::pin(async move {
                    info!("Running cleanup tasks...");
                    reconciler_shutdown_token.cancel();

                    match tracker_api.scanner_health().await {
                        Ok(health) => info!(scanner_health = ?health, "scanner state at shutdown"),
                        Err(e) => error!(error = %e, "failed to read scanner state at shutdown"),
                    }

                    info!("Cleanup complete");
                    Ok(())
                })
            }
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs));

    if let Err(e) = runner.run().await {
        error!(error = %format!("{:#}", e), "tracker-all-in-one exited with error");
        std::process::exit(1);
    }
}
