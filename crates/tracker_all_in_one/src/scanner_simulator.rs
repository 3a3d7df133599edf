use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::realtime::{parse_scan_request, RealtimeStore, StorePaths};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the simulated scanning hardware
#[derive(Debug, Clone)]
pub struct ScannerSimulatorConfig {
    /// Beacons within range of the scanner
    pub devices: Vec<String>,
    /// Beacons in `devices` reported as not present
    pub absent_devices: Vec<String>,
    pub poll_interval_ms: u64,
}

/// Stand-in for the scanner firmware: heartbeats into the scanner record,
/// watches the trigger, and answers each new scan request with detections.
pub struct ScannerSimulator {
    store: Arc<dyn RealtimeStore>,
    paths: StorePaths,
    config: ScannerSimulatorConfig,
}

impl ScannerSimulator {
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        paths: StorePaths,
        config: ScannerSimulatorConfig,
    ) -> Self {
        Self {
            store,
            paths,
            config,
        }
    }

    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        info!(
            devices = ?self.config.devices,
            absent_devices = ?self.config.absent_devices,
            poll_interval_ms = self.config.poll_interval_ms,
            "starting scanner simulator"
        );

        self.store
            .update(
                &self.paths.scanner_state,
                status_fields(Some("online"), Utc::now()),
            )
            .await
            .context("failed to register simulated scanner")?;

        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_handled: Option<DateTime<Utc>> = None;
        let mut round: u32 = 0;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("scanner simulator stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // The firmware keeps running through store outages
                    if let Err(e) = self.poll_once(&mut last_handled, &mut round).await {
                        warn!(error = %format!("{:#}", e), "scanner simulator tick failed");
                    }
                }
            }
        }
    }

    /// Heartbeat, then answer the trigger if it carries a request not yet served
    async fn poll_once(&self, last_handled: &mut Option<DateTime<Utc>>, round: &mut u32) -> Result<()> {
        let now = Utc::now();
        self.store
            .update(&self.paths.scanner_state, status_fields(None, now))
            .await
            .context("failed to write heartbeat")?;

        let trigger = self
            .store
            .get(&self.paths.scan_trigger)
            .await
            .context("failed to read scan trigger")?;
        let Some(request) = parse_scan_request(trigger) else {
            return Ok(());
        };
        if !request.requested {
            return Ok(());
        }

        let request_key = request.requested_at.unwrap_or(now);
        if *last_handled == Some(request_key) {
            return Ok(());
        }

        let written = self.scan(*round).await?;
        info!(
            requested_by = request.requested_by.as_deref().unwrap_or("unknown"),
            round = *round,
            detections = written,
            "answered scan request"
        );
        *last_handled = Some(request_key);
        *round = round.wrapping_add(1);
        Ok(())
    }

    /// Upsert the presence projection for every known beacon, then log one
    /// detection each. Returns the number of detections logged.
    pub async fn scan(&self, round: u32) -> Result<usize> {
        let observed_ms = Utc::now().timestamp_millis();
        let readings: Vec<(&String, bool, i32)> = self
            .config
            .devices
            .iter()
            .enumerate()
            .map(|(index, device_id)| {
                let present = !self.config.absent_devices.contains(device_id);
                (device_id, present, simulated_rssi(index, round))
            })
            .collect();

        // Projection first: a log entry is the signal that the scan finished
        for (device_id, present, rssi) in &readings {
            self.store
                .set(
                    &self.paths.presence_entry(device_id),
                    json!({
                        "present": present,
                        "rssi": rssi,
                        "last_seen": observed_ms,
                    }),
                )
                .await
                .with_context(|| format!("failed to update presence for {}", device_id))?;
        }

        for (device_id, present, rssi) in &readings {
            self.store
                .push(
                    &self.paths.detections,
                    json!({
                        "deviceName": device_id,
                        "present": present,
                        "rssi": rssi,
                        "timestamp": observed_ms,
                    }),
                )
                .await
                .with_context(|| format!("failed to log detection for {}", device_id))?;

            debug!(device_id = %device_id, present = present, rssi = rssi, "simulated detection");
        }

        Ok(readings.len())
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        Box::new(move |ctx| Box::pin(async move { self.run(ctx).await }))
    }
}

fn status_fields(status: Option<&str>, at: DateTime<Utc>) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(status) = status {
        fields.insert("status".to_string(), json!(status));
    }
    fields.insert("last_seen".to_string(), json!(at.timestamp_millis()));
    fields
}

/// Signal strength drifts a little per round; farther slots read weaker
fn simulated_rssi(index: usize, round: u32) -> i32 {
    -45 - (index as i32) * 6 - (round % 5) as i32
}
