use crate::realtime::child_path;
use serde::{Deserialize, Serialize};

/// Where each record family lives in the realtime store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePaths {
    /// Shipment records, keyed by shipment id
    pub shipments: String,

    /// Current-presence projection, keyed by device id
    pub presence: String,

    /// Append-only detection log
    pub detections: String,

    /// Shared scanner mode and heartbeat
    pub scanner_state: String,

    /// Scan-requested flag polled by the hardware
    pub scan_trigger: String,
}

impl Default for StorePaths {
    fn default() -> Self {
        Self {
            shipments: "shipments".to_string(),
            presence: "telemetry/current".to_string(),
            detections: "telemetry/log".to_string(),
            scanner_state: "scanner/state".to_string(),
            scan_trigger: "scanner/trigger".to_string(),
        }
    }
}

impl StorePaths {
    pub fn shipment(&self, shipment_id: &str) -> String {
        child_path(&self.shipments, shipment_id)
    }

    pub fn presence_entry(&self, device_id: &str) -> String {
        child_path(&self.presence, device_id)
    }
}
