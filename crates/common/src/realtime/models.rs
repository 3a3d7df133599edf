//! Raw store records and their normalization into domain types.
//!
//! The scanner firmware and older clients do not agree on field names or
//! encodings, so parsing here is lenient: aliases are accepted, and entries
//! that still cannot be understood are skipped with a warning instead of
//! failing the whole snapshot.

use crate::domain::{
    CreateShipmentRepoInput, DetectionEntry, DomainError, DomainResult, PresenceEntry,
    PresenceProjection, ScanRequest, ScannerState, Shipment,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Shipment as stored under `shipments/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub product_name: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(alias = "sender_email")]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(alias = "receiver_email")]
    pub receiver_id: String,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(alias = "device_name")]
    pub device_id: String,
    #[serde(default)]
    pub notes: String,
    pub status: String,
    pub shipment_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<DateTime<Utc>>,
}

impl ShipmentRecord {
    pub fn new(input: CreateShipmentRepoInput, now: DateTime<Utc>) -> Self {
        Self {
            product_name: input.product_name,
            product_id: input.product_id,
            sender_id: input.sender_id,
            sender_name: input.sender_name,
            receiver_id: input.receiver_id,
            receiver_name: input.receiver_name,
            device_id: input.device_id,
            notes: input.notes,
            status: input.status.as_str().to_string(),
            shipment_date: input.shipment_date,
            received_date: None,
            created_date: Some(now),
            updated_date: Some(now),
        }
    }

    pub fn into_shipment(self, shipment_id: &str) -> DomainResult<Shipment> {
        let status = self.status.parse().map_err(|_| DomainError::MalformedRecord {
            path: shipment_id.to_string(),
            reason: format!("unknown status '{}'", self.status),
        })?;

        Ok(Shipment {
            shipment_id: shipment_id.to_string(),
            product_name: self.product_name,
            product_id: self.product_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            receiver_id: self.receiver_id,
            receiver_name: self.receiver_name,
            device_id: self.device_id,
            notes: self.notes,
            status,
            shipment_date: self.shipment_date,
            received_date: self.received_date,
            created_date: self.created_date,
            updated_date: self.updated_date,
        })
    }
}

/// Decode one shipment record
pub fn parse_shipment(shipment_id: &str, value: Value) -> DomainResult<Shipment> {
    let record: ShipmentRecord =
        serde_json::from_value(value).map_err(|e| DomainError::MalformedRecord {
            path: shipment_id.to_string(),
            reason: e.to_string(),
        })?;
    record.into_shipment(shipment_id)
}

/// Decode every shipment under the collection node, skipping malformed records
pub fn parse_shipments(collection: Option<Value>) -> Vec<Shipment> {
    let Some(Value::Object(records)) = collection else {
        return Vec::new();
    };

    records
        .into_iter()
        .filter_map(|(shipment_id, value)| match parse_shipment(&shipment_id, value) {
            Ok(shipment) => Some(shipment),
            Err(e) => {
                warn!(shipment_id = %shipment_id, error = %e, "skipping malformed shipment record");
                None
            }
        })
        .collect()
}

/// Decode the current-presence projection (`{deviceId: {present, last_seen, rssi}}`)
pub fn parse_presence_projection(node: Option<Value>) -> PresenceProjection {
    let Some(Value::Object(devices)) = node else {
        return PresenceProjection::new();
    };

    let entries = devices.iter().filter_map(|(device_id, value)| {
        let entry = parse_presence_entry(device_id, value);
        if entry.is_none() {
            warn!(device_id = %device_id, "skipping malformed presence entry");
        }
        entry
    });
    PresenceProjection::from_entries(entries)
}

pub fn parse_presence_entry(device_id: &str, value: &Value) -> Option<PresenceEntry> {
    let fields = value.as_object()?;
    let present = parse_bool(fields.get("present")?)?;

    Some(PresenceEntry {
        device_id: device_id.to_string(),
        present,
        last_seen: timestamp_field(fields),
        rssi: fields.get("rssi").and_then(parse_rssi),
    })
}

/// Decode the detection log, preserving key (chronological) order
pub fn parse_detection_log(node: Option<Value>) -> Vec<DetectionEntry> {
    let Some(Value::Object(entries)) = node else {
        return Vec::new();
    };

    let mut detections: Vec<DetectionEntry> = entries
        .iter()
        .filter_map(|(entry_id, value)| {
            let detection = parse_detection(entry_id, value);
            if detection.is_none() {
                warn!(entry_id = %entry_id, "skipping malformed detection entry");
            }
            detection
        })
        .collect();
    detections.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
    detections
}

pub fn parse_detection(entry_id: &str, value: &Value) -> Option<DetectionEntry> {
    let fields = value.as_object()?;
    let device_id = ["deviceName", "device_name", "device_id"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))?
        .to_string();

    // A log entry is an observation; absence of the flag means "seen"
    let present = match fields.get("present") {
        Some(value) => parse_bool(value)?,
        None => true,
    };

    Some(DetectionEntry {
        entry_id: entry_id.to_string(),
        device_id,
        present,
        observed_at: timestamp_field(fields),
        rssi: fields.get("rssi").and_then(parse_rssi),
    })
}

pub fn parse_scanner_state(node: Option<Value>) -> Option<ScannerState> {
    let node = node?;
    let fields = node.as_object()?;
    Some(ScannerState {
        status: fields
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string),
        last_seen: ["last_seen", "last_ping"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(parse_timestamp)),
    })
}

pub fn parse_scan_request(node: Option<Value>) -> Option<ScanRequest> {
    let node = node?;
    let fields = node.as_object()?;
    Some(ScanRequest {
        requested: fields
            .get("requested")
            .and_then(parse_bool)
            .unwrap_or(false),
        requested_by: fields
            .get("requested_by")
            .and_then(Value::as_str)
            .map(str::to_string),
        requested_at: fields.get("requested_at").and_then(parse_timestamp),
    })
}

fn timestamp_field(fields: &Map<String, Value>) -> Option<DateTime<Utc>> {
    ["timestamp", "last_seen", "lastSeen"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(parse_timestamp))
}

/// Accepts JSON bools, "true"/"false", and 0/1
pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// Accepts epoch milliseconds (number or numeric string) and RFC 3339 text
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(millis) => Utc.timestamp_millis_opt(millis).single(),
                Err(_) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc)),
            }
        }
        _ => None,
    }
}

pub fn parse_rssi(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
