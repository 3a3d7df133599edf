use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeMap;

/// Lazy, push-driven sequence of full snapshots.
///
/// Each item is a complete view of the watched path, never a diff. After an `Err`
/// item the stream ends; resubscribe to resume. Dropping the stream releases the
/// underlying store listener.
pub type SnapshotStream<T> = BoxStream<'static, DomainResult<T>>;

/// Latest known presence of one beacon, as held in the current-presence projection
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub device_id: String,
    pub present: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub rssi: Option<i32>,
}

/// Upsert-by-device view of the latest presence per beacon.
/// Authoritative for "is this device here right now".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceProjection {
    entries: BTreeMap<String, PresenceEntry>,
}

impl PresenceProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = PresenceEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.device_id.clone(), entry))
                .collect(),
        }
    }

    pub fn insert(&mut self, entry: PresenceEntry) {
        self.entries.insert(entry.device_id.clone(), entry);
    }

    pub fn get(&self, device_id: &str) -> Option<&PresenceEntry> {
        self.entries.get(device_id)
    }

    /// True only when an entry exists and reports the device present
    pub fn is_present(&self, device_id: &str) -> bool {
        self.get(device_id).is_some_and(|entry| entry.present)
    }

    /// Device ids currently reported present
    pub fn detected_devices(&self) -> impl Iterator<Item = &str> {
        self.entries
            .values()
            .filter(|entry| entry.present)
            .map(|entry| entry.device_id.as_str())
    }

    pub fn detected_count(&self) -> usize {
        self.detected_devices().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PresenceEntry> {
        self.entries.values()
    }
}

/// One raw observation from the append-only detection log
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEntry {
    pub entry_id: String,
    pub device_id: String,
    pub present: bool,
    pub observed_at: Option<DateTime<Utc>>,
    pub rssi: Option<i32>,
}

impl DetectionEntry {
    /// Observed strictly within `window` before `now`. Entries without a
    /// timestamp are never fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.observed_at {
            Some(observed_at) => now.signed_duration_since(observed_at) < window,
            None => false,
        }
    }
}

/// Read side of the beacon telemetry written by the scanning hardware
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PresenceFeed: Send + Sync {
    /// One-shot read of the current-presence projection
    async fn current_presence(&self) -> DomainResult<PresenceProjection>;

    /// Detection log entries observed at or after `since`
    async fn detections_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<DetectionEntry>>;

    /// Newest detection per device among the last `limit` log entries, newest first
    async fn latest_detections(&self, limit: usize) -> DomainResult<Vec<DetectionEntry>>;

    /// Push-driven snapshots of the current-presence projection
    fn subscribe_presence(&self) -> DomainResult<SnapshotStream<PresenceProjection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(device_id: &str, present: bool) -> PresenceEntry {
        PresenceEntry {
            device_id: device_id.to_string(),
            present,
            last_seen: None,
            rssi: Some(-60),
        }
    }

    #[test]
    fn test_projection_upserts_by_device() {
        let mut projection = PresenceProjection::new();
        projection.insert(entry("ESP32_Slave1", true));
        projection.insert(entry("ESP32_Slave1", false));

        assert_eq!(projection.len(), 1);
        assert!(!projection.is_present("ESP32_Slave1"));
    }

    #[test]
    fn test_absent_device_is_not_present() {
        let projection = PresenceProjection::from_entries(vec![entry("ESP32_Slave1", true)]);

        assert!(projection.is_present("ESP32_Slave1"));
        assert!(!projection.is_present("ESP32_Slave2"));
    }

    #[test]
    fn test_detected_count_ignores_absent_entries() {
        let projection = PresenceProjection::from_entries(vec![
            entry("ESP32_Slave1", true),
            entry("ESP32_Slave2", false),
            entry("ESP32_Slave3", true),
        ]);

        assert_eq!(projection.detected_count(), 2);
    }

    #[test]
    fn test_detection_freshness() {
        let now = Utc::now();
        let mut detection = DetectionEntry {
            entry_id: "e1".to_string(),
            device_id: "ESP32_Slave1".to_string(),
            present: true,
            observed_at: Some(now - Duration::seconds(10)),
            rssi: None,
        };
        assert!(detection.is_fresh(now, Duration::seconds(30)));

        detection.observed_at = Some(now - Duration::seconds(30));
        assert!(!detection.is_fresh(now, Duration::seconds(30)));

        detection.observed_at = None;
        assert!(!detection.is_fresh(now, Duration::seconds(30)));
    }
}
