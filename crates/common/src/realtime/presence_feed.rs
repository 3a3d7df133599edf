use crate::domain::{
    DetectionEntry, DomainResult, PresenceFeed, PresenceProjection, SnapshotStream,
};
use crate::realtime::{
    parse_detection_log, parse_presence_projection, watch_snapshots, RealtimeStore, StorePaths,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Telemetry feed that normalizes the presence projection and detection log
/// written by the scanning hardware
pub struct StorePresenceFeed {
    store: Arc<dyn RealtimeStore>,
    paths: StorePaths,
}

impl StorePresenceFeed {
    pub fn new(store: Arc<dyn RealtimeStore>, paths: StorePaths) -> Self {
        Self { store, paths }
    }

    async fn detection_log(&self) -> DomainResult<Vec<DetectionEntry>> {
        let log = self.store.get(&self.paths.detections).await?;
        Ok(parse_detection_log(log))
    }
}

#[async_trait]
impl PresenceFeed for StorePresenceFeed {
    async fn current_presence(&self) -> DomainResult<PresenceProjection> {
        let node = self.store.get(&self.paths.presence).await?;
        Ok(parse_presence_projection(node))
    }

    async fn detections_since(&self, since: DateTime<Utc>) -> DomainResult<Vec<DetectionEntry>> {
        let mut detections = self.detection_log().await?;
        detections.retain(|entry| entry.observed_at.is_some_and(|at| at >= since));
        Ok(detections)
    }

    async fn latest_detections(&self, limit: usize) -> DomainResult<Vec<DetectionEntry>> {
        let log = self.detection_log().await?;
        let mut recent: Vec<DetectionEntry> =
            log.into_iter().rev().take(limit).collect::<Vec<_>>();
        recent.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));

        let mut seen = HashSet::new();
        recent.retain(|entry| seen.insert(entry.device_id.clone()));
        Ok(recent)
    }

    fn subscribe_presence(&self) -> DomainResult<SnapshotStream<PresenceProjection>> {
        let stream = watch_snapshots(
            Arc::clone(&self.store),
            &self.paths.presence,
            parse_presence_projection,
        )?;
        Ok(stream)
    }
}
