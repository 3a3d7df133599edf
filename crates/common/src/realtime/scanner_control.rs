use crate::domain::{DomainResult, ScanRequest, ScannerControl, ScannerState, ScannerStatus};
use crate::realtime::{parse_scan_request, parse_scanner_state, RealtimeStore, StorePaths};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Drives the shared scanner through its store records
pub struct StoreScannerControl {
    store: Arc<dyn RealtimeStore>,
    paths: StorePaths,
    scanner_id: String,
}

impl StoreScannerControl {
    pub fn new(store: Arc<dyn RealtimeStore>, paths: StorePaths, scanner_id: &str) -> Self {
        Self {
            store,
            paths,
            scanner_id: scanner_id.to_string(),
        }
    }
}

fn fields(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

#[async_trait]
impl ScannerControl for StoreScannerControl {
    fn scanner_id(&self) -> String {
        self.scanner_id.clone()
    }

    async fn request_scan(&self, requested_by: &str, requested_at: DateTime<Utc>) -> DomainResult<()> {
        debug!(scanner_id = %self.scanner_id, requested_by = %requested_by, "raising scan request");
        self.store
            .update(
                &self.paths.scan_trigger,
                fields([
                    ("requested", json!(true)),
                    ("requested_by", json!(requested_by)),
                    ("requested_at", json!(requested_at)),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn clear_scan_request(&self) -> DomainResult<()> {
        debug!(scanner_id = %self.scanner_id, "clearing scan request");
        self.store
            .update(&self.paths.scan_trigger, fields([("requested", json!(false))]))
            .await?;
        Ok(())
    }

    async fn set_status(&self, status: ScannerStatus, at: DateTime<Utc>) -> DomainResult<()> {
        self.store
            .update(
                &self.paths.scanner_state,
                fields([("status", json!(status.as_str())), ("last_seen", json!(at))]),
            )
            .await?;
        Ok(())
    }

    async fn scanner_state(&self) -> DomainResult<Option<ScannerState>> {
        let node = self.store.get(&self.paths.scanner_state).await?;
        Ok(parse_scanner_state(node))
    }

    async fn scan_request(&self) -> DomainResult<Option<ScanRequest>> {
        let node = self.store.get(&self.paths.scan_trigger).await?;
        Ok(parse_scan_request(node))
    }
}
