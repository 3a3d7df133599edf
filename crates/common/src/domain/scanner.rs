use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Seconds without a heartbeat after which the scanner is reported offline
pub const SCANNER_STALE_AFTER_SECS: i64 = 30;

/// Mode the engine writes to the shared scanner record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerStatus {
    Online,
    Scanning,
}

impl ScannerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Scanning => "scanning",
        }
    }
}

impl fmt::Display for ScannerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scanner record as stored. `status` is kept raw because the hardware writes
/// values the engine never does (e.g. "active").
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerState {
    pub status: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Derived liveness of the scanner, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerHealth {
    Online,
    Scanning,
    Offline,
    Disconnected,
}

impl ScannerState {
    pub fn health(&self, now: DateTime<Utc>) -> ScannerHealth {
        if let Some(last_seen) = self.last_seen {
            if now.signed_duration_since(last_seen) > Duration::seconds(SCANNER_STALE_AFTER_SECS) {
                return ScannerHealth::Offline;
            }
        }

        match self.status.as_deref() {
            Some("scanning") => ScannerHealth::Scanning,
            Some("online") | Some("active") => ScannerHealth::Online,
            _ => ScannerHealth::Disconnected,
        }
    }
}

/// The "scan requested" record the hardware polls for
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub requested: bool,
    pub requested_by: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
}

/// Control surface of the shared scanning hardware, reached only through the store
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ScannerControl: Send + Sync {
    /// Identifier of the physical scanner resource this control drives
    fn scanner_id(&self) -> String;

    /// Raise the scan-requested flag
    async fn request_scan(&self, requested_by: &str, requested_at: DateTime<Utc>)
        -> DomainResult<()>;

    /// Lower the scan-requested flag
    async fn clear_scan_request(&self) -> DomainResult<()>;

    /// Write the scanner mode and heartbeat
    async fn set_status(&self, status: ScannerStatus, at: DateTime<Utc>) -> DomainResult<()>;

    async fn scanner_state(&self) -> DomainResult<Option<ScannerState>>;

    async fn scan_request(&self) -> DomainResult<Option<ScanRequest>>;
}
