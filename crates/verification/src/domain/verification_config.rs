use common::domain::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted freshness window (one day)
pub const MAX_FRESHNESS_WINDOW_SECS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Wait before each look at the detection log (default: 2000 ms)
    pub poll_interval_ms: u64,

    /// Looks at the detection log before giving up on fresh evidence (default: 15)
    pub max_poll_attempts: u32,

    /// How recent a detection must be to count as evidence of this scan (default: 30 s)
    pub freshness_window_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_poll_attempts: 15,
            freshness_window_secs: 30,
        }
    }
}

impl VerificationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings the protocol cannot run with
    pub fn validate(&self) -> DomainResult<()> {
        self.freshness_window().map(|_| ())
    }

    pub fn freshness_window(&self) -> DomainResult<chrono::Duration> {
        let secs = self.freshness_window_secs;
        if secs == 0 || secs > MAX_FRESHNESS_WINDOW_SECS {
            return Err(DomainError::ValidationError(format!(
                "freshness window must be between 1 and {} seconds, got {}",
                MAX_FRESHNESS_WINDOW_SECS, secs
            )));
        }

        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                DomainError::ValidationError(format!(
                    "freshness window of {} seconds overflows",
                    secs
                ))
            })
    }
}
