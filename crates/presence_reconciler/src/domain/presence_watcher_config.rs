use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceWatcherConfig {
    /// Delay before resubscribing after a feed error (default: 5 seconds)
    pub retry_delay_secs: u64,

    /// Consecutive failed subscriptions before the watcher gives up (default: 3)
    pub max_retry_attempts: u32,

    /// How long `close_session` waits for a watcher to stop (default: 5 seconds)
    pub stop_timeout_secs: u64,
}

impl Default for PresenceWatcherConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 5,
            max_retry_attempts: 3,
            stop_timeout_secs: 5,
        }
    }
}

impl PresenceWatcherConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}
