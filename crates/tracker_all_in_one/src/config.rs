use config::{Config, ConfigError, Environment};
use presence_reconciler::PresenceWatcherConfig;
use serde::{Deserialize, Serialize};
use verification::VerificationConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable text
    #[serde(default = "default_log_json")]
    pub log_json: bool,

    /// Receivers whose shipments are watched from startup (comma-separated)
    #[serde(default = "default_receivers")]
    pub receivers: String,

    /// Identifier of the shared scanning hardware
    #[serde(default = "default_scanner_id")]
    pub scanner_id: String,

    // Presence watcher configuration
    #[serde(default = "default_watcher_retry_delay_secs")]
    pub watcher_retry_delay_secs: u64,

    #[serde(default = "default_watcher_max_retry_attempts")]
    pub watcher_max_retry_attempts: u32,

    #[serde(default = "default_watcher_stop_timeout_secs")]
    pub watcher_stop_timeout_secs: u64,

    // Verification configuration
    #[serde(default = "default_verification_poll_interval_ms")]
    pub verification_poll_interval_ms: u64,

    #[serde(default = "default_verification_max_poll_attempts")]
    pub verification_max_poll_attempts: u32,

    /// How recent a detection must be to count as evidence of a scan
    #[serde(default = "default_verification_freshness_window_secs")]
    pub verification_freshness_window_secs: u64,

    // Scanner simulator configuration
    /// Run the simulated scanner against the in-memory store
    #[serde(default = "default_simulator_enabled")]
    pub simulator_enabled: bool,

    /// Beacons the simulated scanner knows about (comma-separated)
    #[serde(default = "default_simulator_devices")]
    pub simulator_devices: String,

    /// Known beacons the simulated scanner reports as not present (comma-separated)
    #[serde(default = "default_simulator_absent_devices")]
    pub simulator_absent_devices: String,

    #[serde(default = "default_simulator_poll_interval_ms")]
    pub simulator_poll_interval_ms: u64,

    /// Upper bound on cleanup after shutdown starts
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

fn default_receivers() -> String {
    "receiver@example.com".to_string()
}

fn default_scanner_id() -> String {
    "warehouse-scanner".to_string()
}

// Presence watcher defaults
fn default_watcher_retry_delay_secs() -> u64 {
    5
}

fn default_watcher_max_retry_attempts() -> u32 {
    3
}

fn default_watcher_stop_timeout_secs() -> u64 {
    5
}

// Verification defaults
fn default_verification_poll_interval_ms() -> u64 {
    2000
}

fn default_verification_max_poll_attempts() -> u32 {
    15
}

fn default_verification_freshness_window_secs() -> u64 {
    30
}

// Simulator defaults
fn default_simulator_enabled() -> bool {
    true
}

fn default_simulator_devices() -> String {
    "ESP32_Slave1,ESP32_Slave2,ESP32_Slave3,ESP32_Slave4,ESP32_Slave5".to_string()
}

fn default_simulator_absent_devices() -> String {
    String::new()
}

fn default_simulator_poll_interval_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Split a comma-separated setting, dropping blanks
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(Environment::with_prefix("TRACKER"))
            .build()?
            .try_deserialize()?;

        config
            .verification_config()
            .validate()
            .map_err(|e| ConfigError::Message(format!("TRACKER_VERIFICATION_*: {}", e)))?;
        Ok(config)
    }

    pub fn receiver_ids(&self) -> Vec<String> {
        split_list(&self.receivers)
    }

    pub fn simulator_device_ids(&self) -> Vec<String> {
        split_list(&self.simulator_devices)
    }

    pub fn simulator_absent_device_ids(&self) -> Vec<String> {
        split_list(&self.simulator_absent_devices)
    }

    pub fn watcher_config(&self) -> PresenceWatcherConfig {
        PresenceWatcherConfig {
            retry_delay_secs: self.watcher_retry_delay_secs,
            max_retry_attempts: self.watcher_max_retry_attempts,
            stop_timeout_secs: self.watcher_stop_timeout_secs,
        }
    }

    pub fn verification_config(&self) -> VerificationConfig {
        VerificationConfig {
            poll_interval_ms: self.verification_poll_interval_ms,
            max_poll_attempts: self.verification_max_poll_attempts,
            freshness_window_secs: self.verification_freshness_window_secs,
        }
    }
}
