/// Configuration for log output initialization
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub service_name: String,
    pub log_level: String,
    /// Emit JSON lines (production) instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            json: true,
        }
    }
}
