use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.log_level` when set. JSON output carries the
/// current span and span list so `#[instrument]` fields (shipment_id,
/// receiver_id, ...) land on every line.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_list(true)
            .with_current_span(true);
        registry.with(fmt_layer).try_init()
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        registry.with(fmt_layer).try_init()
    };

    result.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))?;

    tracing::debug!(service = %config.service_name, "logging initialized");
    Ok(())
}
