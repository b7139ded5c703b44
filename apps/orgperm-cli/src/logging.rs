//! Tracing subscriber setup.
//!
//! Logs go to stderr so that command output on stdout stays valid JSON.

use orgperm_governance::EngineConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber. `RUST_LOG` wins over `config.log_filter`.
pub fn init(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|e| {
            eprintln!("Invalid log filter '{}': {e}", config.log_filter);
            EnvFilter::new("warn")
        });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_ok() {
        tracing::debug!(filter = %config.log_filter, json = config.log_json, "Logging initialized");
    }
}
