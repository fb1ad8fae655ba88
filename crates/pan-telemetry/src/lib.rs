//! # pan-telemetry
//!
//! Structured logging for a PAN node. Every component logs
//! through `tracing`; this crate owns the one-time subscriber install and
//! the environment-variable configuration that feeds it.
//!
//! Just the `tracing`/`tracing-subscriber` logging layer: no
//! OpenTelemetry/Tempo tracer, no Prometheus metrics registry, since
//! there is no metrics-export or distributed-tracing component to feed
//! one (see DESIGN.md).

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::StructuredLogger;

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid telemetry configuration: {0}")]
    Config(String),
}

/// Install the global `tracing` subscriber described by `config`.
///
/// Returns a guard that must be held for the process lifetime; nothing is
/// flushed on drop today (there is no exporter to flush) but callers
/// should treat it opaquely in case a future subscriber layer needs one.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let logger = logging::init_logging(&config)?;
    Ok(TelemetryGuard { _logger: logger })
}

/// Guard that keeps the logging subscriber installed.
pub struct TelemetryGuard {
    _logger: StructuredLogger,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_names_the_node_service() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "pan-node");
    }
}
