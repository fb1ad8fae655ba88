//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line.
    pub service_name: String,

    /// Log level filter, used as the default only when `RUST_LOG` is
    /// unset; `RUST_LOG` always takes precedence when present.
    pub log_level: String,

    /// Emit newline-delimited JSON instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "pan-node".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// - `PAN_SERVICE_NAME`: service name (default: `pan-node`)
    /// - `PAN_LOG_LEVEL` or `RUST_LOG`: log level (default: `info`)
    /// - `PAN_JSON_LOGS`: emit JSON logs (default: `false`)
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("PAN_SERVICE_NAME").unwrap_or_else(|_| "pan-node".to_string()),
            log_level: env::var("PAN_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
            json_logs: env::var("PAN_JSON_LOGS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}
