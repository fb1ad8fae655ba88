//! Structured logging setup.
//!
//! Every per-connection log line is expected to carry `conn_id` and `kind`
//! (`agent`/`peer`) as structured fields via `tracing::Span`/`#[instrument]`
//! rather than string interpolation; the macros below give call sites a
//! terse way to attach the connection context consistently.

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, EnvFilter};

/// Handle kept alive for the lifetime of the process; currently a marker,
/// present so call sites don't need to change if logging gains a flush
/// step later.
pub struct StructuredLogger {
    _initialized: bool,
}

/// Install the global `tracing` subscriber.
pub fn init_logging(config: &TelemetryConfig) -> Result<StructuredLogger, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // A subscriber may already be installed (e.g. by a test harness); that
    // is not a startup failure.
    if let Err(err) = result {
        tracing::debug!(error = %err, "tracing subscriber already initialized");
    }

    Ok(StructuredLogger { _initialized: true })
}

/// Log an event tagged with the owning connection's id and kind.
#[macro_export]
macro_rules! log_conn_event {
    ($level:ident, $conn_id:expr, $kind:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            conn_id = %$conn_id,
            kind = $kind,
            $($($field)*,)?
            $msg
        )
    };
}

#[cfg(test)]
mod tests {
    // Exercising the global subscriber install is better done in an
    // integration test than a unit test, since `tracing::subscriber::set_global_default`
    // can only succeed once per process.
}
