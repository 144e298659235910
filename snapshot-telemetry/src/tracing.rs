use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines.
    Pretty,
    /// One JSON object per line, for log shipping.
    Json,
}

/// Installs the global tracing subscriber for a binary.
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(app_name: &str, format: LogFormat) -> Result<(), TracingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init()?,
    }

    tracing::debug!(app_name, "tracing initialized");

    Ok(())
}

static TEST_TRACING: Once = Once::new();

/// Installs a test writer subscriber once per process; later calls are no-ops.
///
/// Set `ENABLE_TRACING=1` to see logs from tests.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_test_writer())
                .try_init();
        }
    });
}
