//! Logging and metrics setup shared by snapshot exporter binaries and tests.

pub mod metrics;
pub mod tracing;
