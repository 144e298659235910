//! Shared configuration types for the snapshot exporter.

mod base;
mod connection;
mod export;
mod exporter;
mod kafka;
mod state_store;

pub use base::ValidationError;
pub use connection::{DefaultPgConnectionOptions, IntoConnectOptions, PgConnectionConfig, TlsConfig};
pub use export::{ExportConfig, SerializationMode};
pub use exporter::ExporterConfig;
pub use kafka::KafkaConfig;
pub use state_store::StateStoreConfig;
