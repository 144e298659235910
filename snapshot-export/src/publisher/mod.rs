//! Delivery of change records to the message log.

mod base;
mod encoding;
#[cfg(feature = "kafka")]
mod kafka;
mod memory;
mod record;
mod registry;

pub use base::{LogDestination, LogProducer, ProduceError};
pub use encoding::{RecordEncoder, avro_value_schema, value_subject};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaDestination, KafkaProducer};
pub use memory::{MemoryDestination, MemoryProducer, PublishedMessage};
pub use record::{KeyingMode, RecordPublisher, SendOutcome};
pub use registry::HttpSchemaRegistry;
