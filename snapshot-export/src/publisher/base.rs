use std::future::Future;

use thiserror::Error;

use crate::error::ExportResult;

/// Failure of a single produce attempt.
#[derive(Debug, Clone, Error)]
pub enum ProduceError {
    /// The attempt may succeed if repeated, e.g. a broker timeout or a full local queue.
    #[error("transient produce failure: {0}")]
    Transient(String),
    /// Repeating the attempt cannot succeed, e.g. the message exceeds the size limit.
    #[error("fatal produce failure: {0}")]
    Fatal(String),
}

/// A connection to the log able to append messages.
pub trait LogProducer {
    /// Appends one message to `topic` and waits for the log to acknowledge it.
    fn produce(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), ProduceError>> + Send;

    /// Flushes outstanding messages and releases the producer.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// The message log together with the schema registry attached to it.
pub trait LogDestination {
    type Producer: LogProducer + Send + Sync + 'static;

    /// Returns the name of the destination, used in logs.
    fn name() -> &'static str;

    /// Creates a producer dedicated to `topic`.
    fn create_producer(&self, topic: &str) -> impl Future<Output = ExportResult<Self::Producer>> + Send;

    /// Registers an Avro schema under `subject` and returns its registry id.
    ///
    /// Registering a schema identical to an existing version returns the existing id.
    fn register_schema(
        &self,
        subject: &str,
        schema: &str,
    ) -> impl Future<Output = ExportResult<u32>> + Send;
}
