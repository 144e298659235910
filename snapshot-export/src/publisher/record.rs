use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use snapshot_config::shared::SerializationMode;
use tracing::{info, warn};

use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, ExportResult};
use crate::metrics::{SNAPSHOT_EXPORT_PUBLISH_RETRIES_TOTAL, TABLE_NAME_LABEL};
use crate::publisher::{
    LogDestination, LogProducer, ProduceError, RecordEncoder, avro_value_schema, value_subject,
};
use crate::types::{ChangeRecord, TableSchema};

/// Whether messages carry the rendered primary key as message key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyingMode {
    WithKey,
    WithoutKey,
}

impl KeyingMode {
    pub fn from_send_with_key(send_with_key: bool) -> Self {
        if send_with_key {
            KeyingMode::WithKey
        } else {
            KeyingMode::WithoutKey
        }
    }
}

/// Result of [`RecordPublisher::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The log acknowledged the message.
    Delivered,
    /// Shutdown was requested before the message could be delivered.
    Cancelled,
}

/// Publishes the change records of one table to its topic.
///
/// Transient produce failures are retried after a fixed backoff until the message is
/// delivered or shutdown is requested, so a successful send is never reported for an
/// undelivered message.
#[derive(Debug)]
pub struct RecordPublisher<P> {
    topic: String,
    keying: KeyingMode,
    encoder: RecordEncoder,
    table_schema: Arc<TableSchema>,
    producer: P,
    retry_backoff: Duration,
}

impl<P> RecordPublisher<P>
where
    P: LogProducer + Send + Sync + 'static,
{
    /// Creates a publisher for `table_schema`, registering the value schema first when
    /// records are serialized as Avro.
    pub async fn create<D>(
        destination: &D,
        table_schema: Arc<TableSchema>,
        topic: String,
        serialization: SerializationMode,
        keying: KeyingMode,
        retry_backoff: Duration,
    ) -> ExportResult<Self>
    where
        D: LogDestination<Producer = P>,
    {
        let encoder = match serialization {
            SerializationMode::Json => RecordEncoder::Json,
            SerializationMode::Avro => {
                let schema = avro_value_schema(&table_schema);
                let schema_id = destination
                    .register_schema(&value_subject(&topic), &schema.to_string())
                    .await?;
                RecordEncoder::avro(&table_schema, schema_id)?
            }
        };
        let producer = destination.create_producer(&topic).await?;

        info!(
            table = %table_schema.name,
            topic,
            %serialization,
            ?keying,
            destination = D::name(),
            "created record publisher"
        );

        Ok(Self {
            topic,
            keying,
            encoder,
            table_schema,
            producer,
            retry_backoff,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Sends `record`, retrying transient failures until it is delivered or shutdown is
    /// requested.
    ///
    /// The first attempt is made even if shutdown was already requested. Fatal produce
    /// failures and encoding failures are returned as errors.
    pub async fn send(
        &mut self,
        shutdown_rx: &mut ShutdownRx,
        record: &ChangeRecord,
    ) -> ExportResult<SendOutcome> {
        let payload = self.encoder.encode(&self.table_schema, record)?;
        let key = match self.keying {
            KeyingMode::WithKey => Some(record.change_key.to_string().into_bytes()),
            KeyingMode::WithoutKey => None,
        };

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self
                .producer
                .produce(&self.topic, key.as_deref(), &payload)
                .await
            {
                Ok(()) => return Ok(SendOutcome::Delivered),
                Err(ProduceError::Fatal(reason)) => {
                    bail!(
                        ErrorKind::PublishFailed,
                        "Message could not be published",
                        format!("topic {}: {reason}", self.topic)
                    );
                }
                Err(ProduceError::Transient(reason)) => {
                    warn!(
                        topic = %self.topic,
                        attempt,
                        %reason,
                        "publish attempt failed, retrying after backoff"
                    );
                    counter!(
                        SNAPSHOT_EXPORT_PUBLISH_RETRIES_TOTAL,
                        TABLE_NAME_LABEL => self.table_schema.name.to_string()
                    )
                    .increment(1);
                }
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => {
                    info!(topic = %self.topic, attempt, "shutdown requested while retrying publish");
                    return Ok(SendOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.retry_backoff) => {}
            }

            if shutdown_rx.is_shutdown() {
                return Ok(SendOutcome::Cancelled);
            }
        }
    }

    /// Flushes and releases the underlying producer.
    pub async fn close(self) {
        self.producer.close().await;
    }
}
