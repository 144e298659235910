use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use snapshot_config::shared::KafkaConfig;
use tracing::{info, warn};

use crate::bail;
use crate::error::{ErrorKind, ExportResult};
use crate::export_error;
use crate::publisher::{HttpSchemaRegistry, LogDestination, LogProducer, ProduceError};

/// Upper bound for flushing outstanding messages when a producer is closed.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Kafka cluster with an optional schema registry.
#[derive(Clone)]
pub struct KafkaDestination {
    client_config: ClientConfig,
    message_timeout: Duration,
    registry: Option<HttpSchemaRegistry>,
}

impl std::fmt::Debug for KafkaDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaDestination")
            .field("message_timeout", &self.message_timeout)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl KafkaDestination {
    pub fn new(config: &KafkaConfig) -> ExportResult<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all");

        let registry = config
            .schema_registry_url
            .as_deref()
            .map(HttpSchemaRegistry::new)
            .transpose()?;

        Ok(Self {
            client_config,
            message_timeout: Duration::from_millis(config.message_timeout_ms),
            registry,
        })
    }
}

impl LogDestination for KafkaDestination {
    type Producer = KafkaProducer;

    fn name() -> &'static str {
        "kafka"
    }

    async fn create_producer(&self, topic: &str) -> ExportResult<Self::Producer> {
        let producer: FutureProducer = self.client_config.create().map_err(|err| {
            export_error!(
                ErrorKind::DestinationConnectionFailed,
                "Failed to create Kafka producer",
                topic,
                source: err
            )
        })?;

        info!(topic, "created kafka producer");

        Ok(KafkaProducer {
            producer,
            queue_timeout: self.message_timeout,
        })
    }

    async fn register_schema(&self, subject: &str, schema: &str) -> ExportResult<u32> {
        let Some(registry) = &self.registry else {
            bail!(
                ErrorKind::ConfigError,
                "Avro serialization requires a schema registry",
                subject
            );
        };

        registry.register(subject, schema).await
    }
}

/// Producer writing to a single Kafka topic.
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl LogProducer for KafkaProducer {
    async fn produce(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<(), ProduceError> {
        let mut record = FutureRecord::<[u8], [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        match self.producer.send(record, self.queue_timeout).await {
            Ok(_) => Ok(()),
            Err((err, _)) => Err(classify_error(err)),
        }
    }

    async fn close(self) {
        let producer = self.producer;
        let flushed = tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT)).await;

        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to flush kafka producer"),
            Err(err) => warn!(error = %err, "kafka producer flush task failed"),
        }
    }
}

/// Errors that cannot go away by producing the same message again are fatal.
fn classify_error(err: KafkaError) -> ProduceError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessageSize
            | RDKafkaErrorCode::InvalidMessage
            | RDKafkaErrorCode::InvalidRecord
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => ProduceError::Fatal(err.to_string()),
        _ => ProduceError::Transient(err.to_string()),
    }
}
