use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, ExportResult};
use crate::publisher::{LogDestination, LogProducer, ProduceError};

/// A message appended to the in-memory log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Failure injected into the produce attempts of a topic.
#[derive(Debug, Clone)]
enum InjectedFailure {
    /// The next `remaining` attempts fail transiently.
    Transient { remaining: usize },
    /// Every attempt fails transiently.
    AlwaysTransient,
    /// Every attempt fails fatally.
    Fatal,
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<PublishedMessage>,
    failures: HashMap<String, InjectedFailure>,
    produce_attempts: HashMap<String, usize>,
    producers_created: usize,
    producers_closed: usize,
    subjects: HashMap<String, (String, u32)>,
    next_schema_id: u32,
    failing_registry: bool,
}

/// In-memory message log with an embedded schema registry.
///
/// Failures can be injected per topic to exercise the retry and error paths of the
/// publisher.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message appended so far, in append order.
    pub async fn messages(&self) -> Vec<PublishedMessage> {
        let inner = self.inner.lock().await;
        inner.messages.clone()
    }

    /// Returns the messages appended to `topic`, in append order.
    pub async fn topic_messages(&self, topic: &str) -> Vec<PublishedMessage> {
        let inner = self.inner.lock().await;
        inner
            .messages
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Makes the next `attempts` produce attempts on `topic` fail transiently.
    pub async fn fail_transiently(&self, topic: &str, attempts: usize) {
        let mut inner = self.inner.lock().await;
        inner.failures.insert(
            topic.to_string(),
            InjectedFailure::Transient {
                remaining: attempts,
            },
        );
    }

    /// Makes every produce attempt on `topic` fail transiently.
    pub async fn fail_transiently_forever(&self, topic: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .failures
            .insert(topic.to_string(), InjectedFailure::AlwaysTransient);
    }

    /// Makes every produce attempt on `topic` fail fatally.
    pub async fn fail_fatally(&self, topic: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .failures
            .insert(topic.to_string(), InjectedFailure::Fatal);
    }

    /// Makes every schema registration fail.
    pub async fn fail_schema_registration(&self) {
        let mut inner = self.inner.lock().await;
        inner.failing_registry = true;
    }

    /// Number of produce attempts on `topic`, failed ones included.
    pub async fn produce_attempts(&self, topic: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.produce_attempts.get(topic).copied().unwrap_or(0)
    }

    pub async fn producers_created(&self) -> usize {
        self.inner.lock().await.producers_created
    }

    pub async fn producers_closed(&self) -> usize {
        self.inner.lock().await.producers_closed
    }

    /// Returns the registered schema and id of `subject`.
    pub async fn registered_schema(&self, subject: &str) -> Option<(String, u32)> {
        let inner = self.inner.lock().await;
        inner.subjects.get(subject).cloned()
    }
}

impl LogDestination for MemoryDestination {
    type Producer = MemoryProducer;

    fn name() -> &'static str {
        "memory"
    }

    async fn create_producer(&self, topic: &str) -> ExportResult<Self::Producer> {
        let mut inner = self.inner.lock().await;
        inner.producers_created += 1;

        info!(topic, "created memory producer");

        Ok(MemoryProducer {
            inner: self.inner.clone(),
        })
    }

    async fn register_schema(&self, subject: &str, schema: &str) -> ExportResult<u32> {
        let mut inner = self.inner.lock().await;
        if inner.failing_registry {
            bail!(
                ErrorKind::SchemaRegistryError,
                "Injected schema registration failure",
                subject
            );
        }

        if let Some((registered, id)) = inner.subjects.get(subject)
            && registered == schema
        {
            return Ok(*id);
        }

        inner.next_schema_id += 1;
        let id = inner.next_schema_id;
        inner
            .subjects
            .insert(subject.to_string(), (schema.to_string(), id));

        Ok(id)
    }
}

/// Producer appending to a [`MemoryDestination`].
#[derive(Debug)]
pub struct MemoryProducer {
    inner: Arc<Mutex<Inner>>,
}

impl LogProducer for MemoryProducer {
    async fn produce(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<(), ProduceError> {
        let mut inner = self.inner.lock().await;
        *inner.produce_attempts.entry(topic.to_string()).or_default() += 1;

        match inner.failures.get_mut(topic) {
            Some(InjectedFailure::Transient { remaining }) if *remaining > 0 => {
                *remaining -= 1;
                return Err(ProduceError::Transient(format!(
                    "injected transient failure on {topic}"
                )));
            }
            Some(InjectedFailure::AlwaysTransient) => {
                return Err(ProduceError::Transient(format!(
                    "injected transient failure on {topic}"
                )));
            }
            Some(InjectedFailure::Fatal) => {
                return Err(ProduceError::Fatal(format!(
                    "injected fatal failure on {topic}"
                )));
            }
            _ => {}
        }

        inner.messages.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.map(<[u8]>::to_vec),
            payload: payload.to_vec(),
        });

        Ok(())
    }

    async fn close(self) {
        let mut inner = self.inner.lock().await;
        inner.producers_closed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transient_failures_run_out() {
        let destination = MemoryDestination::new();
        destination.fail_transiently("orders", 2).await;
        let producer = destination.create_producer("orders").await.unwrap();

        assert!(matches!(
            producer.produce("orders", None, b"a").await,
            Err(ProduceError::Transient(_))
        ));
        assert!(producer.produce("orders", None, b"a").await.is_err());
        assert!(producer.produce("orders", Some(b"1"), b"a").await.is_ok());

        assert_eq!(destination.produce_attempts("orders").await, 3);
        assert_eq!(
            destination.messages().await,
            vec![PublishedMessage {
                topic: "orders".to_string(),
                key: Some(b"1".to_vec()),
                payload: b"a".to_vec(),
            }]
        );
    }

    #[tokio::test]
    async fn identical_schema_keeps_its_id() {
        let destination = MemoryDestination::new();

        let first = destination.register_schema("orders-value", "{}").await.unwrap();
        let again = destination.register_schema("orders-value", "{}").await.unwrap();
        let changed = destination
            .register_schema("orders-value", r#"{"type":"string"}"#)
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first, changed);
    }
}
