use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Connection settings for the message log and its schema registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KafkaConfig {
    /// Comma separated `host:port` list handed to the producer.
    pub bootstrap_servers: String,
    /// Base url of the schema registry, required for Avro serialization.
    #[serde(default)]
    pub schema_registry_url: Option<String>,
    /// Upper bound, in milliseconds, for a single produce attempt before it is reported as failed.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl KafkaConfig {
    pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 5000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "kafka.bootstrap_servers".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.message_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "kafka.message_timeout_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_message_timeout_ms() -> u64 {
    KafkaConfig::DEFAULT_MESSAGE_TIMEOUT_MS
}
