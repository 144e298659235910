use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Wire encoding of published change records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationMode {
    /// Self-describing JSON documents.
    #[default]
    Json,
    /// Avro datums framed with a schema registry id.
    Avro,
}

impl fmt::Display for SerializationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationMode::Json => f.write_str("json"),
            SerializationMode::Avro => f.write_str("avro"),
        }
    }
}

/// Settings of one full-load run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportConfig {
    /// Identifies the run; checkpoints are scoped to it so a rerun with the same id resumes.
    pub execution_id: String,
    /// Tables to export, as `schema.table` or `table`.
    pub tables: Vec<String>,
    /// Prepended to the lowercased table name to form the destination topic.
    #[serde(default)]
    pub topic_prefix: String,
    #[serde(default)]
    pub serialization: SerializationMode,
    /// Whether records carry the rendered primary key as message key.
    #[serde(default)]
    pub send_with_key: bool,
    /// Rows fetched per page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Progress is reported only at multiples of this percentage.
    #[serde(default = "default_progress_interval_percent")]
    pub progress_interval_percent: u8,
    /// Pause between attempts to publish a record after a transient failure.
    #[serde(default = "default_publish_retry_backoff_ms")]
    pub publish_retry_backoff_ms: u64,
}

impl ExportConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    pub const DEFAULT_PROGRESS_INTERVAL_PERCENT: u8 = 10;

    pub const DEFAULT_PUBLISH_RETRY_BACKOFF_MS: u64 = 100;

    /// Creates a configuration with defaults for every optional setting.
    pub fn new(execution_id: impl Into<String>, tables: Vec<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            tables,
            topic_prefix: String::new(),
            serialization: SerializationMode::default(),
            send_with_key: false,
            batch_size: default_batch_size(),
            progress_interval_percent: default_progress_interval_percent(),
            publish_retry_backoff_ms: default_publish_retry_backoff_ms(),
        }
    }

    /// Validates export settings.
    ///
    /// Ensures an execution id and at least one table are present and that the batch size
    /// and progress interval are usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.execution_id.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "export.execution_id".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.tables.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "export.tables".to_string(),
                constraint: "must contain at least one table".to_string(),
            });
        }

        if let Some(table) = self.tables.iter().find(|table| table.trim().is_empty()) {
            return Err(ValidationError::InvalidFieldValue {
                field: "export.tables".to_string(),
                constraint: format!("table name `{table}` must not be blank"),
            });
        }

        if self.batch_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "export.batch_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.progress_interval_percent == 0 || self.progress_interval_percent > 100 {
            return Err(ValidationError::InvalidFieldValue {
                field: "export.progress_interval_percent".to_string(),
                constraint: "must be between 1 and 100".to_string(),
            });
        }

        Ok(())
    }
}

fn default_batch_size() -> usize {
    ExportConfig::DEFAULT_BATCH_SIZE
}

fn default_progress_interval_percent() -> u8 {
    ExportConfig::DEFAULT_PROGRESS_INTERVAL_PERCENT
}

fn default_publish_retry_backoff_ms() -> u64 {
    ExportConfig::DEFAULT_PUBLISH_RETRY_BACKOFF_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_when_deserializing() {
        let config: ExportConfig = serde_json::from_str(
            r#"{"execution_id": "run-1", "tables": ["public.orders"]}"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, ExportConfig::DEFAULT_BATCH_SIZE);
        assert_eq!(config.progress_interval_percent, 10);
        assert_eq!(config.publish_retry_backoff_ms, 100);
        assert_eq!(config.serialization, SerializationMode::Json);
        assert!(!config.send_with_key);
        assert!(config.topic_prefix.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_progress_interval_is_rejected() {
        let mut config = ExportConfig::new("run-1", vec!["orders".to_string()]);
        config.progress_interval_percent = 0;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "export.progress_interval_percent"
        ));
    }

    #[test]
    fn empty_table_list_is_rejected() {
        let config = ExportConfig::new("run-1", vec![]);

        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = ExportConfig::new("run-1", vec!["orders".to_string()]);
        config.batch_size = 0;

        assert!(config.validate().is_err());
    }
}
