use serde::Deserialize;

use crate::Config;
use crate::shared::{
    ExportConfig, KafkaConfig, PgConnectionConfig, SerializationMode, StateStoreConfig,
    ValidationError,
};

/// Complete configuration of the exporter process.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExporterConfig {
    pub export: ExportConfig,
    /// Database the tables are read from.
    pub source: PgConnectionConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub state_store: StateStoreConfig,
}

impl ExporterConfig {
    /// Validates every section and the constraints spanning sections.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.export.validate()?;
        self.source.tls.validate()?;
        self.kafka.validate()?;

        if self.export.serialization == SerializationMode::Avro
            && self.kafka.schema_registry_url.is_none()
        {
            return Err(ValidationError::MissingSchemaRegistryUrl);
        }

        Ok(())
    }
}

impl Config for ExporterConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["export.tables"];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_json(serialization: &str, registry: Option<&str>) -> String {
        let registry = registry
            .map(|url| format!(r#", "schema_registry_url": "{url}""#))
            .unwrap_or_default();

        format!(
            r#"{{
                "export": {{"execution_id": "run-1", "tables": ["orders"], "serialization": "{serialization}"}},
                "source": {{"host": "localhost", "port": 5432, "name": "shop", "username": "exporter"}},
                "kafka": {{"bootstrap_servers": "localhost:9092"{registry}}}
            }}"#
        )
    }

    #[test]
    fn avro_requires_schema_registry() {
        let config: ExporterConfig = serde_json::from_str(&config_json("avro", None)).unwrap();

        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingSchemaRegistryUrl)
        ));
    }

    #[test]
    fn avro_with_schema_registry_is_valid() {
        let config: ExporterConfig =
            serde_json::from_str(&config_json("avro", Some("http://localhost:8081"))).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.state_store, StateStoreConfig::Memory);
    }
}
