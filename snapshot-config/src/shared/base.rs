use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// Avro serialization needs a schema registry to register the value schema with.
    #[error("`kafka.schema_registry_url` must be set when `export.serialization` is `avro`")]
    MissingSchemaRegistryUrl,
}
