use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ErrorKind, ExportResult};
use crate::export_error;

const SCHEMA_REGISTRY_CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct RegisterSchemaRequest<'a> {
    schema: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterSchemaResponse {
    id: u32,
}

/// Client of a Confluent compatible schema registry.
#[derive(Debug, Clone)]
pub struct HttpSchemaRegistry {
    client: Client,
    base_url: String,
}

impl HttpSchemaRegistry {
    pub fn new(base_url: impl Into<String>) -> ExportResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    /// Registers `schema` as a new version of `subject` and returns its global id.
    pub async fn register(&self, subject: &str, schema: &str) -> ExportResult<u32> {
        let url = format!("{}/subjects/{subject}/versions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, SCHEMA_REGISTRY_CONTENT_TYPE)
            .json(&RegisterSchemaRequest { schema })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(export_error!(
                ErrorKind::SchemaRegistryError,
                "Schema registry rejected the schema",
                format!("{subject}: {status} {body}")
            ));
        }

        let RegisterSchemaResponse { id } = response.json().await?;
        debug!(subject, id, "registered schema");

        Ok(id)
    }
}
