use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::shared::ValidationError;

/// Session settings applied to every Postgres connection so values render consistently.
pub struct DefaultPgConnectionOptions;

impl DefaultPgConnectionOptions {
    /// Returns the session settings as key-value pairs suitable for sqlx.
    pub fn to_key_value_pairs() -> Vec<(String, String)> {
        vec![
            ("datestyle".to_string(), "ISO".to_string()),
            ("intervalstyle".to_string(), "postgres".to_string()),
            ("extra_float_digits".to_string(), "3".to_string()),
            ("client_encoding".to_string(), "UTF8".to_string()),
        ]
    }
}

/// Connection parameters of the source database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Name of the database holding the exported tables.
    pub name: String,
    pub username: String,
    /// Redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub tls: TlsConfig,
}

/// TLS settings for Postgres connections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts [`PgConnectionConfig`] into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options targeting the server without selecting a database.
    fn without_db(&self) -> Output;

    /// Options targeting the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<PgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .username(&self.username)
            .port(self.port)
            .ssl_mode(ssl_mode)
            .options(DefaultPgConnectionOptions::to_key_value_pairs());

        if self.tls.enabled {
            options = options.ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes());
        }

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> PgConnectOptions {
        let options: PgConnectOptions = self.without_db();
        options.database(&self.name)
    }
}
