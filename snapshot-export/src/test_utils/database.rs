use snapshot_config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

use crate::types::TableName;

/// Schema holding the tables created by tests.
pub const TEST_DATABASE_SCHEMA: &str = "test";

/// Creates a [`TableName`] in the test schema.
pub fn test_table_name(name: &str) -> TableName {
    TableName::new(TEST_DATABASE_SCHEMA, name)
}

/// Generates the connection configuration of a uniquely named test database.
///
/// Configuration is read from environment variables:
/// - `TESTS_DATABASE_HOST`: Postgres server hostname (required)
/// - `TESTS_DATABASE_PORT`: Postgres server port (required)
/// - `TESTS_DATABASE_USERNAME`: Database user (required)
/// - `TESTS_DATABASE_PASSWORD`: Database password (optional)
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
    }
}

/// An isolated database that lives for the duration of a test.
#[derive(Debug)]
pub struct TestDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Creates a new database with the test schema in it.
    ///
    /// # Panics
    /// Panics if the database or the schema cannot be created.
    pub async fn spawn() -> Self {
        let config = local_pg_connection_config();
        let pool = create_pg_database(&config).await;

        pool.execute(&*format!("create schema {TEST_DATABASE_SCHEMA}"))
            .await
            .expect("Failed to create test schema");

        Self { config, pool }
    }

    /// Runs `sql` as a simple query, which may hold several statements.
    ///
    /// # Panics
    /// Panics if any statement fails.
    pub async fn run(&self, sql: &str) {
        self.pool
            .execute(sql)
            .await
            .expect("Failed to run test statement");
    }

    /// Closes the pool and drops the database.
    pub async fn cleanup(self) {
        self.pool.close().await;
        drop_pg_database(&self.config).await;
    }
}

/// Creates a new Postgres database and returns a connection pool to it.
///
/// # Panics
/// Panics if connection or database creation fails.
pub async fn create_pg_database(config: &PgConnectionConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"create database "{}";"#, config.name))
        .await
        .expect("Failed to create database");

    PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres")
}

/// Terminates the connections to a Postgres database and drops it.
///
/// Failures are reported on stderr so cleanup never fails a test.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = match PgConnection::connect_with(&config.without_db()).await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("warning: failed to connect to Postgres for cleanup: {e}");
            return;
        }
    };

    if let Err(e) = connection
        .execute(&*format!(
            r#"
            select pg_terminate_backend(pg_stat_activity.pid)
            from pg_stat_activity
            where pg_stat_activity.datname = '{}'
            and pid <> pg_backend_pid();"#,
            config.name
        ))
        .await
    {
        eprintln!(
            "warning: failed to terminate connections for database {}: {}",
            config.name, e
        );
    }

    if let Err(e) = connection
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name))
        .await
    {
        eprintln!("warning: failed to drop database {}: {}", config.name, e);
    }
}
