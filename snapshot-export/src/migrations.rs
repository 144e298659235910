use snapshot_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::ExportResult;

/// Applies the checkpoint store migrations in the `snapshot_export` schema.
///
/// The schema is created first and used as `search_path` so that the migration bookkeeping
/// table of `sqlx` lives next to the checkpoints instead of in `public`.
pub async fn apply_offset_store_migrations(connection_config: &PgConnectionConfig) -> ExportResult<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists snapshot_export;")
                    .await?;
                conn.execute("set search_path = 'snapshot_export';").await?;

                Ok(())
            })
        })
        .connect_with(connection_config.with_db())
        .await?;

    info!("applying checkpoint store migrations");

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("checkpoint store migrations applied");

    Ok(())
}
