use snapshot_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

use crate::error::ExportResult;
use crate::store::OffsetStore;
use crate::types::{ExecutionId, OffsetState, PrimaryKeyValue, TableName};

/// Checkpoint writes are short single-row upserts, one connection per store suffices.
const NUM_POOL_CONNECTIONS: u32 = 1;

/// Checkpoint store backed by the `snapshot_export.full_load_offsets` table.
///
/// Keys are stored as `jsonb` in their serde representation so composite keys of any
/// supported column types round trip exactly.
#[derive(Debug, Clone)]
pub struct PostgresOffsetStore {
    pool: PgPool,
}

impl PostgresOffsetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database holding the checkpoint table.
    ///
    /// The schema is created by [`crate::migrations::apply_offset_store_migrations`].
    pub async fn connect(config: &PgConnectionConfig) -> ExportResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .connect_with(config.with_db())
            .await?;

        Ok(Self::new(pool))
    }
}

impl OffsetStore for PostgresOffsetStore {
    async fn get_last_checkpoint(
        &self,
        execution_id: &ExecutionId,
        table: &TableName,
    ) -> ExportResult<OffsetState> {
        let last_key: Option<serde_json::Value> = sqlx::query_scalar(
            r#"
            select last_key
            from snapshot_export.full_load_offsets
            where execution_id = $1 and table_name = $2
            "#,
        )
        .bind(execution_id.as_str())
        .bind(table.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let state = match last_key {
            Some(value) => OffsetState::Stored(serde_json::from_value(value)?),
            None => OffsetState::NoStoredState,
        };

        Ok(state)
    }

    async fn store_checkpoint(
        &self,
        execution_id: &ExecutionId,
        table: &TableName,
        key: &PrimaryKeyValue,
    ) -> ExportResult<()> {
        let last_key = serde_json::to_value(key)?;

        sqlx::query(
            r#"
            insert into snapshot_export.full_load_offsets (execution_id, table_name, last_key)
            values ($1, $2, $3)
            on conflict (execution_id, table_name)
            do update set last_key = excluded.last_key, updated_at = now()
            "#,
        )
        .bind(execution_id.as_str())
        .bind(table.to_string())
        .bind(last_key)
        .execute(&self.pool)
        .await?;

        debug!(%execution_id, %table, %key, "stored checkpoint");

        Ok(())
    }
}
