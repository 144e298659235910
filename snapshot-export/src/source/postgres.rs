use pg_escape::quote_identifier;
use snapshot_config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, ExportResult};
use crate::source::FullLoadSource;
use crate::types::{
    Cell, ColumnSchema, ColumnType, FullLoadBatch, KeyCell, PrimaryKeyValue, RowRecord,
    TableName, TableRow, TableSchema,
};

/// Postgres types accepted as primary key columns; comparisons and ordering on them are
/// performed by the database.
const KEY_TYPE_NAMES: &[&str] = &[
    "int2",
    "int4",
    "int8",
    "text",
    "varchar",
    "bpchar",
    "bytea",
    "date",
    "timestamp",
    "timestamptz",
    "uuid",
];

/// Columns of a table with their 1-based primary key position, 0 for non-key columns.
///
/// `int2vector` arrays are subscripted from 0, so the position is rebased on the array's
/// lower bound.
const TABLE_COLUMNS_QUERY: &str = r#"
select a.attname::text as column_name,
       t.typname::text as type_name,
       not a.attnotnull as nullable,
       coalesce(
           array_position(i.indkey::int2[], a.attnum) + 1 - array_lower(i.indkey::int2[], 1),
           0
       )::int4 as key_position
from pg_catalog.pg_attribute a
join pg_catalog.pg_class c on c.oid = a.attrelid
join pg_catalog.pg_namespace n on n.oid = c.relnamespace
join pg_catalog.pg_type t on t.oid = a.atttypid
left join pg_catalog.pg_index i on i.indrelid = c.oid and i.indisprimary
where n.nspname = $1
  and c.relname = $2
  and a.attnum > 0
  and not a.attisdropped
order by a.attnum
"#;

/// Reads source tables from Postgres using keyset pagination on the primary key.
#[derive(Debug, Clone)]
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the source database with a pool sized for `max_connections` concurrent
    /// table exports.
    pub async fn connect(
        config: &PgConnectionConfig,
        max_connections: u32,
    ) -> ExportResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(config.with_db())
            .await?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_page(
        &self,
        schema: &TableSchema,
        after: Option<&PrimaryKeyValue>,
        page_size: usize,
    ) -> ExportResult<FullLoadBatch> {
        let sql = page_query(schema, after.is_some());
        let mut query: Query<'_, Postgres, PgArguments> = sqlx::query(&sql);
        if let Some(after) = after {
            for cell in after.cells() {
                query = bind_key_cell(query, cell);
            }
        }
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let table_row = decode_row(schema, row)?;
            let key = schema.key_of(&table_row)?;
            records.push(RowRecord::new(key, table_row));
        }

        debug!(table = %schema.name, rows = records.len(), "fetched page");

        Ok(FullLoadBatch::new(records))
    }
}

impl FullLoadSource for PgSource {
    async fn get_table_schema(&self, table: &TableName) -> ExportResult<TableSchema> {
        let rows = sqlx::query(TABLE_COLUMNS_QUERY)
            .bind(&table.schema)
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            bail!(
                ErrorKind::MissingTableSchema,
                "Table not found in source database",
                table.to_string()
            );
        }

        let mut column_schemas = Vec::with_capacity(rows.len());
        let mut key_positions = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            let column_name: String = row.try_get("column_name")?;
            let type_name: String = row.try_get("type_name")?;
            let nullable: bool = row.try_get("nullable")?;
            let key_position: i32 = row.try_get("key_position")?;

            if key_position > 0 {
                if !KEY_TYPE_NAMES.contains(&type_name.as_str()) {
                    bail!(
                        ErrorKind::UnsupportedPrimaryKey,
                        "Primary key column type cannot be used for keyset pagination",
                        format!("{table}.{column_name} has type {type_name}")
                    );
                }
                key_positions.push((key_position, index));
            }

            column_schemas.push(ColumnSchema::new(
                column_name,
                ColumnType::from_pg_type_name(&type_name),
                nullable,
            ));
        }

        key_positions.sort_unstable();
        let primary_key = key_positions.into_iter().map(|(_, index)| index).collect();

        TableSchema::new(table.clone(), column_schemas, primary_key)
    }

    async fn get_row_count(&self, schema: &TableSchema) -> ExportResult<u64> {
        let sql = format!("select count(*) from {}", qualified_name(&schema.name));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn get_first_batch(
        &self,
        schema: &TableSchema,
        page_size: usize,
    ) -> ExportResult<FullLoadBatch> {
        self.fetch_page(schema, None, page_size).await
    }

    async fn get_batch(
        &self,
        schema: &TableSchema,
        after: &PrimaryKeyValue,
        page_size: usize,
    ) -> ExportResult<FullLoadBatch> {
        self.fetch_page(schema, Some(after), page_size).await
    }
}

fn qualified_name(table: &TableName) -> String {
    format!(
        "{}.{}",
        quote_identifier(&table.schema),
        quote_identifier(&table.name)
    )
}

/// Builds the page query; the cursor occupies the first parameters and the limit the last.
fn page_query(schema: &TableSchema, with_cursor: bool) -> String {
    let select_list = schema
        .column_schemas
        .iter()
        .map(select_expression)
        .collect::<Vec<_>>()
        .join(", ");
    let key_list = schema
        .primary_key_columns()
        .map(|column| quote_identifier(&column.name).into_owned())
        .collect::<Vec<_>>()
        .join(", ");
    let key_len = schema.primary_key.len();

    let mut sql = format!(
        "select {select_list} from {}",
        qualified_name(&schema.name)
    );
    let limit_param = if with_cursor {
        let params = (1..=key_len)
            .map(|index| format!("${index}"))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" where ({key_list}) > ({params})"));
        key_len + 1
    } else {
        1
    };
    sql.push_str(&format!(" order by {key_list} limit ${limit_param}"));

    sql
}

/// Numeric values and types without a dedicated mapping are read as text.
fn select_expression(column: &ColumnSchema) -> String {
    let ident = quote_identifier(&column.name);
    match column.typ {
        ColumnType::Numeric | ColumnType::Text => format!("{ident}::text"),
        _ => ident.into_owned(),
    }
}

fn bind_key_cell<'q>(
    query: Query<'q, Postgres, PgArguments>,
    cell: &KeyCell,
) -> Query<'q, Postgres, PgArguments> {
    match cell {
        KeyCell::Int(value) => query.bind(*value),
        KeyCell::String(value) => query.bind(value.clone()),
        KeyCell::Uuid(value) => query.bind(*value),
        KeyCell::Date(value) => query.bind(*value),
        KeyCell::Timestamp(value) => query.bind(*value),
        KeyCell::TimestampTz(value) => query.bind(*value),
        KeyCell::Bytes(value) => query.bind(value.clone()),
    }
}

fn decode_row(schema: &TableSchema, row: &PgRow) -> ExportResult<TableRow> {
    let mut values = Vec::with_capacity(schema.column_schemas.len());
    for (index, column) in schema.column_schemas.iter().enumerate() {
        values.push(decode_cell(row, index, column.typ)?);
    }

    Ok(TableRow::new(values))
}

fn decode_cell(row: &PgRow, index: usize, typ: ColumnType) -> ExportResult<Cell> {
    let cell = match typ {
        ColumnType::Bool => row.try_get::<Option<bool>, _>(index)?.map(Cell::Bool),
        ColumnType::Int2 => row.try_get::<Option<i16>, _>(index)?.map(Cell::I16),
        ColumnType::Int4 => row.try_get::<Option<i32>, _>(index)?.map(Cell::I32),
        ColumnType::Int8 => row.try_get::<Option<i64>, _>(index)?.map(Cell::I64),
        ColumnType::Float4 => row.try_get::<Option<f32>, _>(index)?.map(Cell::F32),
        ColumnType::Float8 => row.try_get::<Option<f64>, _>(index)?.map(Cell::F64),
        ColumnType::Numeric => row.try_get::<Option<String>, _>(index)?.map(Cell::Numeric),
        ColumnType::Text => row.try_get::<Option<String>, _>(index)?.map(Cell::String),
        ColumnType::Bytea => row.try_get::<Option<Vec<u8>>, _>(index)?.map(Cell::Bytes),
        ColumnType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)?
            .map(Cell::Date),
        ColumnType::Time => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)?
            .map(Cell::Time),
        ColumnType::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)?
            .map(Cell::Timestamp),
        ColumnType::TimestampTz => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)?
            .map(Cell::TimestampTz),
        ColumnType::Uuid => row.try_get::<Option<uuid::Uuid>, _>(index)?.map(Cell::Uuid),
        ColumnType::Json => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(Cell::Json),
    };

    Ok(cell.unwrap_or(Cell::Null))
}
