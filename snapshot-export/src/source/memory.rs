use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, ExportResult};
use crate::source::FullLoadSource;
use crate::types::{
    FullLoadBatch, PrimaryKeyValue, RowRecord, TableName, TableRow, TableSchema,
};

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    rows: BTreeMap<PrimaryKeyValue, TableRow>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableName, MemoryTable>,
    failing_schema_lookups: HashSet<TableName>,
    /// Number of page fetches allowed to succeed before every further fetch fails.
    page_budgets: HashMap<TableName, usize>,
    page_requests: HashMap<TableName, Vec<Option<PrimaryKeyValue>>>,
}

impl Inner {
    fn table(&self, name: &TableName) -> ExportResult<&MemoryTable> {
        match self.tables.get(name) {
            Some(table) => Ok(table),
            None => bail!(
                ErrorKind::MissingTableSchema,
                "Table not found in memory source",
                name.to_string()
            ),
        }
    }

    fn record_page_request(
        &mut self,
        name: &TableName,
        after: Option<&PrimaryKeyValue>,
    ) -> ExportResult<()> {
        self.page_requests
            .entry(name.clone())
            .or_default()
            .push(after.cloned());

        if let Some(budget) = self.page_budgets.get_mut(name) {
            if *budget == 0 {
                bail!(
                    ErrorKind::SourceQueryFailed,
                    "Injected page fetch failure",
                    name.to_string()
                );
            }
            *budget -= 1;
        }

        Ok(())
    }

    fn page(
        &self,
        name: &TableName,
        lower: Bound<&PrimaryKeyValue>,
        page_size: usize,
    ) -> ExportResult<FullLoadBatch> {
        let table = self.table(name)?;
        let records = table
            .rows
            .range::<PrimaryKeyValue, _>((lower, Bound::Unbounded))
            .take(page_size)
            .map(|(key, row)| RowRecord::new(key.clone(), row.clone()))
            .collect();

        Ok(FullLoadBatch::new(records))
    }
}

/// In-memory table source.
///
/// Rows are kept ordered by primary key. Failures can be injected per table to exercise
/// error paths of the exporter.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table with its rows, replacing any table of the same name.
    pub async fn add_table(&self, schema: TableSchema, rows: Vec<TableRow>) -> ExportResult<()> {
        let mut keyed_rows = BTreeMap::new();
        for row in rows {
            let key = schema.key_of(&row)?;
            if keyed_rows.insert(key.clone(), row).is_some() {
                bail!(
                    ErrorKind::InvalidData,
                    "Duplicate primary key in memory table",
                    format!("{}: {key}", schema.name)
                );
            }
        }

        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            schema.name.clone(),
            MemoryTable {
                schema,
                rows: keyed_rows,
            },
        );

        Ok(())
    }

    /// Makes every schema lookup of `table` fail.
    pub async fn fail_schema_lookup(&self, table: TableName) {
        let mut inner = self.inner.lock().await;
        inner.failing_schema_lookups.insert(table);
    }

    /// Lets `pages` page fetches of `table` succeed and fails every later one.
    pub async fn fail_pages_after(&self, table: TableName, pages: usize) {
        let mut inner = self.inner.lock().await;
        inner.page_budgets.insert(table, pages);
    }

    /// Returns the cursor of every page fetch of `table`, [`None`] for first-page fetches.
    pub async fn page_requests(&self, table: &TableName) -> Vec<Option<PrimaryKeyValue>> {
        let inner = self.inner.lock().await;
        inner.page_requests.get(table).cloned().unwrap_or_default()
    }
}

impl FullLoadSource for MemorySource {
    async fn get_table_schema(&self, table: &TableName) -> ExportResult<TableSchema> {
        let inner = self.inner.lock().await;
        if inner.failing_schema_lookups.contains(table) {
            bail!(
                ErrorKind::SourceSchemaError,
                "Injected schema lookup failure",
                table.to_string()
            );
        }

        Ok(inner.table(table)?.schema.clone())
    }

    async fn get_row_count(&self, schema: &TableSchema) -> ExportResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.table(&schema.name)?.rows.len() as u64)
    }

    async fn get_first_batch(
        &self,
        schema: &TableSchema,
        page_size: usize,
    ) -> ExportResult<FullLoadBatch> {
        let mut inner = self.inner.lock().await;
        inner.record_page_request(&schema.name, None)?;
        inner.page(&schema.name, Bound::Unbounded, page_size)
    }

    async fn get_batch(
        &self,
        schema: &TableSchema,
        after: &PrimaryKeyValue,
        page_size: usize,
    ) -> ExportResult<FullLoadBatch> {
        let mut inner = self.inner.lock().await;
        inner.record_page_request(&schema.name, Some(after))?;
        inner.page(&schema.name, Bound::Excluded(after), page_size)
    }
}
