use std::future::Future;

use crate::error::ExportResult;
use crate::types::{FullLoadBatch, PrimaryKeyValue, TableName, TableSchema};

/// Read access to the tables being exported.
///
/// Pages are returned in ascending primary key order. A page holding fewer rows than
/// requested, including an empty one, is the last page of the table.
pub trait FullLoadSource {
    /// Resolves the column layout and primary key of `table`.
    ///
    /// Fails for unknown tables and for tables without a usable primary key.
    fn get_table_schema(
        &self,
        table: &TableName,
    ) -> impl Future<Output = ExportResult<TableSchema>> + Send;

    /// Returns the number of rows of the table, used only to report progress.
    fn get_row_count(&self, schema: &TableSchema) -> impl Future<Output = ExportResult<u64>> + Send;

    /// Returns the first `page_size` rows of the table.
    fn get_first_batch(
        &self,
        schema: &TableSchema,
        page_size: usize,
    ) -> impl Future<Output = ExportResult<FullLoadBatch>> + Send;

    /// Returns up to `page_size` rows whose key is strictly greater than `after`.
    fn get_batch(
        &self,
        schema: &TableSchema,
        after: &PrimaryKeyValue,
        page_size: usize,
    ) -> impl Future<Output = ExportResult<FullLoadBatch>> + Send;
}
