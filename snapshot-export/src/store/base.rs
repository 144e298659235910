use std::future::Future;

use crate::error::ExportResult;
use crate::types::{ExecutionId, OffsetState, PrimaryKeyValue, TableName};

/// Durable record of the last primary key published per execution and table.
///
/// A stored key means every row up to and including it has been delivered to the log.
/// Implementations must make a successful [`OffsetStore::store_checkpoint`] visible to later
/// lookups, including lookups from a restarted process.
pub trait OffsetStore {
    /// Returns the checkpoint of `table` for `execution_id`, if any.
    fn get_last_checkpoint(
        &self,
        execution_id: &ExecutionId,
        table: &TableName,
    ) -> impl Future<Output = ExportResult<OffsetState>> + Send;

    /// Replaces the checkpoint of `table` for `execution_id` with `key`.
    fn store_checkpoint(
        &self,
        execution_id: &ExecutionId,
        table: &TableName,
        key: &PrimaryKeyValue,
    ) -> impl Future<Output = ExportResult<()>> + Send;
}
