//! Data model of a full-load export.

mod cell;
mod key;
mod record;
mod schema;

pub use cell::{Cell, ColumnType};
pub use key::{KeyCell, PrimaryKeyValue};
pub use record::{
    ChangeRecord, ChangeType, ExecutionId, FullLoadBatch, OffsetState, RowRecord, TableRow,
};
pub use schema::{ColumnSchema, DEFAULT_SCHEMA, TableName, TableSchema};
