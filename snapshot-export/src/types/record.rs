use std::fmt;

use crate::types::{Cell, PrimaryKeyValue};

/// Identifier of an export run; checkpoints are scoped to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ExecutionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Values of one row, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }
}

/// A row together with its primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub key: PrimaryKeyValue,
    pub row: TableRow,
}

impl RowRecord {
    pub fn new(key: PrimaryKeyValue, row: TableRow) -> Self {
        Self { key, row }
    }
}

/// One page of rows in ascending primary key order.
#[derive(Debug, Clone, PartialEq)]
pub struct FullLoadBatch {
    pub records: Vec<RowRecord>,
    /// Key of the last record, [`None`] for an empty page.
    pub last_row_key: Option<PrimaryKeyValue>,
}

impl FullLoadBatch {
    pub fn new(records: Vec<RowRecord>) -> Self {
        let last_row_key = records.last().map(|record| record.key.clone());
        Self {
            records,
            last_row_key,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// A page holding fewer rows than requested is the last one of the table.
    pub fn is_last_page(&self, page_size: usize) -> bool {
        self.records.len() < page_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
        }
    }
}

/// Record published to the log for every exported row.
///
/// Full-load records carry a synthetic sequence instead of a log position; it is rendered
/// zero-padded so that string order and numeric order agree.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub change_key: PrimaryKeyValue,
    pub change_type: ChangeType,
    pub lsn: String,
    pub seq_val: String,
    pub data: TableRow,
}

impl ChangeRecord {
    /// Builds the insertion record for the `sequence`-th row published in this run.
    pub fn insert(key: PrimaryKeyValue, row: TableRow, sequence: u64) -> Self {
        let rendered = format!("{sequence:020}");
        Self {
            change_key: key,
            change_type: ChangeType::Insert,
            lsn: rendered.clone(),
            seq_val: rendered,
            data: row,
        }
    }
}

/// Outcome of looking up a table's checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetState {
    NoStoredState,
    Stored(PrimaryKeyValue),
}
