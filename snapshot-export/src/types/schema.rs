use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, ExportResult};
use crate::types::{ColumnType, KeyCell, PrimaryKeyValue, TableRow};

/// Schema assumed for table names given without one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Fully qualified name of a source table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parses `schema.table` or `table`, the latter resolving to [`DEFAULT_SCHEMA`].
    pub fn parse(value: &str) -> Self {
        match value.trim().split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::new(DEFAULT_SCHEMA, value.trim()),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            typ,
            nullable,
        }
    }
}

/// Column layout and primary key of a table.
///
/// Fetched once per table export and shared read-only for its whole duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: TableName,
    pub column_schemas: Vec<ColumnSchema>,
    /// Indices into `column_schemas`, in key order.
    pub primary_key: Vec<usize>,
}

impl TableSchema {
    /// Creates a schema, rejecting tables whose primary key cannot serve as a cursor.
    pub fn new(
        name: TableName,
        column_schemas: Vec<ColumnSchema>,
        primary_key: Vec<usize>,
    ) -> ExportResult<Self> {
        if primary_key.is_empty() {
            bail!(
                ErrorKind::SourceSchemaError,
                "Table has no primary key",
                name.to_string()
            );
        }

        for &index in &primary_key {
            let Some(column) = column_schemas.get(index) else {
                bail!(
                    ErrorKind::SourceSchemaError,
                    "Primary key references an unknown column",
                    format!("{name}: column index {index}")
                );
            };

            if !column.typ.is_key_compatible() {
                bail!(
                    ErrorKind::UnsupportedPrimaryKey,
                    "Primary key column type cannot be used for keyset pagination",
                    format!("{name}.{} has type {:?}", column.name, column.typ)
                );
            }
        }

        Ok(Self {
            name,
            column_schemas,
            primary_key,
        })
    }

    /// Returns the primary key columns in key order.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.primary_key
            .iter()
            .map(|&index| &self.column_schemas[index])
    }

    /// Extracts the primary key of `row`.
    pub fn key_of(&self, row: &TableRow) -> ExportResult<PrimaryKeyValue> {
        let mut cells = Vec::with_capacity(self.primary_key.len());
        for &index in &self.primary_key {
            let Some(cell) = row.values.get(index) else {
                bail!(
                    ErrorKind::InvalidData,
                    "Row is missing a primary key column",
                    format!("{}: column index {index}", self.name)
                );
            };
            cells.push(KeyCell::try_from(cell)?);
        }

        Ok(PrimaryKeyValue::new(cells))
    }
}
