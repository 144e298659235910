use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, ExportError, ExportResult};
use crate::types::Cell;

/// One component of a primary key.
///
/// Integer widths are unified so that a key read from an `int4` column compares equal to the
/// same key restored from a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum KeyCell {
    Int(i64),
    String(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl fmt::Display for KeyCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyCell::Int(value) => write!(f, "{value}"),
            KeyCell::String(value) => {
                for ch in value.chars() {
                    if matches!(ch, '\\' | ',') {
                        f.write_str("\\")?;
                    }
                    write!(f, "{ch}")?;
                }
                Ok(())
            }
            KeyCell::Uuid(value) => write!(f, "{value}"),
            KeyCell::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            KeyCell::Timestamp(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S%.f")),
            KeyCell::TimestampTz(value) => write!(f, "{}", value.to_rfc3339()),
            KeyCell::Bytes(value) => {
                f.write_str("\\x")?;
                for byte in value {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl TryFrom<&Cell> for KeyCell {
    type Error = ExportError;

    fn try_from(cell: &Cell) -> ExportResult<KeyCell> {
        let key_cell = match cell {
            Cell::I16(value) => KeyCell::Int(i64::from(*value)),
            Cell::I32(value) => KeyCell::Int(i64::from(*value)),
            Cell::I64(value) => KeyCell::Int(*value),
            Cell::String(value) => KeyCell::String(value.clone()),
            Cell::Uuid(value) => KeyCell::Uuid(*value),
            Cell::Date(value) => KeyCell::Date(*value),
            Cell::Timestamp(value) => KeyCell::Timestamp(*value),
            Cell::TimestampTz(value) => KeyCell::TimestampTz(*value),
            Cell::Bytes(value) => KeyCell::Bytes(value.clone()),
            Cell::Null => bail!(ErrorKind::InvalidData, "Primary key column is null"),
            other => bail!(
                ErrorKind::UnsupportedPrimaryKey,
                "Value cannot be used as a primary key component",
                format!("{other:?}")
            ),
        };

        Ok(key_cell)
    }
}

/// Composite primary key of a row, ordered like `ORDER BY pk1, pk2, ...`.
///
/// Rendered as its components joined by `,`; that rendering is the change key of published
/// records. Text components escape `\` and `,` with a backslash so distinct keys never
/// render alike.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKeyValue(Vec<KeyCell>);

impl PrimaryKeyValue {
    pub fn new(cells: Vec<KeyCell>) -> Self {
        Self(cells)
    }

    /// Creates a single-column integer key.
    pub fn int(value: i64) -> Self {
        Self(vec![KeyCell::Int(value)])
    }

    pub fn cells(&self) -> &[KeyCell] {
        &self.0
    }
}

impl fmt::Display for PrimaryKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, cell) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{cell}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_keys_order_lexicographically() {
        let a = PrimaryKeyValue::new(vec![KeyCell::Int(1), KeyCell::String("b".into())]);
        let b = PrimaryKeyValue::new(vec![KeyCell::Int(1), KeyCell::String("c".into())]);
        let c = PrimaryKeyValue::new(vec![KeyCell::Int(2), KeyCell::String("a".into())]);

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn display_joins_components() {
        let key = PrimaryKeyValue::new(vec![
            KeyCell::Int(42),
            KeyCell::String("eu".into()),
            KeyCell::Bytes(vec![0xde, 0xad]),
        ]);

        assert_eq!(key.to_string(), "42,eu,\\xdead");
    }

    #[test]
    fn text_components_with_separators_render_distinctly() {
        let split_left = PrimaryKeyValue::new(vec![
            KeyCell::String("a,b".into()),
            KeyCell::String("c".into()),
        ]);
        let split_right = PrimaryKeyValue::new(vec![
            KeyCell::String("a".into()),
            KeyCell::String("b,c".into()),
        ]);
        let backslash = PrimaryKeyValue::new(vec![KeyCell::String("\\xdead".into())]);

        assert_eq!(split_left.to_string(), "a\\,b,c");
        assert_eq!(split_right.to_string(), "a,b\\,c");
        assert_eq!(backslash.to_string(), "\\\\xdead");
        assert_eq!(PrimaryKeyValue::int(12).to_string(), "12");
    }

    #[test]
    fn checkpoint_representation_restores_the_same_key() {
        let key = PrimaryKeyValue::new(vec![
            KeyCell::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
            KeyCell::Int(7),
        ]);

        let stored = serde_json::to_value(&key).unwrap();
        assert_eq!(
            stored,
            serde_json::json!([
                {"type": "date", "value": "2024-02-29"},
                {"type": "int", "value": 7}
            ])
        );
        assert_eq!(serde_json::from_value::<PrimaryKeyValue>(stored).unwrap(), key);
    }

    #[test]
    fn null_and_float_cells_are_rejected_as_key_components() {
        assert_eq!(
            KeyCell::try_from(&Cell::Null).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
        assert_eq!(
            KeyCell::try_from(&Cell::F64(1.5)).unwrap_err().kind(),
            ErrorKind::UnsupportedPrimaryKey
        );
        assert_eq!(KeyCell::try_from(&Cell::I32(5)).unwrap(), KeyCell::Int(5));
    }
}
