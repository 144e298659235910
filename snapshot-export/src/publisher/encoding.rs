use apache_avro::Schema;
use apache_avro::types::Value as AvroValue;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Datelike, SecondsFormat, Timelike};
use serde::Serialize;
use serde::ser::{SerializeMap, SerializeStruct, Serializer};
use serde_json::{Value as JsonValue, json};

use crate::error::ExportResult;
use crate::types::{Cell, ChangeRecord, ColumnSchema, ColumnType, TableSchema};

/// Magic byte opening every registry-framed message.
const REGISTRY_MAGIC_BYTE: u8 = 0;

/// Days between 0001-01-01 and 1970-01-01 in the proleptic Gregorian calendar.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Encodes change records into message payloads.
#[derive(Debug, Clone)]
pub enum RecordEncoder {
    /// JSON object with the record fields and a `data` object in column order.
    Json,
    /// Avro datum prefixed with the magic byte and the big-endian registry id of its schema.
    Avro { schema: Schema, schema_id: u32 },
}

impl RecordEncoder {
    /// Creates an Avro encoder for `table_schema` whose schema is registered under `schema_id`.
    pub fn avro(table_schema: &TableSchema, schema_id: u32) -> ExportResult<Self> {
        let schema = Schema::parse(&avro_value_schema(table_schema))?;
        Ok(RecordEncoder::Avro { schema, schema_id })
    }

    pub fn encode(&self, table_schema: &TableSchema, record: &ChangeRecord) -> ExportResult<Vec<u8>> {
        match self {
            RecordEncoder::Json => Ok(serde_json::to_vec(&JsonChangeRecord {
                table_schema,
                record,
            })?),
            RecordEncoder::Avro { schema, schema_id } => {
                let value = avro_change_record(table_schema, record);
                let datum = apache_avro::to_avro_datum(schema, value)?;

                let mut payload = Vec::with_capacity(datum.len() + 5);
                payload.push(REGISTRY_MAGIC_BYTE);
                payload.extend_from_slice(&schema_id.to_be_bytes());
                payload.extend_from_slice(&datum);

                Ok(payload)
            }
        }
    }
}

/// Registry subject of the value schema of `topic`.
pub fn value_subject(topic: &str) -> String {
    format!("{topic}-value")
}

struct JsonChangeRecord<'a> {
    table_schema: &'a TableSchema,
    record: &'a ChangeRecord,
}

impl Serialize for JsonChangeRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ChangeRecord", 5)?;
        state.serialize_field("change_key", &self.record.change_key.to_string())?;
        state.serialize_field("change_type", self.record.change_type.as_str())?;
        state.serialize_field("lsn", &self.record.lsn)?;
        state.serialize_field("seq_val", &self.record.seq_val)?;
        state.serialize_field(
            "data",
            &JsonRow {
                columns: &self.table_schema.column_schemas,
                values: &self.record.data.values,
            },
        )?;
        state.end()
    }
}

struct JsonRow<'a> {
    columns: &'a [ColumnSchema],
    values: &'a [Cell],
}

impl Serialize for JsonRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, cell) in self.columns.iter().zip(self.values) {
            map.serialize_entry(&column.name, &json_cell(cell))?;
        }
        map.end()
    }
}

fn json_cell(cell: &Cell) -> JsonValue {
    match cell {
        Cell::Null => JsonValue::Null,
        Cell::Bool(value) => JsonValue::Bool(*value),
        Cell::I16(value) => json!(value),
        Cell::I32(value) => json!(value),
        Cell::I64(value) => json!(value),
        Cell::F32(value) => json_float(f64::from(*value)),
        Cell::F64(value) => json_float(*value),
        Cell::Numeric(value) | Cell::String(value) => JsonValue::String(value.clone()),
        Cell::Bytes(value) => JsonValue::String(BASE64.encode(value)),
        Cell::Date(value) => JsonValue::String(value.format("%Y-%m-%d").to_string()),
        Cell::Time(value) => JsonValue::String(value.format("%H:%M:%S%.f").to_string()),
        Cell::Timestamp(value) => {
            JsonValue::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        Cell::TimestampTz(value) => {
            JsonValue::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Cell::Uuid(value) => JsonValue::String(value.to_string()),
        Cell::Json(value) => value.clone(),
    }
}

/// JSON numbers cannot hold NaN or infinities, those are rendered as strings.
fn json_float(value: f64) -> JsonValue {
    match serde_json::Number::from_f64(value) {
        Some(number) => JsonValue::Number(number),
        None if value.is_nan() => JsonValue::String("NaN".to_string()),
        None if value.is_sign_positive() => JsonValue::String("Infinity".to_string()),
        None => JsonValue::String("-Infinity".to_string()),
    }
}

/// Builds the Avro schema of the change records of `table_schema`.
pub fn avro_value_schema(table_schema: &TableSchema) -> JsonValue {
    let table = avro_name(&table_schema.name.name);
    let fields = table_schema
        .column_schemas
        .iter()
        .map(|column| {
            let typ = avro_column_type(column.typ);
            if column.nullable {
                json!({"name": avro_name(&column.name), "type": ["null", typ], "default": null})
            } else {
                json!({"name": avro_name(&column.name), "type": typ})
            }
        })
        .collect::<Vec<_>>();

    json!({
        "type": "record",
        "name": format!("{table}_change"),
        "namespace": format!("snapshot_export.{}", avro_name(&table_schema.name.schema)),
        "fields": [
            {"name": "change_key", "type": "string"},
            {"name": "change_type", "type": "string"},
            {"name": "lsn", "type": "string"},
            {"name": "seq_val", "type": "string"},
            {"name": "data", "type": {"type": "record", "name": format!("{table}_row"), "fields": fields}}
        ]
    })
}

fn avro_column_type(typ: ColumnType) -> JsonValue {
    match typ {
        ColumnType::Bool => json!("boolean"),
        ColumnType::Int2 | ColumnType::Int4 => json!("int"),
        ColumnType::Int8 => json!("long"),
        ColumnType::Float4 => json!("float"),
        ColumnType::Float8 => json!("double"),
        ColumnType::Numeric | ColumnType::Text | ColumnType::Json => json!("string"),
        ColumnType::Bytea => json!("bytes"),
        ColumnType::Date => json!({"type": "int", "logicalType": "date"}),
        ColumnType::Time => json!({"type": "long", "logicalType": "time-micros"}),
        ColumnType::Timestamp => json!({"type": "long", "logicalType": "local-timestamp-micros"}),
        ColumnType::TimestampTz => json!({"type": "long", "logicalType": "timestamp-micros"}),
        ColumnType::Uuid => json!({"type": "string", "logicalType": "uuid"}),
    }
}

/// Maps an identifier onto the Avro name grammar `[A-Za-z_][A-Za-z0-9_]*`.
fn avro_name(identifier: &str) -> String {
    let mut name: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }

    name
}

fn avro_change_record(table_schema: &TableSchema, record: &ChangeRecord) -> AvroValue {
    let data = table_schema
        .column_schemas
        .iter()
        .zip(&record.data.values)
        .map(|(column, cell)| {
            let value = avro_cell(cell);
            let value = match (column.nullable, cell.is_null()) {
                (false, _) => value,
                (true, true) => AvroValue::Union(0, Box::new(value)),
                (true, false) => AvroValue::Union(1, Box::new(value)),
            };
            (avro_name(&column.name), value)
        })
        .collect();

    AvroValue::Record(vec![
        (
            "change_key".to_string(),
            AvroValue::String(record.change_key.to_string()),
        ),
        (
            "change_type".to_string(),
            AvroValue::String(record.change_type.as_str().to_string()),
        ),
        ("lsn".to_string(), AvroValue::String(record.lsn.clone())),
        ("seq_val".to_string(), AvroValue::String(record.seq_val.clone())),
        ("data".to_string(), AvroValue::Record(data)),
    ])
}

fn avro_cell(cell: &Cell) -> AvroValue {
    match cell {
        Cell::Null => AvroValue::Null,
        Cell::Bool(value) => AvroValue::Boolean(*value),
        Cell::I16(value) => AvroValue::Int(i32::from(*value)),
        Cell::I32(value) => AvroValue::Int(*value),
        Cell::I64(value) => AvroValue::Long(*value),
        Cell::F32(value) => AvroValue::Float(*value),
        Cell::F64(value) => AvroValue::Double(*value),
        Cell::Numeric(value) | Cell::String(value) => AvroValue::String(value.clone()),
        Cell::Bytes(value) => AvroValue::Bytes(value.clone()),
        Cell::Date(value) => AvroValue::Date(value.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
        Cell::Time(value) => AvroValue::TimeMicros(
            i64::from(value.num_seconds_from_midnight()) * 1_000_000
                + i64::from(value.nanosecond() / 1_000),
        ),
        Cell::Timestamp(value) => AvroValue::LocalTimestampMicros(value.and_utc().timestamp_micros()),
        Cell::TimestampTz(value) => AvroValue::TimestampMicros(value.timestamp_micros()),
        Cell::Uuid(value) => AvroValue::Uuid(*value),
        Cell::Json(value) => AvroValue::String(value.to_string()),
    }
}
