//! Record <-> row conversion.
//!
//! # Responsibility
//! - Map typed records to `ColumnMap`s for INSERT/UPDATE and back.
//! - Support the flat layout (one column per field) and the JSON-document
//!   layout (`id` + `data` columns).
//! - Convert SQLite values to JSON values using declared column types.
//!
//! # Invariants
//! - `to_record(from_record(r)) == r` for every supported field type.
//! - Columns declared `BOOLEAN`/`BOOL` read back as JSON bools.
//! - Columns declared `JSON` read back as parsed JSON; malformed text is a
//!   conversion error, never a silent string.
//! - Nested arrays/objects are written as JSON text.
//! - Integers outside the signed 64-bit range are rejected, never rounded.

use crate::error::{PersistenceError, PersistenceResult};
use crate::model::identity::{Identifiable, ID_FIELD};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Row, Statement};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Ordered column name -> value map for one row.
pub type ColumnMap = BTreeMap<String, Value>;

/// Default data column for the JSON-document layout.
pub const DATA_FIELD: &str = "data";

/// Physical layout a codec writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLayout<'a> {
    /// One column per record field.
    Flat,
    /// Whole record serialized into `data_column`.
    JsonDocument { data_column: &'a str },
}

/// Strategy converting records of type `T` to and from rows.
pub trait RecordCodec<T>: Send + Sync {
    fn layout(&self) -> StorageLayout<'_>;

    /// Primary key column.
    fn id_column(&self) -> &str {
        ID_FIELD
    }

    /// Builds a record from one row.
    fn to_record(&self, columns: ColumnMap) -> PersistenceResult<T>;

    /// Builds INSERT/UPDATE values from a record.
    fn from_record(&self, record: &T) -> PersistenceResult<ColumnMap>;

    /// Builds values for a PATCH-style update from a partial field map.
    fn from_partial(&self, partial: &Map<String, Value>) -> PersistenceResult<ColumnMap>;
}

/// One-column-per-field codec.
///
/// Records round-trip through `serde_json::Value`; a record must serialize
/// to a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatCodec;

impl<T> RecordCodec<T> for FlatCodec
where
    T: Serialize + DeserializeOwned,
{
    fn layout(&self) -> StorageLayout<'_> {
        StorageLayout::Flat
    }

    fn to_record(&self, columns: ColumnMap) -> PersistenceResult<T> {
        let object: Map<String, Value> = columns.into_iter().collect();
        Ok(serde_json::from_value(Value::Object(object))?)
    }

    fn from_record(&self, record: &T) -> PersistenceResult<ColumnMap> {
        match serde_json::to_value(record)? {
            Value::Object(object) => Ok(object.into_iter().collect()),
            other => Err(PersistenceError::Conversion(format!(
                "record must serialize to an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn from_partial(&self, partial: &Map<String, Value>) -> PersistenceResult<ColumnMap> {
        Ok(partial
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Whole-record-as-JSON codec over `(id, data)` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonDocumentCodec {
    id_column: String,
    data_column: String,
}

impl Default for JsonDocumentCodec {
    fn default() -> Self {
        Self::new(ID_FIELD, DATA_FIELD)
    }
}

impl JsonDocumentCodec {
    pub fn new(id_column: impl Into<String>, data_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
            data_column: data_column.into(),
        }
    }

    pub fn data_column(&self) -> &str {
        &self.data_column
    }
}

impl<T> RecordCodec<T> for JsonDocumentCodec
where
    T: Identifiable + Serialize + DeserializeOwned,
{
    fn layout(&self) -> StorageLayout<'_> {
        StorageLayout::JsonDocument {
            data_column: &self.data_column,
        }
    }

    fn id_column(&self) -> &str {
        &self.id_column
    }

    fn to_record(&self, mut columns: ColumnMap) -> PersistenceResult<T> {
        let data = columns.remove(&self.data_column).ok_or_else(|| {
            PersistenceError::Conversion(format!("row has no `{}` column", self.data_column))
        })?;
        let document = match data {
            Value::String(text) => serde_json::from_str(&text)?,
            other => other,
        };
        Ok(serde_json::from_value(document)?)
    }

    fn from_record(&self, record: &T) -> PersistenceResult<ColumnMap> {
        let id = record
            .id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                PersistenceError::Conversion("document record has no id".to_string())
            })?
            .to_string();
        let mut columns = ColumnMap::new();
        columns.insert(self.id_column.clone(), Value::String(id));
        columns.insert(self.data_column.clone(), serde_json::to_value(record)?);
        Ok(columns)
    }

    /// The id stays fixed: id members are dropped so the document can never
    /// disagree with its id column.
    fn from_partial(&self, partial: &Map<String, Value>) -> PersistenceResult<ColumnMap> {
        let patch = partial
            .iter()
            .filter(|(key, _)| key.as_str() != ID_FIELD && key.as_str() != self.id_column)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Map<String, Value>>();
        let mut columns = ColumnMap::new();
        columns.insert(self.data_column.clone(), Value::Object(patch));
        Ok(columns)
    }
}

/// Name and declared type of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: Option<String>,
}

impl ColumnInfo {
    fn declared_as(&self, marker: &str) -> bool {
        self.decl_type
            .as_deref()
            .is_some_and(|decl| decl.to_ascii_uppercase().contains(marker))
    }
}

/// Captures result column metadata before the statement is executed.
pub fn column_infos(stmt: &Statement<'_>) -> Vec<ColumnInfo> {
    stmt.columns()
        .into_iter()
        .map(|column| ColumnInfo {
            name: column.name().to_string(),
            decl_type: column.decl_type().map(str::to_string),
        })
        .collect()
}

/// Reads every column of `row` into a `ColumnMap`.
pub fn read_row(row: &Row<'_>, columns: &[ColumnInfo]) -> PersistenceResult<ColumnMap> {
    let mut map = ColumnMap::new();
    for (index, column) in columns.iter().enumerate() {
        let value = sql_to_json(row.get_ref(index)?, column)?;
        map.insert(column.name.clone(), value);
    }
    Ok(map)
}

fn sql_to_json(value: ValueRef<'_>, column: &ColumnInfo) -> PersistenceResult<Value> {
    let converted = match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) if column.declared_as("BOOL") => Value::Bool(number != 0),
        ValueRef::Integer(number) => Value::Number(number.into()),
        ValueRef::Real(number) => Number::from_f64(number).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|err| {
                PersistenceError::Conversion(format!(
                    "column `{}` holds invalid UTF-8: {err}",
                    column.name
                ))
            })?;
            if column.declared_as("JSON") {
                serde_json::from_str(text).map_err(|err| {
                    PersistenceError::Conversion(format!(
                        "column `{}` holds malformed JSON: {err}",
                        column.name
                    ))
                })?
            } else {
                Value::String(text.to_string())
            }
        }
        ValueRef::Blob(bytes) => Value::Array(
            bytes
                .iter()
                .map(|byte| Value::Number((*byte).into()))
                .collect(),
        ),
    };
    Ok(converted)
}

/// Converts one JSON value into a bindable SQLite value.
pub fn json_to_sql(value: &Value) -> PersistenceResult<SqlValue> {
    let converted = match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match (number.as_i64(), number.as_u64()) {
            (Some(integer), _) => SqlValue::Integer(integer),
            (None, Some(unsigned)) => {
                return Err(PersistenceError::Conversion(format!(
                    "integer {unsigned} does not fit a signed 64-bit column"
                )))
            }
            (None, None) => SqlValue::Real(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(serde_json::to_string(value)?),
    };
    Ok(converted)
}

/// Bindable values for `keys`, in order. Missing keys bind NULL.
pub fn bind_values(columns: &ColumnMap, keys: &[String]) -> PersistenceResult<Vec<SqlValue>> {
    keys.iter()
        .map(|key| columns.get(key).map_or(Ok(SqlValue::Null), json_to_sql))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
