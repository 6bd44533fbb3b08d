//! Change event representation and envelope parsing.
//!
//! Events arrive as Debezium-style JSON envelopes: a `schema` section
//! describing the row struct (including semantic type names for temporal
//! columns) and a `payload` section carrying the operation code, the
//! `before`/`after` row images, and source metadata. Field order inside the
//! row images is significant and is preserved end to end.

use crate::error::{Result, RouterError};
use serde::Deserialize;
use serde_json::{Map, Value};

/// CDC operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Row inserted (also snapshot reads)
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
    /// DDL / schema change
    SchemaChange,
}

impl Op {
    /// Map a Debezium operation code to an [`Op`].
    ///
    /// Snapshot reads (`r`) are routed like inserts. Unknown codes return
    /// `None` and are rejected at parse.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" | "r" => Some(Op::Insert),
            "u" => Some(Op::Update),
            "d" => Some(Op::Delete),
            "" => Some(Op::SchemaChange),
            _ => None,
        }
    }

    /// Single-letter code used in job signatures and logs
    pub fn code(&self) -> &'static str {
        match self {
            Op::Insert => "c",
            Op::Update => "u",
            Op::Delete => "d",
            Op::SchemaChange => "",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Insert => write!(f, "INSERT"),
            Op::Update => write!(f, "UPDATE"),
            Op::Delete => write!(f, "DELETE"),
            Op::SchemaChange => write!(f, "SCHEMA_CHANGE"),
        }
    }
}

/// One column's declared schema: wire type plus optional semantic name
/// (e.g. `io.debezium.time.Date` on an `int32` column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Column name
    pub name: String,
    /// Wire type (`int32`, `int64`, `string`, ...)
    pub type_name: String,
    /// Semantic type name, absent for plain values
    pub semantic: Option<String>,
}

/// Source metadata extracted from the event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Schema, database, or keyspace depending on connector family
    pub schema: String,
    /// Table name
    pub table: String,
}

impl SourceInfo {
    /// Qualified `schema.table` identifier
    pub fn table_identifier(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// A single parsed change event.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Operation type
    pub op: Op,
    /// Previous row state (UPDATE/DELETE)
    pub before: Option<Map<String, Value>>,
    /// Current row state (INSERT/UPDATE)
    pub after: Option<Map<String, Value>>,
    /// Column schema of the row struct, in column order
    pub columns: Vec<ColumnSchema>,
    /// Source metadata; absent only for some schema-change events
    pub source: Option<SourceInfo>,
    /// Primary-key column name from the key envelope, if derivable
    pub key_column: Option<String>,
    /// DDL text for schema-change events
    pub ddl: Option<String>,
}

#[derive(Deserialize)]
struct RawEnvelope {
    schema: Option<RawSchema>,
    payload: Option<RawPayload>,
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    fields: Vec<RawStructField>,
}

#[derive(Deserialize)]
struct RawStructField {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    fields: Vec<RawColumn>,
}

#[derive(Deserialize)]
struct RawColumn {
    #[serde(rename = "type")]
    type_name: Option<String>,
    name: Option<String>,
    field: Option<String>,
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    before: Option<Value>,
    #[serde(default)]
    after: Option<Value>,
    #[serde(default)]
    source: Option<Value>,
    #[serde(default)]
    ddl: Option<String>,
}

impl ChangeEvent {
    /// Parse a change event from its JSON envelope, plus the optional key
    /// envelope from which the primary-key column name is derived.
    pub fn parse(value_json: &str, key_json: Option<&str>) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(value_json)?;
        let payload = raw
            .payload
            .ok_or_else(|| RouterError::event("envelope has no payload"))?;

        let op_code = payload.op.unwrap_or_default();
        let op = Op::from_code(&op_code)
            .ok_or_else(|| RouterError::event(format!("unknown operation code '{}'", op_code)))?;

        let before = payload.before.and_then(into_object);
        let after = payload.after.and_then(into_object);
        let source = payload.source.as_ref().and_then(parse_source);
        let columns = raw.schema.map(|s| parse_columns(&s)).unwrap_or_default();

        // Key envelope parse failures are expected (no primary key, or a
        // connector that emits no key schema) and never fatal.
        let key_column = key_json.and_then(parse_key_column);

        Ok(Self {
            op,
            before,
            after,
            columns,
            source,
            key_column,
            ddl: payload.ddl,
        })
    }

    /// The row image this event operates on: before for deletes, else after
    pub fn row_image(&self) -> Option<&Map<String, Value>> {
        match self.op {
            Op::Delete => self.before.as_ref(),
            _ => self.after.as_ref(),
        }
    }

    /// Mutable access to the operative row image (temporal normalization)
    pub fn row_image_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self.op {
            Op::Delete => self.before.as_mut(),
            _ => self.after.as_mut(),
        }
    }

    /// Ordered column names of the operative row image
    pub fn column_names(&self) -> Vec<String> {
        self.row_image()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Qualified source table identifier, if source metadata is present
    pub fn source_table_identifier(&self) -> Option<String> {
        self.source.as_ref().map(SourceInfo::table_identifier)
    }
}

fn into_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Resolve the schema component by connector family: PostgreSQL-style
/// connectors emit `schema`, MySQL-family `db`, Vitess `keyspace`.
fn parse_source(source: &Value) -> Option<SourceInfo> {
    let table = source.get("table")?.as_str()?.to_string();
    let schema = ["schema", "db", "keyspace"]
        .iter()
        .find_map(|k| source.get(*k).and_then(Value::as_str))?
        .to_string();
    Some(SourceInfo { schema, table })
}

/// The column list lives in the first struct entry of the envelope schema
/// (the `before` struct; `after` declares the identical columns).
fn parse_columns(schema: &RawSchema) -> Vec<ColumnSchema> {
    schema
        .fields
        .iter()
        .find(|f| !f.fields.is_empty())
        .map(|entry| {
            entry
                .fields
                .iter()
                .map(|c| ColumnSchema {
                    name: c.field.clone().unwrap_or_default(),
                    type_name: c.type_name.clone().unwrap_or_default(),
                    semantic: c.name.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_key_column(key_json: &str) -> Option<String> {
    let raw: Value = serde_json::from_str(key_json).ok()?;
    raw.get("schema")?
        .get("fields")?
        .get(0)?
        .get("field")?
        .as_str()
        .map(str::to_string)
}

/// Render a row value for the engine's tab-separated input. Nulls become
/// empty fields, strings are passed through raw, everything else keeps its
/// JSON rendering.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
