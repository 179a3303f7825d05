//! MySQL row to JSON conversion.
//!
//! Conversion is two-phase: `categorize_type` classifies the column's type
//! name, then a per-category decoder extracts the value. A value that cannot
//! be decoded as its category falls back to text, then to raw bytes.

use crate::models::JsonRow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    Time,
    DateTime,
    Timestamp,
    Text,
    Binary,
    Json,
    Unknown,
}

/// Classify a MySQL type name (as reported by sqlx) into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    match lower.as_str() {
        "date" => return TypeCategory::Date,
        "time" => return TypeCategory::Time,
        "datetime" => return TypeCategory::DateTime,
        "timestamp" => return TypeCategory::Timestamp,
        "bool" | "boolean" => return TypeCategory::Boolean,
        "json" => return TypeCategory::Json,
        "year" => return TypeCategory::Integer,
        _ => {}
    }

    // Before the integer check: TINYBLOB and TINYTEXT are not integers.
    if lower.contains("blob") || lower.contains("binary") {
        return TypeCategory::Binary;
    }
    if lower.contains("text")
        || lower.contains("char")
        || lower == "enum"
        || lower == "set"
    {
        return TypeCategory::Text;
    }

    if lower.contains("int") {
        return TypeCategory::Integer;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    TypeCategory::Unknown
}

/// Raw DECIMAL value, kept as the server's exact text.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Bytes as UTF-8 text when valid, otherwise base64.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Read a numeric count from a shaped row value, given as a number or a
/// numeric string.
pub fn json_to_count(value: &JsonValue) -> Option<u64> {
    match value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Conversion of driver rows to ordered JSON objects.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name());
                (col.name().to_string(), decode_column(self, idx, category))
            })
            .collect()
    }
}

fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    let decoded = match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Date => decode_as::<NaiveDate>(row, idx, |v| v.format("%Y-%m-%d").to_string()),
        TypeCategory::Time => decode_as::<NaiveTime>(row, idx, |v| v.format("%H:%M:%S%.f").to_string()),
        TypeCategory::DateTime => {
            decode_as::<NaiveDateTime>(row, idx, |v| v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        TypeCategory::Timestamp => decode_as::<DateTime<Utc>>(row, idx, |v| v.to_rfc3339()),
        TypeCategory::Binary => decode_bytes(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Text | TypeCategory::Unknown => None,
    };

    match decoded {
        Some(value) => value,
        None => decode_text(row, idx),
    }
}

/// `Some(Null)` for SQL NULL, `None` when the value did not decode as `T`.
fn decode_as<'r, T>(row: &'r MySqlRow, idx: usize, render: impl Fn(T) -> String) -> Option<JsonValue>
where
    T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(v)) => Some(JsonValue::String(render(v))),
        Ok(None) => Some(JsonValue::Null),
        Err(_) => None,
    }
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => Some(JsonValue::String(v.0)),
        Ok(None) => Some(JsonValue::Null),
        Err(e) => {
            tracing::debug!("Failed to decode DECIMAL: {:?}", e);
            None
        }
    }
}

fn decode_integer(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
        return Some(JsonValue::Number(v.into()));
    }
    if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
        return Some(JsonValue::Null);
    }
    None
}

fn decode_boolean(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    match row.try_get::<Option<bool>, _>(idx) {
        Ok(v) => Some(v.map(JsonValue::Bool).unwrap_or(JsonValue::Null)),
        Err(_) => None,
    }
}

fn decode_float(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    let value = match row.try_get::<Option<f64>, _>(idx) {
        Ok(v) => v,
        Err(_) => row
            .try_get::<Option<f32>, _>(idx)
            .ok()?
            .map(f64::from),
    };
    Some(match value {
        Some(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string())),
        None => JsonValue::Null,
    })
}

fn decode_bytes(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    match row.try_get::<Option<Vec<u8>>, _>(idx) {
        Ok(v) => Some(v.map(|b| decode_binary_value(&b)).unwrap_or(JsonValue::Null)),
        Err(_) => None,
    }
}

fn decode_json(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    match row.try_get::<Option<JsonValue>, _>(idx) {
        Ok(v) => Some(v.unwrap_or(JsonValue::Null)),
        Err(_) => None,
    }
}

fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(Some(v)) => JsonValue::String(v),
        Ok(None) => JsonValue::Null,
        Err(_) => decode_bytes(row, idx).unwrap_or(JsonValue::Null),
    }
}
