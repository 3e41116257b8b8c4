//! Driver-neutral result rows
//!
//! Rows from any site backend are decoded into a name → value map so the
//! normalizer and validation reports never see driver types.

use serde::Serialize;
use sqlx::{Column, ColumnIndex, Decode, Row, TypeInfo, ValueRef};
use std::collections::BTreeMap;

/// One decoded column value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// Column name → value
pub type RawRow = BTreeMap<String, RawValue>;

/// Decode every column of a driver row
pub fn decode_row<R>(row: &R) -> RawRow
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> i64: Decode<'r, R::Database>,
    for<'r> f64: Decode<'r, R::Database>,
    for<'r> String: Decode<'r, R::Database>,
{
    let mut raw = RawRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        raw.insert(column.name().to_string(), decode_value(row, index));
    }
    raw
}

fn decode_value<R>(row: &R, index: usize) -> RawValue
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> i64: Decode<'r, R::Database>,
    for<'r> f64: Decode<'r, R::Database>,
    for<'r> String: Decode<'r, R::Database>,
{
    let type_name = match row.try_get_raw(index) {
        Ok(value) if value.is_null() => return RawValue::Null,
        Ok(value) => value.type_info().name().to_ascii_uppercase(),
        Err(_) => return RawValue::Null,
    };

    let decoded = match ColumnKind::from_type_name(&type_name) {
        ColumnKind::Integer => row.try_get_unchecked::<i64, _>(index).map(RawValue::Int),
        ColumnKind::Float => row.try_get_unchecked::<f64, _>(index).map(RawValue::Float),
        ColumnKind::Decimal => row
            .try_get_unchecked::<String, _>(index)
            .map(|text| match text.trim().parse::<f64>() {
                Ok(number) => RawValue::Float(number),
                Err(_) => RawValue::Text(text),
            }),
        ColumnKind::Text => row.try_get_unchecked::<String, _>(index).map(RawValue::Text),
    };

    decoded.unwrap_or(RawValue::Null)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Decimal,
    Text,
}

impl ColumnKind {
    fn from_type_name(name: &str) -> Self {
        if name.contains("INT") || name.contains("BOOL") {
            ColumnKind::Integer
        } else if name.contains("REAL") || name.contains("DOUBLE") || name.contains("FLOAT") {
            ColumnKind::Float
        } else if name.contains("DECIMAL") || name.contains("NUMERIC") {
            ColumnKind::Decimal
        } else {
            ColumnKind::Text
        }
    }
}

/// JSON view of a row (validation issue listings)
pub fn row_to_json(row: &RawRow) -> serde_json::Value {
    serde_json::to_value(row).unwrap_or(serde_json::Value::Null)
}
