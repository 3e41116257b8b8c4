//! Parameter binding
//!
//! Templates come in two dialects:
//! - **Declared**: the template reads `@name` variables; binding prepends one
//!   `SET @name = <literal>;` statement per supplied parameter.
//! - **Inline**: the template contains `{name}` placeholders; binding replaces
//!   each occurrence with the literal.
//!
//! Both dialects share one literal encoding, so the same parameter set yields
//! the same literal text either way. Placeholders without a supplied value are
//! left in place; the store rejects the query at execution time.

use chrono::NaiveDate;
use cqi_common::time::Period;
use cqi_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const START_DATE: &str = "startDate";
pub const END_DATE: &str = "endDate";
pub const PREVIOUS_END_DATE: &str = "previousEndDate";

/// Typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// SQL literal text: strings single-quoted with embedded quotes doubled,
    /// numbers and booleans verbatim
    pub fn to_sql_literal(&self) -> String {
        match self {
            ParamValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) if f.is_finite() => f.to_string(),
            ParamValue::Float(_) => "NULL".to_string(),
            ParamValue::Bool(true) => "TRUE".to_string(),
            ParamValue::Bool(false) => "FALSE".to_string(),
        }
    }

    /// Convert a JSON scalar; arrays, objects and null have no SQL literal
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(ParamValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(ParamValue::Int)
                .or_else(|| n.as_f64().map(ParamValue::Float)),
            serde_json::Value::String(s) => Some(ParamValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert a TOML scalar
    pub fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::Boolean(b) => Some(ParamValue::Bool(*b)),
            toml::Value::Integer(i) => Some(ParamValue::Int(*i)),
            toml::Value::Float(f) => Some(ParamValue::Float(*f)),
            toml::Value::String(s) => Some(ParamValue::Text(s.clone())),
            toml::Value::Datetime(dt) => Some(ParamValue::Text(dt.to_string())),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(value: NaiveDate) -> Self {
        ParamValue::Text(value.format("%Y-%m-%d").to_string())
    }
}

/// Named parameters for one invocation, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Date parameters for a reporting period
    pub fn for_period(period: &Period) -> Self {
        Self::new()
            .with(START_DATE, period.start)
            .with(END_DATE, period.end)
            .with(PREVIOUS_END_DATE, period.previous_end())
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Overlay `other`; its values win
    pub fn merge(&mut self, other: &ParameterSet) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// `self` with `overrides` applied on top
    pub fn merged_with(&self, overrides: &ParameterSet) -> ParameterSet {
        let mut merged = self.clone();
        merged.merge(overrides);
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Scalars from a TOML table (the config file's `[parameters]` section)
    pub fn from_toml_table(table: &toml::Table) -> Result<Self> {
        let mut params = Self::new();
        for (name, value) in table {
            let value = ParamValue::from_toml(value).ok_or_else(|| {
                Error::Config(format!("Parameter '{}' must be a scalar value", name))
            })?;
            params.set(name.clone(), value);
        }
        Ok(params)
    }

    /// Scalars from a JSON object; non-scalar entries are skipped
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut params = Self::new();
        for (name, value) in object {
            if let Some(value) = ParamValue::from_json(value) {
                params.set(name.clone(), value);
            }
        }
        params
    }
}

/// Template dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStyle {
    /// `@name` variables assigned by prepended statements
    Declared,
    /// `{name}` placeholders substituted in place
    Inline,
}

impl TemplateStyle {
    /// Detect the dialect: any `@name` variable outside quotes and comments means Declared
    pub fn detect(template: &str) -> Self {
        if has_declared_variables(template) {
            TemplateStyle::Declared
        } else {
            TemplateStyle::Inline
        }
    }

    /// Binding strategy for this dialect
    pub fn binder(self) -> fn(&str, &ParameterSet) -> String {
        match self {
            TemplateStyle::Declared => bind_declared,
            TemplateStyle::Inline => bind_inline,
        }
    }
}

/// Bind `params` into `template`, detecting its dialect
pub fn bind(template: &str, params: &ParameterSet) -> String {
    (TemplateStyle::detect(template).binder())(template, params)
}

/// Prepend one assignment per supplied parameter
pub fn bind_declared(template: &str, params: &ParameterSet) -> String {
    let mut query = String::with_capacity(template.len() + params.len() * 32);
    for (name, value) in params.iter() {
        if !is_identifier(name) {
            continue;
        }
        let _ = writeln!(query, "SET @{} = {};", name, value.to_sql_literal());
    }
    query.push_str(template);
    query
}

/// Replace every `{name}` placeholder that has a supplied value, in a single pass
pub fn bind_inline(template: &str, params: &ParameterSet) -> String {
    let mut query = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        query.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_identifier(&after[..close]) => {
                let name = &after[..close];
                match params.get(name) {
                    Some(value) => query.push_str(&value.to_sql_literal()),
                    None => {
                        query.push('{');
                        query.push_str(name);
                        query.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                query.push('{');
                rest = after;
            }
        }
    }
    query.push_str(rest);
    query
}

/// Inline placeholders still present in a bound query
pub fn unresolved_placeholders(query: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = query;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_identifier(&after[..close]) => {
                names.push(after[..close].to_string());
                rest = &after[close + 1..];
            }
            _ => rest = after,
        }
    }
    names
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn has_declared_variables(template: &str) -> bool {
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_past(bytes, i + 1, &[quote]);
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_past(bytes, i + 2, b"\n");
                continue;
            }
            b'#' => {
                i = skip_past(bytes, i + 1, b"\n");
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_past(bytes, i + 2, b"*/");
                continue;
            }
            b'@' => {
                // `@@name` is a server system variable, not a declared one
                if bytes.get(i + 1) == Some(&b'@') {
                    i += 2;
                    continue;
                }
                if matches!(bytes.get(i + 1), Some(c) if c.is_ascii_alphabetic() || *c == b'_') {
                    return true;
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// Index just past the next `terminator` at or after `from` (end of input if none)
fn skip_past(bytes: &[u8], from: usize, terminator: &[u8]) -> usize {
    bytes
        .get(from..)
        .and_then(|rest| rest.windows(terminator.len()).position(|w| w == terminator))
        .map(|pos| from + pos + terminator.len())
        .unwrap_or(bytes.len())
}
