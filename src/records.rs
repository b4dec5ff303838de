use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AggregationError, AggregationResult};

pub type Record = Map<String, Value>;

/// Integers sort numerically and ahead of every text value, so `9 < 10 < "a"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => Some(
                number
                    .as_i64()
                    .map(Self::Integer)
                    .unwrap_or_else(|| Self::Text(number.to_string())),
            ),
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Bool(flag) => Some(Self::Text(flag.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn as_count(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Text(text) => text.trim().parse::<i64>().ok(),
        }
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(left), Self::Integer(right)) => left.cmp(right),
            (Self::Integer(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Integer(_)) => Ordering::Greater,
            (Self::Text(left), Self::Text(right)) => left.cmp(right),
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNames {
    pub item: String,
    pub annotator: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObservation {
    pub item: FieldValue,
    pub annotator: FieldValue,
    pub response: FieldValue,
}

pub fn read_jsonlist(path: &Path) -> Result<Vec<Record>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut records = Vec::new();
    for (line_index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(line).with_context(|| {
            format!(
                "failed to parse record on line {} of {}",
                line_index + 1,
                path.display()
            )
        })?;
        records.push(record);
    }

    Ok(records)
}

pub fn field_value(record: &Record, field: &str, record_index: usize) -> AggregationResult<FieldValue> {
    let value = record.get(field).ok_or_else(|| {
        AggregationError::config(field, Some(record_index), "field is missing from record")
    })?;

    FieldValue::from_json(value).ok_or_else(|| {
        AggregationError::config(
            field,
            Some(record_index),
            format!("expected a string or number, found {value}"),
        )
    })
}

pub fn extract_observations(
    records: &[Record],
    fields: &FieldNames,
) -> AggregationResult<Vec<RawObservation>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            Ok(RawObservation {
                item: field_value(record, &fields.item, index)?,
                annotator: field_value(record, &fields.annotator, index)?,
                response: field_value(record, &fields.response, index)?,
            })
        })
        .collect()
}
