//! Timestamped samples and their column schemas.

use crate::error::{MonitorError, MonitorResult};
use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Timestamp rendering used in persisted rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Name of the first column of every schema.
pub const TIME_COLUMN: &str = "Time";

/// One field value of a sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Numeric reading.
    Float(f64),
    /// Status flag or count.
    Int(i64),
    /// Device-formatted text, persisted verbatim.
    Text(String),
}

impl FieldValue {
    /// The value as a float, when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// Ordered column names of one subsystem, `Time` first.
///
/// Column names carry their unit, e.g. `Center(Hz)`. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSchema {
    columns: Arc<[String]>,
}

impl SampleSchema {
    /// Schema with `Time` followed by `fields`.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = std::iter::once(TIME_COLUMN.to_string())
            .chain(fields.into_iter().map(Into::into))
            .collect();
        Self {
            columns: columns.into(),
        }
    }

    /// All columns, `Time` included.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value columns, `Time` excluded.
    pub fn fields(&self) -> &[String] {
        &self.columns[1..]
    }

    /// Number of columns including `Time`.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Position of `name` among the value columns.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|c| c == name)
    }
}

/// One acquisition: a timestamp plus one value per schema field.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    timestamp: DateTime<Local>,
    schema: SampleSchema,
    values: Vec<FieldValue>,
}

impl Sample {
    /// # Errors
    ///
    /// [`MonitorError::MalformedResponse`] if the number of values does not
    /// match the schema.
    pub fn new(
        schema: SampleSchema,
        timestamp: DateTime<Local>,
        values: Vec<FieldValue>,
    ) -> MonitorResult<Self> {
        if values.len() != schema.fields().len() {
            return Err(MonitorError::MalformedResponse(format!(
                "sample has {} values for {} fields",
                values.len(),
                schema.fields().len()
            )));
        }
        Ok(Self {
            timestamp,
            schema,
            values,
        })
    }

    /// Stamp `values` with the current local time.
    pub fn now(schema: SampleSchema, values: Vec<FieldValue>) -> MonitorResult<Self> {
        Self::new(schema, Local::now(), values)
    }

    /// Acquisition time.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Calendar year of the acquisition, which selects the log file.
    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }

    /// Schema the values follow.
    pub fn schema(&self) -> &SampleSchema {
        &self.schema
    }

    /// Values in schema order.
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Value of column `name`.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// Field name / value pairs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.schema
            .fields()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// The persisted row: formatted timestamp followed by the values.
    pub fn to_row(&self) -> Vec<String> {
        std::iter::once(self.timestamp.format(TIMESTAMP_FORMAT).to_string())
            .chain(self.values.iter().map(ToString::to_string))
            .collect()
    }
}
