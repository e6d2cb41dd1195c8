//! Recorded queries and their bind values.

use crate::format::{format_sql, humanize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A bind value passed alongside a SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// SQL `NULL`
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (narrowed to the target column type on execution)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
    /// Binary value
    Bytes(Vec<u8>),
    /// Timestamp with time zone
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for SqlValue {
    /// Renders the value as a SQL literal.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(true) => f.write_str("TRUE"),
            SqlValue::Bool(false) => f.write_str("FALSE"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Float(v) if v.is_finite() => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "'{v}'"),
            SqlValue::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
            SqlValue::Bytes(v) => {
                f.write_str("'\\x")?;
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("'")
            }
            SqlValue::Timestamp(v) => write!(f, "'{}'", v.to_rfc3339()),
        }
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    SqlValue::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::Float(f64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        SqlValue::Bytes(v.to_vec())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// Bind parameters of a single execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Params {
    /// No parameters were passed.
    #[default]
    None,
    /// One parameter set.
    Single(Vec<SqlValue>),
    /// One parameter set per row (batch execution).
    Many(Vec<Vec<SqlValue>>),
}

impl Params {
    /// Whether this is a batch (multi-row) execution.
    pub fn is_many(&self) -> bool {
        matches!(self, Params::Many(_))
    }

    /// Whether no bind values are present.
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Single(values) => values.is_empty(),
            Params::Many(rows) => rows.iter().all(Vec::is_empty),
        }
    }
}

impl From<Vec<SqlValue>> for Params {
    fn from(values: Vec<SqlValue>) -> Self {
        Params::Single(values)
    }
}

impl From<Vec<Vec<SqlValue>>> for Params {
    fn from(rows: Vec<Vec<SqlValue>>) -> Self {
        Params::Many(rows)
    }
}

/// One intercepted statement.
///
/// `time_taken` is set once the statement has executed successfully; a query
/// blocked before execution keeps `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    sql: String,
    params: Params,
    time_taken: Option<Duration>,
}

impl Query {
    pub(crate) fn new(sql: &str, params: &Params) -> Self {
        Self {
            sql: sql.to_string(),
            params: params.clone(),
            time_taken: None,
        }
    }

    pub(crate) fn executed_in(mut self, time_taken: Duration) -> Self {
        self.time_taken = Some(time_taken);
        self
    }

    /// The statement text as issued.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The bind parameters as issued.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Measured execution time, if the query ran.
    pub fn time_taken(&self) -> Option<Duration> {
        self.time_taken
    }

    /// Whether the query reached the database.
    pub fn is_executed(&self) -> bool {
        self.time_taken.is_some()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_sql(&self.sql, &self.params))?;
        if let Some(time_taken) = self.time_taken {
            write!(f, "\n(executed in {})", humanize(time_taken))?;
        }
        Ok(())
    }
}
