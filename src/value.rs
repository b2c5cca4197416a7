//! Typed values exchanged with the engine.
//!
//! [`Value`] is used in both directions: query parameters are bound as
//! `Value`s (and rendered to SQL literals before being sent), and converted
//! row cells come back as `Value`s.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

/// A typed, nullable Trino value.
///
/// Maps, arrays, and row values are carried structurally as raw JSON; deeper
/// typing of their elements is left to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    Boolean(bool),
    /// Any of the integer family (tinyint through bigint)
    Integer(i64),
    /// real / double
    Real(f64),
    /// Any of the string-like family (varchar, char, json, decimal, uuid, ...)
    Varchar(String),
    /// varbinary, decoded from its base64 wire form
    Varbinary(Vec<u8>),
    /// An exact numeric literal kept in its decimal string form, for
    /// binding decimals without a round trip through f64
    Numeric(String),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeWithOffset(NaiveTime, FixedOffset),
    Timestamp(NaiveDateTime),
    TimestampWithZone(DateTime<FixedOffset>),
    /// Bound as `INTERVAL '...' DAY TO SECOND`
    IntervalDayToSecond(Duration),
    /// Bound as `ARRAY[...]`
    Array(Vec<Value>),
    /// Bound as `MAP(ARRAY[keys], ARRAY[values])`
    Map(Vec<(Value, Value)>),
    /// Structural passthrough for map/array/row column values
    Json(serde_json::Value),
}

impl Value {
    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Varchar(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Varchar(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Varbinary(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::TimestampWithZone(v)
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Value::IntervalDayToSecond(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}
