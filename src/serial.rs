//! Rendering of bound parameters as Trino SQL literals.

use crate::error::{Result, TrinoLinkError};
use crate::value::Value;
use chrono::Timelike;
use std::fmt::Write as _;

/// Serialize a [`Value`] as a Trino SQL literal, for `EXECUTE ... USING`.
pub fn serialize_literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Boolean(true) => Ok("true".to_string()),
        Value::Boolean(false) => Ok("false".to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Numeric(s) => Ok(s.clone()),
        Value::Real(f) => {
            if f.is_nan() {
                Ok("nan".to_string())
            } else if f.is_infinite() {
                Ok(if *f > 0.0 { "+Infinity" } else { "-Infinity" }.to_string())
            } else {
                // Display for f64 is the shortest representation that
                // round-trips.
                Ok(format!("{}", f))
            }
        }
        Value::Varchar(s) => Ok(quote_string(s)),
        Value::Varbinary(bytes) => {
            let mut literal = String::with_capacity(3 + bytes.len() * 2);
            literal.push_str("X'");
            for byte in bytes {
                let _ = write!(literal, "{:02X}", byte);
            }
            literal.push('\'');
            Ok(literal)
        }
        Value::Date(d) => Ok(format!("DATE '{}'", d.format("%Y-%m-%d"))),
        Value::Time(t) => Ok(format!("TIME '{}'", format_time(t))),
        Value::TimeWithOffset(t, offset) => {
            Ok(format!("TIME '{} {}'", format_time(t), offset))
        }
        Value::Timestamp(ts) => Ok(format!(
            "TIMESTAMP '{} {}'",
            ts.date().format("%Y-%m-%d"),
            format_time(&ts.time())
        )),
        Value::TimestampWithZone(ts) => Ok(format!(
            "TIMESTAMP '{} {} {}'",
            ts.date_naive().format("%Y-%m-%d"),
            format_time(&ts.time()),
            ts.offset()
        )),
        Value::IntervalDayToSecond(duration) => {
            let negative = duration.num_milliseconds() < 0;
            let total_millis = duration.num_milliseconds().abs();
            let days = total_millis / 86_400_000;
            let hours = total_millis / 3_600_000 % 24;
            let minutes = total_millis / 60_000 % 60;
            let seconds = total_millis / 1_000 % 60;
            let millis = total_millis % 1_000;
            Ok(format!(
                "INTERVAL '{}{} {}:{:02}:{:02}.{:03}' DAY TO SECOND",
                if negative { "-" } else { "" },
                days,
                hours,
                minutes,
                seconds,
                millis
            ))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(serialize_literal)
                .collect::<Result<_>>()?;
            Ok(format!("ARRAY[{}]", rendered.join(", ")))
        }
        Value::Map(pairs) => {
            let keys: Vec<String> = pairs
                .iter()
                .map(|(k, _)| serialize_literal(k))
                .collect::<Result<_>>()?;
            let values: Vec<String> = pairs
                .iter()
                .map(|(_, v)| serialize_literal(v))
                .collect::<Result<_>>()?;
            Ok(format!(
                "MAP(ARRAY[{}], ARRAY[{}])",
                keys.join(", "),
                values.join(", ")
            ))
        }
        Value::Json(_) => Err(TrinoLinkError::Serialization(
            "cannot serialize an opaque JSON value as a literal".to_string(),
        )),
    }
}

/// Single-quote a string, doubling embedded quotes.
pub(crate) fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

// HH:MM:SS with the sub-second fraction only when present, trailing zeros
// trimmed.
fn format_time(t: &chrono::NaiveTime) -> String {
    let mut formatted = format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());
    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos > 0 {
        let fraction = format!("{:09}", nanos);
        formatted.push('.');
        formatted.push_str(fraction.trim_end_matches('0'));
    }
    formatted
}
