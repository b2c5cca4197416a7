//! Column type resolution and raw-value conversion.
//!
//! A [`TypeConverter`] is built per column from its decoded type signature.
//! It flattens the signature's single-argument spine into a parsed type
//! chain (`array(array(varchar))` becomes `["array", "array", "varchar"]`),
//! selects a scan kind from the chain, extracts precision/scale/length
//! parameters, and converts raw JSON cells into typed [`Value`]s.

use crate::error::{Result, TrinoLinkError};
use crate::models::{TypeArgument, TypeSignature};
use crate::value::Value;
use base64::{engine::general_purpose, Engine as _};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;

/// The typed shape a converted column value takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    NullableBool,
    NullableInt32,
    NullableInt64,
    NullableFloat64,
    NullableString,
    Bytes,
    NullableTimestamp,
    NullableMap,
    /// An array of up to three nesting levels with a typed element
    NullableSlice { depth: u8, element: SliceElement },
    /// Row values: an opaque heterogeneous sequence
    OpaqueRow,
    /// Fallback for unrecognized or deeper-than-three-level types
    Opaque,
}

/// Element kind of a [`ScanKind::NullableSlice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceElement {
    Bool,
    String,
    Int64,
    Float64,
    Timestamp,
    Map,
}

const STRING_SCAN_FAMILY: [&str; 9] = [
    "json",
    "char",
    "varchar",
    "interval year to month",
    "interval day to second",
    "decimal",
    "ipaddress",
    "uuid",
    "unknown",
];

/// Converts raw JSON cells of one column to typed values.
#[derive(Debug, Clone)]
pub struct TypeConverter {
    type_name: String,
    parsed_type: Vec<String>,
    scan_kind: ScanKind,
    precision: Option<i64>,
    scale: Option<i64>,
    size: Option<i64>,
}

impl TypeConverter {
    /// Build a converter from a column's raw type string and its fully
    /// decoded type signature.
    pub fn new(type_name: &str, signature: &TypeSignature) -> Result<Self> {
        let parsed_type = nested_types(Vec::new(), signature);
        let scan_kind = scan_kind(&parsed_type)?;

        let mut precision = None;
        let mut scale = None;
        let mut size = None;
        match signature.raw_type.as_str() {
            "char" | "varchar" => {
                if let Some(argument) = signature.arguments.first() {
                    size = Some(long_argument(argument)?);
                }
            }
            "decimal" => {
                if let Some(argument) = signature.arguments.first() {
                    precision = Some(long_argument(argument)?);
                }
                if let Some(argument) = signature.arguments.get(1) {
                    scale = Some(long_argument(argument)?);
                }
            }
            "time" | "time with time zone" | "timestamp" | "timestamp with time zone" => {
                if let Some(argument) = signature.arguments.first() {
                    precision = Some(long_argument(argument)?);
                }
            }
            _ => {}
        }

        Ok(Self {
            type_name: type_name.to_string(),
            parsed_type,
            scan_kind,
            precision,
            scale,
            size,
        })
    }

    /// The raw type string as reported by the server.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The flattened type chain, outermost first.
    pub fn parsed_type(&self) -> &[String] {
        &self.parsed_type
    }

    pub fn scan_kind(&self) -> ScanKind {
        self.scan_kind
    }

    pub fn precision(&self) -> Option<i64> {
        self.precision
    }

    pub fn scale(&self) -> Option<i64> {
        self.scale
    }

    pub fn size(&self) -> Option<i64> {
        self.size
    }

    /// Upper-cased database type name; container types report their full
    /// raw type string.
    pub fn database_type_name(&self) -> String {
        let name = match self.parsed_type[0].as_str() {
            "map" | "array" | "row" => self.type_name.as_str(),
            outer => outer,
        };
        name.to_uppercase()
    }

    /// Convert one raw cell to its typed value, or [`Value::Null`].
    pub fn convert(&self, raw: &JsonValue) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match self.parsed_type[0].as_str() {
            "boolean" => match raw {
                JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
                other => Err(conversion_error(other, "bool")),
            },
            "json" | "char" | "varchar" | "interval year to month" | "interval day to second"
            | "decimal" | "ipaddress" | "uuid" | "Geometry" | "SphericalGeography"
            | "unknown" => match raw {
                JsonValue::String(s) => Ok(Value::Varchar(s.clone())),
                other => Err(conversion_error(other, "string")),
            },
            "varbinary" => match raw {
                // varbinary arrives base64-encoded
                JsonValue::String(s) => general_purpose::STANDARD
                    .decode(s)
                    .map(Value::Varbinary)
                    .map_err(|e| {
                        TrinoLinkError::Conversion(format!(
                            "cannot decode base64 string into bytes: {}",
                            e
                        ))
                    }),
                other => Err(conversion_error(other, "bytes")),
            },
            "tinyint" | "smallint" | "integer" | "bigint" => match raw {
                JsonValue::Number(n) => n
                    .as_i64()
                    .map(Value::Integer)
                    .ok_or_else(|| conversion_error(raw, "int64")),
                other => Err(conversion_error(other, "int64")),
            },
            "real" | "double" => match raw {
                JsonValue::Number(n) => n
                    .as_f64()
                    .map(Value::Real)
                    .ok_or_else(|| conversion_error(raw, "float64")),
                JsonValue::String(s) => match s.as_str() {
                    "NaN" => Ok(Value::Real(f64::NAN)),
                    "Infinity" => Ok(Value::Real(f64::INFINITY)),
                    "-Infinity" => Ok(Value::Real(f64::NEG_INFINITY)),
                    other => other
                        .parse::<f64>()
                        .map(Value::Real)
                        .map_err(|_| conversion_error(raw, "float64")),
                },
                other => Err(conversion_error(other, "float64")),
            },
            "date" => {
                let s = string_cell(raw, "date")?;
                parse_date(s).map(Value::Date)
            }
            "time" => {
                let s = string_cell(raw, "time")?;
                parse_time(s).map(Value::Time)
            }
            "time with time zone" => {
                let s = string_cell(raw, "time with time zone")?;
                parse_time_with_offset(s).map(|(t, offset)| Value::TimeWithOffset(t, offset))
            }
            "timestamp" => {
                let s = string_cell(raw, "timestamp")?;
                parse_timestamp(s).map(Value::Timestamp)
            }
            "timestamp with time zone" => {
                let s = string_cell(raw, "timestamp with time zone")?;
                parse_timestamp_with_zone(s).map(Value::TimestampWithZone)
            }
            "map" => match raw {
                JsonValue::Object(_) => Ok(Value::Json(raw.clone())),
                other => Err(conversion_error(other, "map")),
            },
            "array" | "row" => match raw {
                JsonValue::Array(_) => Ok(Value::Json(raw.clone())),
                other => Err(conversion_error(other, "slice")),
            },
            _ => Err(TrinoLinkError::Conversion(format!(
                "type not supported: {:?}",
                self.type_name
            ))),
        }
    }
}

fn conversion_error(raw: &JsonValue, target: &str) -> TrinoLinkError {
    TrinoLinkError::Conversion(format!("cannot convert {} to {}", raw, target))
}

fn string_cell<'a>(raw: &'a JsonValue, target: &str) -> Result<&'a str> {
    raw.as_str().ok_or_else(|| conversion_error(raw, target))
}

fn long_argument(argument: &TypeArgument) -> Result<i64> {
    match argument {
        TypeArgument::Long(value) => Ok(*value),
        _ => Err(TrinoLinkError::InvalidResponseType),
    }
}

/// Flatten the signature's single-argument spine, outermost type first.
/// Two-argument containers (`map`) are not traversed.
fn nested_types(mut types: Vec<String>, signature: &TypeSignature) -> Vec<String> {
    types.push(signature.raw_type.clone());
    if signature.arguments.len() == 1 {
        match &signature.arguments[0] {
            TypeArgument::Type(inner) => return nested_types(types, inner),
            TypeArgument::NamedType(named) => return nested_types(types, &named.type_signature),
            _ => {}
        }
    }
    types
}

fn scan_kind(parsed_type: &[String]) -> Result<ScanKind> {
    match parsed_type[0].as_str() {
        "boolean" => Ok(ScanKind::NullableBool),
        s if STRING_SCAN_FAMILY.contains(&s) => Ok(ScanKind::NullableString),
        "varbinary" => Ok(ScanKind::Bytes),
        "tinyint" | "smallint" | "integer" => Ok(ScanKind::NullableInt32),
        "bigint" => Ok(ScanKind::NullableInt64),
        "real" | "double" => Ok(ScanKind::NullableFloat64),
        "date" | "time" | "time with time zone" | "timestamp" | "timestamp with time zone" => {
            Ok(ScanKind::NullableTimestamp)
        }
        "map" => Ok(ScanKind::NullableMap),
        "row" => Ok(ScanKind::OpaqueRow),
        "array" => {
            let mut depth = 1usize;
            loop {
                let inner = parsed_type
                    .get(depth)
                    .ok_or(TrinoLinkError::InvalidResponseType)?;
                if inner == "array" {
                    if depth == 3 {
                        // four or more dimensions scan as an opaque value
                        return Ok(ScanKind::Opaque);
                    }
                    depth += 1;
                    continue;
                }
                return Ok(match slice_element(inner) {
                    Some(element) => ScanKind::NullableSlice {
                        depth: depth as u8,
                        element,
                    },
                    None => ScanKind::Opaque,
                });
            }
        }
        _ => Ok(ScanKind::Opaque),
    }
}

fn slice_element(name: &str) -> Option<SliceElement> {
    match name {
        "boolean" => Some(SliceElement::Bool),
        "json" | "char" | "varchar" | "varbinary" | "interval year to month"
        | "interval day to second" | "decimal" | "ipaddress" | "uuid" | "unknown" => {
            Some(SliceElement::String)
        }
        "tinyint" | "smallint" | "integer" | "bigint" => Some(SliceElement::Int64),
        "real" | "double" => Some(SliceElement::Float64),
        "date" | "time" | "time with time zone" | "timestamp" | "timestamp with time zone" => {
            Some(SliceElement::Timestamp)
        }
        "map" => Some(SliceElement::Map),
        _ => None,
    }
}

// ── Temporal parsing ────────────────────────────────────────────────────────
//
// Values arrive as strings: `YYYY-MM-DD`, `HH:MM:SS[.fff]`,
// `YYYY-MM-DD HH:MM:SS[.fff]`, optionally followed by ` ±HH:MM` or a named
// IANA zone. Offsets are not always preceded by a space.

const TIME_LAYOUT: &str = "%H:%M:%S%.f";
const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| TrinoLinkError::Conversion(format!("cannot parse {:?} as a date", s)))
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, TIME_LAYOUT)
        .map_err(|_| TrinoLinkError::Conversion(format!("cannot parse {:?} as a time", s)))
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_LAYOUT)
        .map_err(|_| TrinoLinkError::Conversion(format!("cannot parse {:?} as a timestamp", s)))
}

fn parse_time_with_offset(s: &str) -> Result<(NaiveTime, FixedOffset)> {
    let (stamp, zone) = split_zone(s);
    let zone = zone.ok_or_else(|| {
        TrinoLinkError::Conversion(format!("cannot parse {:?} as a time with time zone", s))
    })?;
    let offset = parse_offset(zone).ok_or_else(|| {
        TrinoLinkError::Conversion(format!("cannot parse time zone offset {:?}", zone))
    })?;
    Ok((parse_time(stamp)?, offset))
}

fn parse_timestamp_with_zone(s: &str) -> Result<chrono::DateTime<FixedOffset>> {
    let (stamp, zone) = split_zone(s);
    let zone = zone.ok_or_else(|| {
        TrinoLinkError::Conversion(format!(
            "cannot parse {:?} as a timestamp with time zone",
            s
        ))
    })?;
    let naive = parse_timestamp(stamp)?;

    if let Some(offset) = parse_offset(zone) {
        return naive.and_local_timezone(offset).single().ok_or_else(|| {
            TrinoLinkError::Conversion(format!("cannot resolve {:?} in offset {}", stamp, offset))
        });
    }

    let tz: chrono_tz::Tz = zone
        .parse()
        .map_err(|_| TrinoLinkError::Conversion(format!("cannot load timezone {:?}", zone)))?;
    naive
        .and_local_timezone(tz)
        .earliest()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| {
            TrinoLinkError::Conversion(format!("cannot resolve {:?} in timezone {}", stamp, zone))
        })
}

/// Split a temporal string into its stamp and trailing zone, handling
/// offsets written without a separating space and the date hyphens that must
/// not be mistaken for a negative offset.
fn split_zone(s: &str) -> (&str, Option<&str>) {
    if let Some(idx) = s.rfind(' ') {
        let trailer = &s[idx + 1..];
        if !trailer.is_empty() && !trailer.as_bytes()[0].is_ascii_digit() {
            return (&s[..idx], Some(trailer));
        }
    }
    if let Some(idx) = s.find('+') {
        return (&s[..idx], Some(&s[idx..]));
    }
    let hyphens = s.matches('-').count();
    if hyphens == 1 || hyphens > 2 {
        let idx = s.rfind('-').expect("hyphen counted above");
        return (&s[..idx], Some(&s[idx..]));
    }
    (s, None)
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let bytes = zone.as_bytes();
    let sign = match bytes.first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let (hours, minutes) = zone[1..].split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signature(raw: JsonValue) -> TypeSignature {
        serde_json::from_value(raw).unwrap()
    }

    fn converter(type_name: &str, raw_signature: JsonValue) -> TypeConverter {
        TypeConverter::new(type_name, &signature(raw_signature)).unwrap()
    }

    fn scalar(raw_type: &str) -> JsonValue {
        json!({"rawType": raw_type, "arguments": []})
    }

    #[test]
    fn test_scalar_scan_kinds() {
        let cases = [
            ("boolean", ScanKind::NullableBool),
            ("varchar", ScanKind::NullableString),
            ("varbinary", ScanKind::Bytes),
            ("integer", ScanKind::NullableInt32),
            ("bigint", ScanKind::NullableInt64),
            ("double", ScanKind::NullableFloat64),
            ("timestamp", ScanKind::NullableTimestamp),
            ("map", ScanKind::NullableMap),
            ("row", ScanKind::OpaqueRow),
        ];
        for (raw_type, expected) in cases {
            assert_eq!(
                converter(raw_type, scalar(raw_type)).scan_kind(),
                expected,
                "{}",
                raw_type
            );
        }
    }

    #[test]
    fn test_nested_array_chain() {
        let sig = json!({
            "rawType": "array",
            "arguments": [{"kind": "TYPE", "value": {
                "rawType": "array",
                "arguments": [{"kind": "TYPE", "value": scalar("varchar")}]
            }}]
        });
        let converter = converter("array(array(varchar))", sig);
        assert_eq!(converter.parsed_type(), ["array", "array", "varchar"]);
        assert_eq!(
            converter.scan_kind(),
            ScanKind::NullableSlice {
                depth: 2,
                element: SliceElement::String
            }
        );
        assert_eq!(converter.database_type_name(), "ARRAY(ARRAY(VARCHAR))");
    }

    #[test]
    fn test_four_dimensional_array_is_opaque() {
        let mut sig = scalar("integer");
        for _ in 0..4 {
            sig = json!({"rawType": "array", "arguments": [{"kind": "TYPE", "value": sig}]});
        }
        let converter = converter("array(array(array(array(integer))))", sig);
        assert_eq!(converter.scan_kind(), ScanKind::Opaque);
    }

    #[test]
    fn test_array_without_element_type_is_invalid() {
        let err = TypeConverter::new("array", &signature(scalar("array"))).unwrap_err();
        assert!(matches!(err, TrinoLinkError::InvalidResponseType));
    }

    #[test]
    fn test_precision_scale_and_size() {
        let decimal_converter = converter(
            "decimal(10,2)",
            json!({"rawType": "decimal", "arguments": [
                {"kind": "LONG", "value": 10},
                {"kind": "LONG", "value": 2}
            ]}),
        );
        assert_eq!(decimal_converter.precision(), Some(10));
        assert_eq!(decimal_converter.scale(), Some(2));

        let varchar_converter = converter(
            "varchar(42)",
            json!({"rawType": "varchar", "arguments": [{"kind": "LONG", "value": 42}]}),
        );
        assert_eq!(varchar_converter.size(), Some(42));

        let timestamp_converter = converter(
            "timestamp(6)",
            json!({"rawType": "timestamp", "arguments": [{"kind": "LONG", "value": 6}]}),
        );
        assert_eq!(timestamp_converter.precision(), Some(6));
    }

    #[test]
    fn test_non_long_parameter_is_invalid() {
        let err = TypeConverter::new(
            "decimal",
            &signature(json!({"rawType": "decimal", "arguments": [
                {"kind": "TYPE", "value": scalar("bigint")}
            ]})),
        )
        .unwrap_err();
        assert!(matches!(err, TrinoLinkError::InvalidResponseType));
    }

    #[test]
    fn test_convert_scalars() {
        let c = converter("boolean", scalar("boolean"));
        assert_eq!(c.convert(&json!(true)).unwrap(), Value::Boolean(true));
        assert_eq!(c.convert(&json!(null)).unwrap(), Value::Null);
        assert!(c.convert(&json!("true")).is_err());

        let c = converter("bigint", scalar("bigint"));
        assert_eq!(c.convert(&json!(42)).unwrap(), Value::Integer(42));
        // numeric strings are not accepted for integer columns
        assert!(c.convert(&json!("42")).is_err());

        let c = converter("varchar", scalar("varchar"));
        assert_eq!(
            c.convert(&json!("hello")).unwrap(),
            Value::Varchar("hello".to_string())
        );
    }

    #[test]
    fn test_convert_floats() {
        let c = converter("double", scalar("double"));
        assert_eq!(c.convert(&json!(1.5)).unwrap(), Value::Real(1.5));
        assert!(
            matches!(c.convert(&json!("NaN")).unwrap(), Value::Real(f) if f.is_nan())
        );
        assert_eq!(
            c.convert(&json!("Infinity")).unwrap(),
            Value::Real(f64::INFINITY)
        );
        assert_eq!(
            c.convert(&json!("-Infinity")).unwrap(),
            Value::Real(f64::NEG_INFINITY)
        );
        assert_eq!(c.convert(&json!("1.25")).unwrap(), Value::Real(1.25));
        assert!(c.convert(&json!("wide")).is_err());
    }

    #[test]
    fn test_convert_varbinary() {
        let c = converter("varbinary", scalar("varbinary"));
        assert_eq!(
            c.convert(&json!("AQID")).unwrap(),
            Value::Varbinary(vec![1, 2, 3])
        );
        assert!(c.convert(&json!("!not base64!")).is_err());
    }

    #[test]
    fn test_convert_temporals() {
        let c = converter("date", scalar("date"));
        assert_eq!(
            c.convert(&json!("2024-03-07")).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap())
        );

        let c = converter("time", scalar("time"));
        assert_eq!(
            c.convert(&json!("13:04:05.123")).unwrap(),
            Value::Time(NaiveTime::from_hms_milli_opt(13, 4, 5, 123).unwrap())
        );

        let c = converter("timestamp", scalar("timestamp"));
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_nano_opt(13, 4, 5, 123_456_789)
            .unwrap();
        assert_eq!(
            c.convert(&json!("2024-03-07 13:04:05.123456789")).unwrap(),
            Value::Timestamp(expected)
        );
    }

    #[test]
    fn test_convert_timestamp_with_offset() {
        let c = converter(
            "timestamp with time zone",
            scalar("timestamp with time zone"),
        );
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();

        for raw in ["2024-03-07 13:04:05 +07:00", "2024-03-07 13:04:05+07:00"] {
            let Value::TimestampWithZone(dt) = c.convert(&json!(raw)).unwrap() else {
                panic!("expected zoned timestamp for {}", raw);
            };
            assert_eq!(dt.offset(), &offset);
            assert_eq!(dt.naive_local().to_string(), "2024-03-07 13:04:05");
        }

        // an unspaced negative offset must not be confused with date hyphens
        let Value::TimestampWithZone(dt) =
            c.convert(&json!("2024-03-07 13:04:05-05:00")).unwrap()
        else {
            panic!("expected zoned timestamp");
        };
        assert_eq!(dt.offset(), &FixedOffset::west_opt(5 * 3600).unwrap());
    }

    #[test]
    fn test_convert_timestamp_with_named_zone() {
        let c = converter(
            "timestamp with time zone",
            scalar("timestamp with time zone"),
        );
        let Value::TimestampWithZone(dt) =
            c.convert(&json!("2024-07-01 12:00:00 America/New_York")).unwrap()
        else {
            panic!("expected zoned timestamp");
        };
        // EDT in July
        assert_eq!(dt.offset(), &FixedOffset::west_opt(4 * 3600).unwrap());

        assert!(c
            .convert(&json!("2024-07-01 12:00:00 Not/AZone"))
            .is_err());
    }

    #[test]
    fn test_convert_time_with_offset() {
        let c = converter("time with time zone", scalar("time with time zone"));
        let Value::TimeWithOffset(t, offset) =
            c.convert(&json!("13:04:05.5 -03:30")).unwrap()
        else {
            panic!("expected time with offset");
        };
        assert_eq!(t, NaiveTime::from_hms_milli_opt(13, 4, 5, 500).unwrap());
        assert_eq!(offset, FixedOffset::west_opt(3 * 3600 + 1800).unwrap());
    }

    #[test]
    fn test_convert_containers() {
        let c = converter(
            "map(varchar, bigint)",
            json!({"rawType": "map", "arguments": [
                {"kind": "TYPE", "value": scalar("varchar")},
                {"kind": "TYPE", "value": scalar("bigint")}
            ]}),
        );
        assert_eq!(c.database_type_name(), "MAP(VARCHAR, BIGINT)");
        let raw = json!({"a": 1});
        assert_eq!(c.convert(&raw).unwrap(), Value::Json(raw.clone()));
        assert!(c.convert(&json!([1])).is_err());

        let c = converter(
            "array(bigint)",
            json!({"rawType": "array", "arguments": [
                {"kind": "TYPE", "value": scalar("bigint")}
            ]}),
        );
        let raw = json!([1, 2, null]);
        assert_eq!(c.convert(&raw).unwrap(), Value::Json(raw.clone()));
        assert!(c.convert(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_split_zone_heuristics() {
        assert_eq!(split_zone("2024-03-07"), ("2024-03-07", None));
        assert_eq!(split_zone("13:04:05"), ("13:04:05", None));
        assert_eq!(
            split_zone("13:04:05-07:00"),
            ("13:04:05", Some("-07:00"))
        );
        assert_eq!(
            split_zone("2024-03-07 13:04:05 UTC"),
            ("2024-03-07 13:04:05", Some("UTC"))
        );
        assert_eq!(
            split_zone("2024-03-07 13:04:05+02:00"),
            ("2024-03-07 13:04:05", Some("+02:00"))
        );
        assert_eq!(
            split_zone("2024-03-07 13:04:05-02:00"),
            ("2024-03-07 13:04:05", Some("-02:00"))
        );
    }
}
