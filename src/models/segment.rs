use crate::error::{Result, TrinoLinkError};
use serde_json::Value as JsonValue;

/// Size and position of one spooled segment.
///
/// `row_offset` and `segment_size` are mandatory; `rows_count` and
/// `uncompressed_size` default to zero, where zero `uncompressed_size`
/// means the payload is not compressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentMetadata {
    pub row_offset: i64,
    pub rows_count: i64,
    pub segment_size: i64,
    pub uncompressed_size: i64,
}

impl SegmentMetadata {
    /// Parse the `metadata` object of a segment descriptor.
    pub fn from_json(metadata: &JsonValue) -> Result<Self> {
        let map = metadata.as_object().ok_or_else(|| {
            TrinoLinkError::Protocol(
                "metadata is invalid or cannot be parsed as an object in segment".to_string(),
            )
        })?;
        Ok(Self {
            row_offset: required_i64(map, "rowOffset")?,
            segment_size: required_i64(map, "segmentSize")?,
            uncompressed_size: optional_i64(map, "uncompressedSize")?,
            // rowsCount became mandatory server-side only in Trino 475;
            // older coordinators omit it.
            rows_count: optional_i64(map, "rowsCount")?,
        })
    }
}

fn required_i64(map: &serde_json::Map<String, JsonValue>, key: &str) -> Result<i64> {
    let value = map.get(key).ok_or_else(|| {
        TrinoLinkError::Protocol(format!("{} is missing in segment metadata", key))
    })?;
    parse_i64(value, key)
}

fn optional_i64(map: &serde_json::Map<String, JsonValue>, key: &str) -> Result<i64> {
    match map.get(key) {
        None => Ok(0),
        Some(value) => parse_i64(value, key),
    }
}

fn parse_i64(value: &JsonValue, key: &str) -> Result<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().ok_or_else(|| {
            TrinoLinkError::Protocol(format!("error converting {} to an integer", key))
        }),
        _ => Err(TrinoLinkError::Protocol(format!(
            "invalid type for {} in segment metadata, expected a number",
            key
        ))),
    }
}

/// The spooling protocol envelope carried in a page's `data` object.
#[derive(Debug, Clone)]
pub struct SpoolEnvelope {
    pub encoding: String,
    pub segments: Vec<JsonValue>,
}

impl SpoolEnvelope {
    /// Parse a page's `data` object into the spool envelope.
    pub fn from_json(data: &JsonValue) -> Result<Self> {
        let encoding = data
            .get("encoding")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                TrinoLinkError::Protocol(
                    "invalid or missing 'encoding' field on spooling protocol, expected a string"
                        .to_string(),
                )
            })?
            .to_string();
        let segments = data
            .get("segments")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| {
                TrinoLinkError::Protocol(
                    "invalid or missing 'segments' field on spooling protocol, expected an array"
                        .to_string(),
                )
            })?
            .clone();
        Ok(Self { encoding, segments })
    }
}

/// A fully validated out-of-band segment descriptor, ready to download.
#[derive(Debug, Clone)]
pub struct SpooledSegment {
    pub uri: String,
    pub ack_uri: String,
    pub encoding: String,
    pub headers: Vec<(String, String)>,
    pub metadata: SegmentMetadata,
}

impl SpooledSegment {
    /// Validate a `"spooled"` segment descriptor.
    ///
    /// `uri` and `ackUri` must be present and non-empty. Header values
    /// arrive as lists; only single-valued string lists are accepted.
    pub fn from_json(
        segment: &JsonValue,
        segment_index: usize,
        metadata: SegmentMetadata,
        encoding: &str,
    ) -> Result<Self> {
        let uri = non_empty_string(segment, "uri", segment_index)?;
        let ack_uri = non_empty_string(segment, "ackUri", segment_index)?;

        let mut headers = Vec::new();
        if let Some(raw_headers) = segment.get("headers") {
            let map = raw_headers.as_object().ok_or_else(|| {
                TrinoLinkError::Protocol(format!(
                    "invalid 'headers' field in spooled segment at index {}: expected an object",
                    segment_index
                ))
            })?;
            for (name, values) in map {
                let list = values.as_array().ok_or_else(|| {
                    TrinoLinkError::Protocol(format!(
                        "unsupported value for header {}: expected a list",
                        name
                    ))
                })?;
                if list.is_empty() {
                    continue;
                }
                if list.len() > 1 {
                    return Err(TrinoLinkError::Protocol(format!(
                        "multiple values for header {}",
                        name
                    )));
                }
                let value = list[0].as_str().ok_or_else(|| {
                    TrinoLinkError::Protocol(format!(
                        "unsupported value type for header {}: expected a string",
                        name
                    ))
                })?;
                headers.push((name.clone(), value.to_string()));
            }
        }

        Ok(Self {
            uri,
            ack_uri,
            encoding: encoding.to_string(),
            headers,
            metadata,
        })
    }
}

fn non_empty_string(segment: &JsonValue, key: &str, segment_index: usize) -> Result<String> {
    match segment.get(key).and_then(JsonValue::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(TrinoLinkError::Protocol(format!(
            "missing or invalid '{}' field in spooled segment at index {}",
            key, segment_index
        ))),
    }
}
