//! Segment payload decompression and decoding.
//!
//! Segments arrive as `json`, `json+zstd`, or `json+lz4` payloads. Sizes are
//! checked exactly on both sides of decompression: the raw payload must match
//! `segmentSize`, and the decompressed bytes must match `uncompressedSize`.

use crate::error::{Result, TrinoLinkError};
use crate::models::SegmentMetadata;
use serde_json::Value as JsonValue;

/// Decompress a segment payload according to its declared encoding.
///
/// An `uncompressedSize` of zero means the payload is stored uncompressed
/// and is returned as-is.
pub(crate) fn decompress_segment(
    data: &[u8],
    encoding: &str,
    metadata: &SegmentMetadata,
) -> Result<Vec<u8>> {
    if metadata.uncompressed_size == 0 {
        return Ok(data.to_vec());
    }

    let decompressed = match encoding {
        "json+zstd" => zstd::stream::decode_all(data).map_err(|e| {
            TrinoLinkError::Protocol(format!(
                "failed to decompress zstd segment at rowOffset {}: {}",
                metadata.row_offset, e
            ))
        })?,
        "json+lz4" => {
            lz4_flex::block::decompress(data, metadata.uncompressed_size as usize).map_err(
                |e| {
                    TrinoLinkError::Protocol(format!(
                        "failed to decompress LZ4 segment at rowOffset {}: {}",
                        metadata.row_offset, e
                    ))
                },
            )?
        }
        other => {
            return Err(TrinoLinkError::Protocol(format!(
                "unsupported segment encoding: {}",
                other
            )))
        }
    };

    if decompressed.len() as i64 != metadata.uncompressed_size {
        return Err(TrinoLinkError::Protocol(format!(
            "decompressed size mismatch: expected {} bytes, got {} bytes",
            metadata.uncompressed_size,
            decompressed.len()
        )));
    }
    Ok(decompressed)
}

/// Decode a raw segment payload into its rows.
pub(crate) fn decode_segment(
    data: &[u8],
    encoding: &str,
    metadata: &SegmentMetadata,
) -> Result<Vec<JsonValue>> {
    if data.len() as i64 != metadata.segment_size {
        return Err(TrinoLinkError::Protocol(format!(
            "segment size mismatch: expected {} bytes, got {} bytes",
            metadata.segment_size,
            data.len()
        )));
    }

    let decompressed = decompress_segment(data, encoding, metadata)?;
    let rows: Vec<JsonValue> = serde_json::from_slice(&decompressed).map_err(|e| {
        TrinoLinkError::Protocol(format!(
            "failed to decode segment rows at rowOffset {}: {}",
            metadata.row_offset, e
        ))
    })?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(segment_size: i64, uncompressed_size: i64) -> SegmentMetadata {
        SegmentMetadata {
            row_offset: 0,
            rows_count: 0,
            segment_size,
            uncompressed_size,
        }
    }

    const ROWS: &str = r#"[[1,"a"],[2,"b"]]"#;

    #[test]
    fn test_decode_uncompressed() {
        let data = ROWS.as_bytes();
        let rows = decode_segment(data, "json", &metadata(data.len() as i64, 0)).unwrap();
        assert_eq!(rows, vec![json!([1, "a"]), json!([2, "b"])]);
    }

    #[test]
    fn test_decode_zstd() {
        let compressed = zstd::stream::encode_all(ROWS.as_bytes(), 3).unwrap();
        let rows = decode_segment(
            &compressed,
            "json+zstd",
            &metadata(compressed.len() as i64, ROWS.len() as i64),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_decode_lz4() {
        let compressed = lz4_flex::block::compress(ROWS.as_bytes());
        let rows = decode_segment(
            &compressed,
            "json+lz4",
            &metadata(compressed.len() as i64, ROWS.len() as i64),
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_segment_size_mismatch() {
        let data = ROWS.as_bytes();
        let err = decode_segment(data, "json", &metadata(data.len() as i64 + 1, 0)).unwrap_err();
        assert!(err.to_string().contains("segment size mismatch"));
    }

    #[test]
    fn test_decompressed_size_mismatch() {
        let compressed = zstd::stream::encode_all(ROWS.as_bytes(), 3).unwrap();
        let err = decode_segment(
            &compressed,
            "json+zstd",
            &metadata(compressed.len() as i64, ROWS.len() as i64 + 5),
        )
        .unwrap_err();
        assert!(err.to_string().contains("decompressed size mismatch"));
    }

    #[test]
    fn test_unsupported_encoding() {
        let err = decompress_segment(b"abc", "json+snappy", &metadata(3, 10)).unwrap_err();
        assert!(err.to_string().contains("unsupported segment encoding"));
    }

    #[test]
    fn test_plain_json_with_nonzero_uncompressed_size_is_rejected() {
        let data = ROWS.as_bytes();
        let err =
            decompress_segment(data, "json", &metadata(data.len() as i64, data.len() as i64))
                .unwrap_err();
        assert!(err.to_string().contains("unsupported segment encoding"));
    }

    #[test]
    fn test_numeric_fidelity() {
        let data = r#"[[9007199254740993]]"#.as_bytes();
        let rows = decode_segment(data, "json", &metadata(data.len() as i64, 0)).unwrap();
        // 2^53 + 1 survives only if integers are not routed through f64.
        assert_eq!(rows[0][0].as_i64(), Some(9_007_199_254_740_993));
    }
}
