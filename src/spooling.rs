//! The spooled-protocol segment pipeline.
//!
//! Four stages per statement, connected by bounded channels:
//!
//! - a dispatcher that validates segment descriptors and routes inline
//!   payloads straight to decoding and spooled descriptors to the download
//!   queue
//! - N downloaders fetching spooled payloads (with fire-and-forget acks)
//! - N decoders running the codec
//! - an ordered streamer that re-assembles strictly increasing row offsets
//!
//! Admission is throttled: a segment only enters the pipeline once a token
//! fits into the throttle channel (capacity = the reorder bound), and the
//! token is released when the ordered streamer emits that segment's rows.
//! Combined with the bounded stage channels this applies end-to-end
//! backpressure from the row consumer up to the dispatcher.

use crate::cancel::CancelToken;
use crate::codec;
use crate::error::{Result, TrinoLinkError};
use crate::models::{SegmentMetadata, SpoolEnvelope, SpooledSegment};
use crate::transport;
use base64::{engine::general_purpose, Engine as _};
use log::debug;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) const DEFAULT_SPOOLING_WORKER_COUNT: usize = 5;
pub(crate) const DEFAULT_MAX_OUT_OF_ORDER_SEGMENTS: usize = 10;
pub(crate) const DEFAULT_ENCODING: &str = "json";

/// Capacity of the raw segment queue ahead of the throttle.
const SEGMENT_QUEUE_CAPACITY: usize = 1000;

/// A segment descriptor awaiting validation and routing.
#[derive(Debug)]
pub(crate) struct SegmentToProcess {
    pub segment_index: usize,
    pub encoding: String,
    pub segment: JsonValue,
}

#[derive(Debug)]
struct SegmentToDecode {
    encoding: String,
    data: Vec<u8>,
    metadata: SegmentMetadata,
}

#[derive(Debug)]
struct DecodedSegment {
    row_offset: i64,
    rows: Vec<JsonValue>,
}

type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

/// Handles to a running pipeline. `rows_rx` is taken by the row stream;
/// `segments_tx` is held by the response feeder.
pub(crate) struct SpoolingPipeline {
    pub segments_tx: mpsc::Sender<SegmentToProcess>,
    pub rows_rx: mpsc::Receiver<Vec<JsonValue>>,
    pub download_cancel: CancelToken,
    pub decode_cancel: CancelToken,
    pub handles: Vec<JoinHandle<()>>,
}

/// Spawn the dispatcher, worker pools, and ordered streamer for one
/// statement.
pub(crate) fn start(
    http: reqwest::Client,
    errors_tx: mpsc::Sender<TrinoLinkError>,
    done: CancelToken,
    worker_count: usize,
    max_out_of_order: usize,
) -> SpoolingPipeline {
    let download_cancel = CancelToken::new();
    let decode_cancel = CancelToken::new();

    let (segments_tx, segments_rx) = mpsc::channel::<SegmentToProcess>(SEGMENT_QUEUE_CAPACITY);
    let (throttle_tx, throttle_rx) = mpsc::channel::<()>(max_out_of_order);
    let (spooled_tx, spooled_rx) = mpsc::channel::<SpooledSegment>(max_out_of_order);
    let (decode_tx, decode_rx) = mpsc::channel::<SegmentToDecode>(max_out_of_order);
    let (decoded_tx, decoded_rx) = mpsc::channel::<DecodedSegment>(1);
    let (rows_tx, rows_rx) = mpsc::channel::<Vec<JsonValue>>(1);

    let mut handles = Vec::new();

    handles.push(tokio::spawn(run_dispatcher(
        segments_rx,
        throttle_tx,
        decode_tx.clone(),
        spooled_tx,
        errors_tx.clone(),
        done.clone(),
    )));

    let spooled_rx: SharedReceiver<SpooledSegment> =
        Arc::new(tokio::sync::Mutex::new(spooled_rx));
    for _ in 0..worker_count {
        handles.push(tokio::spawn(run_downloader(
            http.clone(),
            spooled_rx.clone(),
            decode_tx.clone(),
            errors_tx.clone(),
            done.clone(),
            download_cancel.clone(),
        )));
    }
    // the dispatcher and downloaders hold the only decode senders
    drop(decode_tx);

    let decode_rx: SharedReceiver<SegmentToDecode> = Arc::new(tokio::sync::Mutex::new(decode_rx));
    for _ in 0..worker_count {
        handles.push(tokio::spawn(run_decoder(
            decode_rx.clone(),
            decoded_tx.clone(),
            errors_tx.clone(),
            done.clone(),
            decode_cancel.clone(),
        )));
    }
    drop(decoded_tx);

    handles.push(tokio::spawn(run_ordered_streamer(
        decoded_rx,
        rows_tx,
        throttle_rx,
        errors_tx,
        done.clone(),
        max_out_of_order,
    )));

    SpoolingPipeline {
        segments_tx,
        rows_rx,
        download_cancel,
        decode_cancel,
        handles,
    }
}

/// Parse a page's spool envelope and enqueue its segments.
pub(crate) async fn queue_segments(
    segments_tx: &mpsc::Sender<SegmentToProcess>,
    data: &JsonValue,
) -> Result<()> {
    let envelope = SpoolEnvelope::from_json(data)?;
    for (segment_index, segment) in envelope.segments.into_iter().enumerate() {
        if !segment.is_object() {
            return Err(TrinoLinkError::Protocol(format!(
                "segment at index {} is invalid: expected an object",
                segment_index
            )));
        }
        if segments_tx
            .send(SegmentToProcess {
                segment_index,
                encoding: envelope.encoding.clone(),
                segment,
            })
            .await
            .is_err()
        {
            // pipeline already torn down
            return Ok(());
        }
    }
    Ok(())
}

enum RoutedSegment {
    Inline(SegmentToDecode),
    Spooled(SpooledSegment),
}

fn classify_segment(job: &SegmentToProcess) -> Result<RoutedSegment> {
    let metadata_value = job.segment.get("metadata").ok_or_else(|| {
        TrinoLinkError::Protocol(format!(
            "metadata is missing in segment at index {}",
            job.segment_index
        ))
    })?;
    let metadata = SegmentMetadata::from_json(metadata_value)?;

    match job.segment.get("type").and_then(JsonValue::as_str) {
        Some("inline") => {
            let encoded = job
                .segment
                .get("data")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| {
                    TrinoLinkError::Protocol(format!(
                        "missing or invalid 'data' field in inline segment at index {}",
                        job.segment_index
                    ))
                })?;
            let data = general_purpose::STANDARD.decode(encoded).map_err(|e| {
                TrinoLinkError::Protocol(format!(
                    "error decoding base64 data in inline segment at index {}: {}",
                    job.segment_index, e
                ))
            })?;
            Ok(RoutedSegment::Inline(SegmentToDecode {
                encoding: job.encoding.clone(),
                data,
                metadata,
            }))
        }
        Some("spooled") => Ok(RoutedSegment::Spooled(SpooledSegment::from_json(
            &job.segment,
            job.segment_index,
            metadata,
            &job.encoding,
        )?)),
        other => Err(TrinoLinkError::Protocol(format!(
            "unsupported segment type {:?} at index {}",
            other, job.segment_index
        ))),
    }
}

async fn run_dispatcher(
    mut segments_rx: mpsc::Receiver<SegmentToProcess>,
    throttle_tx: mpsc::Sender<()>,
    decode_tx: mpsc::Sender<SegmentToDecode>,
    spooled_tx: mpsc::Sender<SpooledSegment>,
    errors_tx: mpsc::Sender<TrinoLinkError>,
    done: CancelToken,
) {
    loop {
        let job = tokio::select! {
            job = segments_rx.recv() => job,
            _ = done.cancelled() => return,
        };
        let Some(job) = job else { return };

        // Validate before reserving a throttle slot, so a rejected segment
        // never strands a token. A validation failure is published and the
        // segment is dropped; nothing with zeroed metadata flows downstream.
        let routed = match classify_segment(&job) {
            Ok(routed) => routed,
            Err(e) => {
                let _ = errors_tx.try_send(e);
                continue;
            }
        };

        // Blocks while the pipeline holds the maximum number of resident
        // segments; drained one token per ordered emission.
        tokio::select! {
            result = throttle_tx.send(()) => {
                if result.is_err() {
                    return;
                }
            }
            _ = done.cancelled() => return,
        }

        match routed {
            RoutedSegment::Inline(segment) => {
                tokio::select! {
                    result = decode_tx.send(segment) => {
                        if result.is_err() {
                            return;
                        }
                    }
                    _ = done.cancelled() => return,
                }
            }
            RoutedSegment::Spooled(segment) => {
                tokio::select! {
                    result = spooled_tx.send(segment) => {
                        if result.is_err() {
                            return;
                        }
                    }
                    _ = done.cancelled() => return,
                }
            }
        }
    }
}

async fn run_downloader(
    http: reqwest::Client,
    spooled_rx: SharedReceiver<SpooledSegment>,
    decode_tx: mpsc::Sender<SegmentToDecode>,
    errors_tx: mpsc::Sender<TrinoLinkError>,
    done: CancelToken,
    cancel: CancelToken,
) {
    loop {
        let segment = {
            let mut rx = tokio::select! {
                guard = spooled_rx.lock() => guard,
                _ = done.cancelled() => return,
                _ = cancel.cancelled() => return,
            };
            tokio::select! {
                segment = rx.recv() => segment,
                _ = done.cancelled() => return,
                _ = cancel.cancelled() => return,
            }
        };
        let Some(segment) = segment else { return };

        let data = match fetch_segment(&http, &segment, &cancel).await {
            Ok(data) => data,
            Err(e) => {
                let _ = errors_tx.try_send(e);
                return;
            }
        };

        let job = SegmentToDecode {
            encoding: segment.encoding,
            data,
            metadata: segment.metadata,
        };
        tokio::select! {
            result = decode_tx.send(job) => {
                if result.is_err() {
                    return;
                }
            }
            _ = done.cancelled() => return,
            _ = cancel.cancelled() => return,
        }
    }
}

/// Download one spooled segment, then acknowledge it with a fire-and-forget
/// GET to its ack URI.
async fn fetch_segment(
    http: &reqwest::Client,
    segment: &SpooledSegment,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let response =
        match transport::segment_round_trip(http, &segment.uri, &segment.headers, cancel).await {
            Ok(response) => response,
            Err(TrinoLinkError::Cancelled) => return Err(TrinoLinkError::Cancelled),
            Err(e) => {
                return Err(TrinoLinkError::Protocol(format!(
                    "error fetching segment from uri '{}': {}",
                    segment.uri, e
                )))
            }
        };
    let data = response.bytes().await.map_err(|e| {
        TrinoLinkError::Protocol(format!("error reading segment response body: {}", e))
    })?;

    let ack_uri = segment.ack_uri.clone();
    let mut ack = http.get(&ack_uri);
    for (name, value) in &segment.headers {
        ack = ack.header(name, value);
    }
    tokio::spawn(async move {
        if let Err(e) = ack.send().await {
            debug!("[SPOOLING] segment ack to {} failed: {}", ack_uri, e);
        }
    });

    Ok(data.to_vec())
}

async fn run_decoder(
    decode_rx: SharedReceiver<SegmentToDecode>,
    decoded_tx: mpsc::Sender<DecodedSegment>,
    errors_tx: mpsc::Sender<TrinoLinkError>,
    done: CancelToken,
    cancel: CancelToken,
) {
    loop {
        let job = {
            let mut rx = tokio::select! {
                guard = decode_rx.lock() => guard,
                _ = done.cancelled() => return,
                _ = cancel.cancelled() => return,
            };
            tokio::select! {
                job = rx.recv() => job,
                _ = done.cancelled() => return,
                _ = cancel.cancelled() => return,
            }
        };
        let Some(job) = job else { return };

        let rows = match codec::decode_segment(&job.data, &job.encoding, &job.metadata) {
            Ok(rows) => rows,
            Err(e) => {
                // a broken segment fails the statement; stop the sibling
                // decoders as well
                cancel.cancel();
                let _ = errors_tx.try_send(TrinoLinkError::Protocol(format!(
                    "failed to decode spooled segment at rowOffset {}: {}",
                    job.metadata.row_offset, e
                )));
                return;
            }
        };

        let decoded = DecodedSegment {
            row_offset: job.metadata.row_offset,
            rows,
        };
        tokio::select! {
            result = decoded_tx.send(decoded) => {
                if result.is_err() {
                    return;
                }
            }
            _ = done.cancelled() => return,
            _ = cancel.cancelled() => return,
        }
    }
}

async fn run_ordered_streamer(
    mut decoded_rx: mpsc::Receiver<DecodedSegment>,
    rows_tx: mpsc::Sender<Vec<JsonValue>>,
    mut throttle_rx: mpsc::Receiver<()>,
    errors_tx: mpsc::Sender<TrinoLinkError>,
    done: CancelToken,
    max_out_of_order: usize,
) {
    let mut buffer: Vec<DecodedSegment> = Vec::with_capacity(max_out_of_order);
    let mut next_expected_offset: i64 = 0;

    loop {
        let segment = tokio::select! {
            segment = decoded_rx.recv() => segment,
            _ = done.cancelled() => return,
        };
        // channel closed: every worker is gone, end of stream
        let Some(segment) = segment else { return };

        let arrived_offset = segment.row_offset;
        buffer.push(segment);

        if arrived_offset != next_expected_offset {
            if buffer.len() >= max_out_of_order {
                let _ = errors_tx.try_send(TrinoLinkError::Protocol(format!(
                    "all {} out-of-order segments buffered (limit: {}); the segment metadata is \
                     inconsistent (missing, duplicate, or misordered segments, or row offsets \
                     not matching the expected sequence)",
                    buffer.len(),
                    max_out_of_order
                )));
            }
            continue;
        }

        buffer.sort_by_key(|s| s.row_offset);
        let mut consumed = 0;
        while consumed < buffer.len() && buffer[consumed].row_offset == next_expected_offset {
            let rows = std::mem::take(&mut buffer[consumed].rows);
            let emitted = rows.len() as i64;
            tokio::select! {
                result = rows_tx.send(rows) => {
                    if result.is_err() {
                        return;
                    }
                }
                _ = done.cancelled() => return,
            }
            // release the reserved throttle slot
            tokio::select! {
                token = throttle_rx.recv() => {
                    if token.is_none() {
                        return;
                    }
                }
                _ = done.cancelled() => return,
            }
            next_expected_offset += emitted;
            consumed += 1;
        }
        buffer.drain(..consumed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn decoded(row_offset: i64, rows: Vec<JsonValue>) -> DecodedSegment {
        DecodedSegment { row_offset, rows }
    }

    #[tokio::test]
    async fn test_ordered_streamer_reorders_segments() {
        let bound = 10;
        let (decoded_tx, decoded_rx) = mpsc::channel(bound);
        let (rows_tx, mut rows_rx) = mpsc::channel(bound);
        let (throttle_tx, throttle_rx) = mpsc::channel::<()>(bound);
        let (errors_tx, mut errors_rx) = mpsc::channel(16);
        let done = CancelToken::new();

        let streamer = tokio::spawn(run_ordered_streamer(
            decoded_rx,
            rows_tx,
            throttle_rx,
            errors_tx,
            done.clone(),
            bound,
        ));

        // one row per segment at offsets 0..5, completing in a scrambled
        // order
        for offset in [2i64, 0, 1, 4, 3] {
            throttle_tx.send(()).await.unwrap();
            decoded_tx
                .send(decoded(offset, vec![json!([offset])]))
                .await
                .unwrap();
        }
        drop(decoded_tx);

        let mut emitted = Vec::new();
        while let Some(batch) = rows_rx.recv().await {
            emitted.push(batch[0][0].as_i64().unwrap());
        }
        assert_eq!(emitted, vec![0, 1, 2, 3, 4]);
        assert!(errors_rx.try_recv().is_err());

        // every admission token was released
        for _ in 0..bound {
            throttle_tx.try_send(()).expect("throttle must be drained");
        }

        streamer.await.unwrap();
    }

    #[tokio::test]
    async fn test_ordered_streamer_advances_by_row_count() {
        let bound = 4;
        let (decoded_tx, decoded_rx) = mpsc::channel(bound);
        let (rows_tx, mut rows_rx) = mpsc::channel(bound);
        let (throttle_tx, throttle_rx) = mpsc::channel::<()>(bound);
        let (errors_tx, _errors_rx) = mpsc::channel(16);
        let done = CancelToken::new();

        let streamer = tokio::spawn(run_ordered_streamer(
            decoded_rx,
            rows_tx,
            throttle_rx,
            errors_tx,
            done.clone(),
            bound,
        ));

        // second segment first: starts at row 2 because segment one holds
        // two rows
        throttle_tx.send(()).await.unwrap();
        decoded_tx
            .send(decoded(2, vec![json!([3]), json!([4])]))
            .await
            .unwrap();
        throttle_tx.send(()).await.unwrap();
        decoded_tx
            .send(decoded(0, vec![json!([1]), json!([2])]))
            .await
            .unwrap();
        drop(decoded_tx);

        let first = rows_rx.recv().await.unwrap();
        assert_eq!(first, vec![json!([1]), json!([2])]);
        let second = rows_rx.recv().await.unwrap();
        assert_eq!(second, vec![json!([3]), json!([4])]);
        assert!(rows_rx.recv().await.is_none());

        streamer.await.unwrap();
    }

    #[tokio::test]
    async fn test_ordered_streamer_exhaustion() {
        let bound = 2;
        let (decoded_tx, decoded_rx) = mpsc::channel(bound);
        let (rows_tx, _rows_rx) = mpsc::channel(bound);
        let (throttle_tx, throttle_rx) = mpsc::channel::<()>(bound);
        let (errors_tx, mut errors_rx) = mpsc::channel(16);
        let done = CancelToken::new();

        tokio::spawn(run_ordered_streamer(
            decoded_rx,
            rows_tx,
            throttle_rx,
            errors_tx,
            done.clone(),
            bound,
        ));

        // neither segment carries the expected offset 0
        for offset in [5i64, 10] {
            throttle_tx.send(()).await.unwrap();
            decoded_tx
                .send(decoded(offset, vec![json!([offset])]))
                .await
                .unwrap();
        }

        let err = tokio::time::timeout(Duration::from_secs(1), errors_rx.recv())
            .await
            .expect("expected an exhaustion error")
            .unwrap();
        assert!(err
            .to_string()
            .contains("all 2 out-of-order segments buffered"));
        done.cancel();
    }

    #[tokio::test]
    async fn test_dispatcher_routes_inline_segments() {
        let (segments_tx, segments_rx) = mpsc::channel(4);
        let (throttle_tx, mut throttle_rx) = mpsc::channel::<()>(4);
        let (decode_tx, mut decode_rx) = mpsc::channel(4);
        let (spooled_tx, _spooled_rx) = mpsc::channel(4);
        let (errors_tx, _errors_rx) = mpsc::channel(16);
        let done = CancelToken::new();

        tokio::spawn(run_dispatcher(
            segments_rx,
            throttle_tx,
            decode_tx,
            spooled_tx,
            errors_tx,
            done.clone(),
        ));

        let rows = r#"[[1]]"#;
        let encoded = general_purpose::STANDARD.encode(rows);
        segments_tx
            .send(SegmentToProcess {
                segment_index: 0,
                encoding: "json".to_string(),
                segment: json!({
                    "type": "inline",
                    "data": encoded,
                    "metadata": {"rowOffset": 0, "segmentSize": rows.len()}
                }),
            })
            .await
            .unwrap();

        let job = tokio::time::timeout(Duration::from_secs(1), decode_rx.recv())
            .await
            .expect("inline segment must reach the decoder queue")
            .unwrap();
        assert_eq!(job.data, rows.as_bytes());
        assert_eq!(job.metadata.row_offset, 0);
        // one throttle token was consumed
        assert!(throttle_rx.try_recv().is_ok());
        done.cancel();
    }

    #[tokio::test]
    async fn test_dispatcher_rejects_invalid_metadata_without_consuming_a_token() {
        let (segments_tx, segments_rx) = mpsc::channel(4);
        let (throttle_tx, mut throttle_rx) = mpsc::channel::<()>(4);
        let (decode_tx, _decode_rx) = mpsc::channel(4);
        let (spooled_tx, _spooled_rx) = mpsc::channel(4);
        let (errors_tx, mut errors_rx) = mpsc::channel(16);
        let done = CancelToken::new();

        tokio::spawn(run_dispatcher(
            segments_rx,
            throttle_tx,
            decode_tx,
            spooled_tx,
            errors_tx,
            done.clone(),
        ));

        segments_tx
            .send(SegmentToProcess {
                segment_index: 7,
                encoding: "json".to_string(),
                segment: json!({"type": "inline", "data": ""}),
            })
            .await
            .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), errors_rx.recv())
            .await
            .expect("expected a metadata error")
            .unwrap();
        assert!(err.to_string().contains("metadata is missing in segment at index 7"));
        assert!(throttle_rx.try_recv().is_err());
        done.cancel();
    }

    #[tokio::test]
    async fn test_queue_segments_validates_envelope() {
        let (segments_tx, mut segments_rx) = mpsc::channel(4);

        let err = queue_segments(&segments_tx, &json!({"segments": []}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'encoding'"));

        queue_segments(
            &segments_tx,
            &json!({"encoding": "json", "segments": [{"type": "inline"}, {"type": "spooled"}]}),
        )
        .await
        .unwrap();
        assert_eq!(segments_rx.recv().await.unwrap().segment_index, 0);
        assert_eq!(segments_rx.recv().await.unwrap().segment_index, 1);
    }
}
