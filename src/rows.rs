//! The row stream returned by query execution.
//!
//! Rows arrive either inline with each page (direct protocol) or through
//! the spooling pipeline's ordered channel. Columns are resolved lazily
//! from the first page that carries them. Closing the stream before end of
//! stream cancels the query server-side with a bounded timeout that
//! survives caller cancellation.

use crate::cancel::CancelToken;
use crate::client::Connection;
use crate::config::DEFAULT_CANCEL_QUERY_TIMEOUT;
use crate::convert::{ScanKind, TypeConverter};
use crate::error::{Result, TrinoLinkError};
use crate::models::QueryResults;
use crate::progress::ProgressTracker;
use crate::session::HEADER_USER;
use crate::spooling::{self, SpoolingPipeline};
use crate::value::Value;
use log::debug;
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Resolved metadata for one result column.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    /// Raw type string as reported by the server
    pub type_name: String,
    /// Upper-cased type name; container types keep their full raw string
    pub database_type_name: String,
    pub scan_kind: ScanKind,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
    pub size: Option<i64>,
}

enum FetchOutcome {
    Page,
    SpoolingStarted,
    Eof,
}

struct SpoolState {
    rows_rx: mpsc::Receiver<Vec<JsonValue>>,
    download_cancel: CancelToken,
    decode_cancel: CancelToken,
}

/// A streaming query result.
pub struct Rows {
    conn: Arc<Connection>,
    query_id: String,
    user: String,
    update_count: i64,

    done: CancelToken,
    errors_tx: mpsc::Sender<TrinoLinkError>,
    errors_rx: mpsc::Receiver<TrinoLinkError>,
    query_rx: Option<mpsc::Receiver<QueryResults>>,
    progress: Option<Arc<ProgressTracker>>,
    spooling_worker_count: usize,
    max_out_of_order_segments: usize,

    columns: Vec<ColumnInfo>,
    converters: Vec<TypeConverter>,
    data: Vec<JsonValue>,
    row_index: usize,
    spool: Option<SpoolState>,

    at_end: bool,
    err: Option<TrinoLinkError>,
    closed: bool,
    handles: Vec<JoinHandle<()>>,
}

impl Rows {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        conn: Arc<Connection>,
        submitted: QueryResults,
        user: String,
        done: CancelToken,
        errors_tx: mpsc::Sender<TrinoLinkError>,
        errors_rx: mpsc::Receiver<TrinoLinkError>,
        query_rx: mpsc::Receiver<QueryResults>,
        progress: Option<Arc<ProgressTracker>>,
        spooling_worker_count: usize,
        max_out_of_order_segments: usize,
        handles: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            conn,
            query_id: submitted.id,
            user,
            update_count: submitted.update_count,
            done,
            errors_tx,
            errors_rx,
            query_rx: Some(query_rx),
            progress,
            spooling_worker_count,
            max_out_of_order_segments,
            columns: Vec::new(),
            converters: Vec::new(),
            data: Vec::new(),
            row_index: 0,
            spool: None,
            at_end: false,
            err: None,
            closed: false,
            handles,
        }
    }

    /// The server-assigned query id.
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Rows affected, for update statements.
    pub fn update_count(&self) -> i64 {
        self.update_count
    }

    /// Resolved column metadata. Drives the paging loop until the first
    /// page carrying a column list has been seen.
    pub async fn columns(&mut self) -> Result<&[ColumnInfo]> {
        if self.columns.is_empty()
            && self.err.is_none()
            && !self.at_end
            && self.spool.is_none()
            && self.data.is_empty()
        {
            match self.fetch().await {
                Ok(FetchOutcome::Eof) => self.at_end = true,
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(&self.columns)
    }

    /// Pull the next converted row, or `None` at end of stream.
    pub async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if let Some(e) = &self.err {
            return Err(e.clone());
        }
        if self.at_end {
            return Ok(None);
        }

        while self.row_index >= self.data.len() {
            if self.spool.is_some() {
                if !self.fill_from_spool().await? {
                    self.at_end = true;
                    return Ok(None);
                }
            } else {
                match self.fetch().await? {
                    FetchOutcome::Eof => {
                        self.at_end = true;
                        return Ok(None);
                    }
                    FetchOutcome::Page | FetchOutcome::SpoolingStarted => {}
                }
            }
        }

        let raw_row = match self.data[self.row_index].as_array() {
            Some(row) => row,
            None => {
                let e = TrinoLinkError::Protocol(format!(
                    "unexpected shape for row at index {}: expected an array",
                    self.row_index
                ));
                self.err = Some(e.clone());
                return Err(e);
            }
        };

        let mut row = Vec::with_capacity(self.converters.len());
        for (converter, cell) in self.converters.iter().zip(raw_row) {
            match converter.convert(cell) {
                Ok(value) => row.push(value),
                Err(e) => {
                    self.err = Some(e.clone());
                    return Err(e);
                }
            }
        }
        self.row_index += 1;
        Ok(Some(row))
    }

    /// Close the stream. Unless the stream already reached its end, the
    /// query is cancelled server-side via `DELETE /v1/query/{id}` with its
    /// own 30 s timeout.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let finished = self.at_end;
        self.at_end = true;

        self.done.cancel();
        if let Some(spool) = &self.spool {
            spool.download_cancel.cancel();
            spool.decode_cancel.cancel();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }

        if finished || self.query_id.is_empty() {
            // close after end of stream is a no-op; no cancellation request
            return Ok(());
        }
        self.cancel_query().await
    }

    async fn cancel_query(&self) -> Result<()> {
        let mut url = reqwest::Url::parse(&self.conn.base_url)
            .map_err(|e| TrinoLinkError::Configuration(format!("malformed base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                TrinoLinkError::Configuration("base url cannot carry a path".to_string())
            })?
            .extend(["v1", "query", self.query_id.as_str()]);

        let mut headers = Vec::new();
        if !self.user.is_empty() {
            headers.push((HEADER_USER.to_string(), self.user.clone()));
        }

        // Decoupled from the statement's cancellation so server-side
        // cleanup still happens after the caller has given up.
        let cancel = CancelToken::new();
        let deadline = tokio::time::Instant::now() + DEFAULT_CANCEL_QUERY_TIMEOUT;
        match self
            .conn
            .transport
            .round_trip(Method::DELETE, url.as_str(), None, &headers, &cancel, deadline)
            .await
        {
            Ok(_) => Ok(()),
            Err(TrinoLinkError::QueryFailed {
                status_code: 204, ..
            }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Direct-protocol page fetch; also detects spooling activation on the
    /// first data-carrying page.
    async fn fetch(&mut self) -> Result<FetchOutcome> {
        loop {
            enum Event {
                Page(Box<QueryResults>),
                PagesClosed,
                Err(Option<TrinoLinkError>),
            }
            let event = {
                let query_rx = self
                    .query_rx
                    .as_mut()
                    .expect("query channel present before spooling takes over");
                tokio::select! {
                    results = query_rx.recv() => match results {
                        Some(results) => Event::Page(Box::new(results)),
                        None => Event::PagesClosed,
                    },
                    err = self.errors_rx.recv() => Event::Err(err),
                }
            };

            let mut results = match event {
                Event::PagesClosed => {
                    // an error is always published before the worker exit
                    // that closes the page channel; do not mistake a failed
                    // stream for a clean end
                    if let Ok(e) = self.errors_rx.try_recv() {
                        return Err(self.fail(e).await);
                    }
                    return Ok(FetchOutcome::Eof);
                }
                Event::Err(None) => return Ok(FetchOutcome::Eof),
                Event::Err(Some(e)) => return Err(self.fail(e).await),
                Event::Page(results) => results,
            };
            if results.id.is_empty() {
                return Ok(FetchOutcome::Eof);
            }

            if let Err(e) = self.init_columns(&results) {
                return Err(self.fail(e).await);
            }
            self.row_index = 0;

            match results.data.take() {
                Some(JsonValue::Array(rows)) => self.data = rows,
                Some(data @ JsonValue::Object(_)) => {
                    self.update_count = results.update_count;
                    if let Some(progress) = &self.progress {
                        progress.schedule(&results.id, &results.stats);
                    }
                    if let Err(e) = self.start_spooling(data).await {
                        return Err(self.fail(e).await);
                    }
                    return Ok(FetchOutcome::SpoolingStarted);
                }
                Some(other) => {
                    let e = TrinoLinkError::Protocol(format!(
                        "unexpected data shape in response {}: expected rows or a spool \
                         envelope, got {}",
                        results.id, other
                    ));
                    return Err(self.fail(e).await);
                }
                None => self.data = Vec::new(),
            }

            self.update_count = results.update_count;
            if let Some(progress) = &self.progress {
                progress.schedule(&results.id, &results.stats);
            }
            if !self.data.is_empty() {
                return Ok(FetchOutcome::Page);
            }
        }
    }

    /// Start the spooling pipeline, queue the activating envelope, and hand
    /// the remaining pages to a feeder task.
    async fn start_spooling(&mut self, data: JsonValue) -> Result<()> {
        debug!(
            "[SPOOLING] activating pipeline for query {} ({} workers, {} out-of-order bound)",
            self.query_id, self.spooling_worker_count, self.max_out_of_order_segments
        );
        let SpoolingPipeline {
            segments_tx,
            rows_rx,
            download_cancel,
            decode_cancel,
            handles,
        } = spooling::start(
            self.conn.raw_http.clone(),
            self.errors_tx.clone(),
            self.done.clone(),
            self.spooling_worker_count,
            self.max_out_of_order_segments,
        );
        self.handles.extend(handles);
        self.spool = Some(SpoolState {
            rows_rx,
            download_cancel,
            decode_cancel,
        });

        spooling::queue_segments(&segments_tx, &data).await?;

        let mut query_rx = self
            .query_rx
            .take()
            .expect("query channel present when spooling starts");
        let errors_tx = self.errors_tx.clone();
        let progress = self.progress.clone();
        let done = self.done.clone();
        self.handles.push(tokio::spawn(async move {
            loop {
                let results = tokio::select! {
                    results = query_rx.recv() => results,
                    _ = done.cancelled() => return,
                };
                // dropping segments_tx closes the pipeline stage by stage
                let Some(results) = results else { return };
                if results.id.is_empty() {
                    return;
                }

                match &results.data {
                    Some(data @ JsonValue::Object(_)) => {
                        if let Err(e) = spooling::queue_segments(&segments_tx, data).await {
                            let _ = errors_tx.try_send(e);
                        }
                    }
                    // status-only page
                    None => {}
                    Some(other) => {
                        let _ = errors_tx.try_send(TrinoLinkError::Protocol(format!(
                            "unexpected data shape in response {}: expected a spool envelope, \
                             got {}",
                            results.id, other
                        )));
                    }
                }
                if let Some(progress) = &progress {
                    progress.schedule(&results.id, &results.stats);
                }
            }
        }));
        Ok(())
    }

    /// Receive the next ordered row batch; `false` means end of stream.
    async fn fill_from_spool(&mut self) -> Result<bool> {
        enum Event {
            Rows(Vec<JsonValue>),
            Closed,
            Err(Option<TrinoLinkError>),
        }
        let event = {
            let spool = self.spool.as_mut().expect("spooling state present");
            tokio::select! {
                batch = spool.rows_rx.recv() => match batch {
                    Some(rows) => Event::Rows(rows),
                    None => Event::Closed,
                },
                err = self.errors_rx.recv() => Event::Err(err),
            }
        };
        match event {
            Event::Rows(rows) => {
                self.data = rows;
                self.row_index = 0;
                Ok(true)
            }
            Event::Closed => {
                // a failed worker publishes its error before exiting, which
                // is what closed the channel; surface it instead of EOF
                if let Ok(e) = self.errors_rx.try_recv() {
                    return Err(self.fail(e).await);
                }
                Ok(false)
            }
            Event::Err(None) => Ok(false),
            Event::Err(Some(e)) => Err(self.fail(e).await),
        }
    }

    /// Record a statement failure: cancel the pipeline scopes, and for
    /// cancellation/timeout also cancel the query server-side.
    async fn fail(&mut self, e: TrinoLinkError) -> TrinoLinkError {
        if let Some(spool) = &self.spool {
            spool.download_cancel.cancel();
            spool.decode_cancel.cancel();
        }
        if matches!(e, TrinoLinkError::Cancelled | TrinoLinkError::Timeout(_)) {
            let _ = self.close().await;
        }
        self.err = Some(e.clone());
        e
    }

    fn init_columns(&mut self, results: &QueryResults) -> Result<()> {
        if !self.converters.is_empty() || results.columns.is_empty() {
            return Ok(());
        }
        for column in &results.columns {
            let converter = TypeConverter::new(&column.type_name, &column.type_signature)?;
            self.columns.push(ColumnInfo {
                name: column.name.clone(),
                type_name: column.type_name.clone(),
                database_type_name: converter.database_type_name(),
                scan_kind: converter.scan_kind(),
                precision: converter.precision(),
                scale: converter.scale(),
                size: converter.size(),
            });
            self.converters.push(converter);
        }
        Ok(())
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        // best-effort teardown; close() does the orderly version
        self.done.cancel();
        if let Some(spool) = &self.spool {
            spool.download_cancel.cancel();
            spool.decode_cancel.cancel();
        }
    }
}
