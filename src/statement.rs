//! Statement execution: query rewrite, submission, and the paging loop.
//!
//! A statement POSTs to `/v1/statement` and then runs two cooperative tasks
//! bound to its lifetime: a fetcher that turns continuation URIs into HTTP
//! responses, and a parser that decodes responses, maps server errors, and
//! feeds the next URI back to the fetcher. The decoded pages flow to the
//! row stream through a bounded channel.

use crate::cancel::CancelToken;
use crate::client::Connection;
use crate::error::{Result, TrinoLinkError};
use crate::models::{ErrorDetail, QueryResults};
use crate::progress::{ProgressTracker, ProgressUpdater};
use crate::rows::Rows;
use crate::serial::{quote_string, serialize_literal};
use crate::session::{
    query_escape, HEADER_AUTHORIZATION, HEADER_CLIENT_CAPABILITIES, HEADER_PREPARED_STATEMENT,
    HEADER_QUERY_DATA_ENCODING, HEADER_USER, PREPARED_STATEMENT_NAME, TRINO_HEADER_PREFIX,
};
use crate::spooling::{
    DEFAULT_ENCODING, DEFAULT_MAX_OUT_OF_ORDER_SEGMENTS, DEFAULT_SPOOLING_WORKER_COUNT,
};
use crate::value::Value;
use log::debug;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Server capability requested with every statement, so timestamps keep
/// their full precision instead of being truncated to millis.
const CLIENT_CAPABILITIES: &str = "PARAMETRIC_DATETIME";

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Per-query options.
///
/// # Examples
///
/// ```rust,no_run
/// use trino_link::QueryOptions;
///
/// let options = QueryOptions::new()
///     .encoding("json+zstd")
///     .spooling_worker_count(8)
///     .max_out_of_order_segments(16)
///     .header("X-Trino-Trace-Token", "abc123");
/// ```
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub(crate) progress_updater: Option<Arc<dyn ProgressUpdater>>,
    pub(crate) progress_period: Option<Duration>,
    pub(crate) access_token: Option<String>,
    pub(crate) encoding: Option<String>,
    pub(crate) spooling_worker_count: Option<usize>,
    pub(crate) max_out_of_order_segments: Option<usize>,
    pub(crate) headers: Vec<(String, String)>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a progress callback sink. Must be paired with
    /// [`progress_period`](Self::progress_period).
    pub fn progress_updater(mut self, updater: Arc<dyn ProgressUpdater>) -> Self {
        self.progress_updater = Some(updater);
        self
    }

    /// Minimum interval between progress callbacks. Must be paired with
    /// [`progress_updater`](Self::progress_updater).
    pub fn progress_period(mut self, period: Duration) -> Self {
        self.progress_period = Some(period);
        self
    }

    /// Send `Authorization: Bearer <token>` for this query only. Requires
    /// `forwardAuthorizationHeader` on the connection.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Request a specific result encoding (`json`, `json+zstd`, `json+lz4`).
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Number of download and decode workers for the spooling pipeline.
    pub fn spooling_worker_count(mut self, count: usize) -> Self {
        self.spooling_worker_count = Some(count);
        self
    }

    /// Bound on decoded-but-unemitted segments in the reorder buffer.
    pub fn max_out_of_order_segments(mut self, count: usize) -> Self {
        self.max_out_of_order_segments = Some(count);
        self
    }

    /// Attach an extra request header; the name must start with `X-Trino-`.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Map a decoded response's error field to the client error model.
pub(crate) fn response_error(status_code: u16, error: &Option<ErrorDetail>) -> Result<()> {
    match error {
        None => Ok(()),
        Some(detail) if detail.error_name.is_empty() => Ok(()),
        Some(detail) if detail.error_name == "USER_CANCELLED" => Err(TrinoLinkError::Cancelled),
        Some(detail) => Err(TrinoLinkError::Server {
            status_code,
            error: detail.clone(),
        }),
    }
}

/// Execute a query and return its row stream.
pub(crate) async fn execute_query(
    conn: Arc<Connection>,
    query: &str,
    params: &[Value],
    options: QueryOptions,
) -> Result<Rows> {
    if options.progress_updater.is_some() != options.progress_period.is_some() {
        return Err(TrinoLinkError::InvalidProgressCallback);
    }
    let worker_count = options
        .spooling_worker_count
        .unwrap_or(DEFAULT_SPOOLING_WORKER_COUNT);
    let max_out_of_order = options
        .max_out_of_order_segments
        .unwrap_or(DEFAULT_MAX_OUT_OF_ORDER_SEGMENTS);
    if worker_count > max_out_of_order {
        return Err(TrinoLinkError::Configuration(format!(
            "spooling worker count cannot be greater than the allowed out-of-order segments; \
             workers: {}, allowed out of order segments: {}",
            worker_count, max_out_of_order
        )));
    }
    if options.access_token.is_some() && !conn.forward_authorization_header {
        return Err(TrinoLinkError::Configuration(
            "per-query access tokens require forwardAuthorizationHeader on the connection"
                .to_string(),
        ));
    }

    let mut extra_headers: Vec<(String, String)> = Vec::new();
    extra_headers.push((
        HEADER_CLIENT_CAPABILITIES.to_string(),
        CLIENT_CAPABILITIES.to_string(),
    ));
    extra_headers.push((
        HEADER_QUERY_DATA_ENCODING.to_string(),
        options
            .encoding
            .clone()
            .unwrap_or_else(|| DEFAULT_ENCODING.to_string()),
    ));
    if let Some(token) = &options.access_token {
        extra_headers.push((HEADER_AUTHORIZATION.to_string(), format!("Bearer {}", token)));
    }

    // Passthrough headers; an X-Trino-User override also becomes the
    // statement user carried by paging and cancellation requests.
    let mut statement_user = conn.user.clone().unwrap_or_default();
    for (name, value) in &options.headers {
        if !name.starts_with(TRINO_HEADER_PREFIX) {
            return Err(TrinoLinkError::Configuration(format!(
                "query headers must start with {}: {}",
                TRINO_HEADER_PREFIX, name
            )));
        }
        if name == HEADER_USER {
            statement_user = value.clone();
        }
        extra_headers.push((name.clone(), value.clone()));
    }

    let final_query = bind_parameters(&conn, query, params, &mut extra_headers)?;

    let done = CancelToken::new();
    let deadline = tokio::time::Instant::now() + conn.query_timeout;

    debug!(
        "[STATEMENT] posting query ({} bytes, {} bound parameters)",
        final_query.len(),
        params.len()
    );
    let response = conn
        .transport
        .round_trip(
            Method::POST,
            &format!("{}/v1/statement", conn.base_url),
            Some(final_query),
            &extra_headers,
            &done,
            deadline,
        )
        .await?;
    let status_code = response.status().as_u16();
    let body = response.bytes().await?;
    let submitted: QueryResults = serde_json::from_slice(&body)?;

    let progress = options.progress_updater.clone().map(|updater| {
        ProgressTracker::start(
            updater,
            options.progress_period.unwrap_or_default(),
            done.clone(),
        )
    });
    if let Some(tracker) = &progress {
        tracker.report_initial(&submitted.id, &submitted.stats);
    }

    if let Err(e) = response_error(status_code, &submitted.error) {
        done.cancel();
        return Err(e);
    }

    let (errors_tx, errors_rx) = mpsc::channel::<TrinoLinkError>(ERROR_CHANNEL_CAPACITY);
    let (next_uri_tx, next_uri_rx) = mpsc::channel::<String>(1);
    let (http_tx, http_rx) = mpsc::channel::<reqwest::Response>(1);
    let (query_tx, query_rx) = mpsc::channel::<QueryResults>(1);

    let mut handles = Vec::new();
    handles.push(tokio::spawn(run_fetcher(
        conn.clone(),
        statement_user.clone(),
        next_uri_rx,
        http_tx,
        errors_tx.clone(),
        done.clone(),
        deadline,
    )));
    handles.push(tokio::spawn(run_parser(
        http_rx,
        next_uri_tx.clone(),
        query_tx,
        errors_tx.clone(),
        done.clone(),
    )));

    // Seed the fetcher/parser cycle with the first continuation URI. An
    // empty URI terminates the cycle immediately (a statement with no
    // result pages).
    let _ = next_uri_tx.send(submitted.next_uri.clone()).await;

    Ok(Rows::new(
        conn,
        submitted,
        statement_user,
        done,
        errors_tx,
        errors_rx,
        query_rx,
        progress,
        worker_count,
        max_out_of_order,
        handles,
    ))
}

/// Rewrite the query for parameter binding and collect the headers it
/// needs. With explicit prepare the query becomes
/// `EXECUTE _trino_link USING <literals>` and the prepared statement rides
/// along in a header; otherwise the original text is inlined through
/// `EXECUTE IMMEDIATE`.
fn bind_parameters(
    conn: &Connection,
    query: &str,
    params: &[Value],
    extra_headers: &mut Vec<(String, String)>,
) -> Result<String> {
    if params.is_empty() {
        return Ok(query.to_string());
    }

    let literals: Vec<String> = params.iter().map(serialize_literal).collect::<Result<_>>()?;

    if conn.explicit_prepare {
        // Per-call headers replace the connection values for their name, so
        // the accumulated prepared statements are carried over explicitly.
        for value in conn.transport.session_values(HEADER_PREPARED_STATEMENT) {
            extra_headers.push((HEADER_PREPARED_STATEMENT.to_string(), value));
        }
        extra_headers.push((
            HEADER_PREPARED_STATEMENT.to_string(),
            format!("{}={}", PREPARED_STATEMENT_NAME, query_escape(query)),
        ));
        Ok(format!(
            "EXECUTE {} USING {}",
            PREPARED_STATEMENT_NAME,
            literals.join(", ")
        ))
    } else {
        Ok(format!(
            "EXECUTE IMMEDIATE {} USING {}",
            quote_string(query),
            literals.join(", ")
        ))
    }
}

async fn run_fetcher(
    conn: Arc<Connection>,
    user: String,
    mut next_uri_rx: mpsc::Receiver<String>,
    http_tx: mpsc::Sender<reqwest::Response>,
    errors_tx: mpsc::Sender<TrinoLinkError>,
    done: CancelToken,
    deadline: tokio::time::Instant,
) {
    loop {
        let uri = tokio::select! {
            uri = next_uri_rx.recv() => uri,
            _ = done.cancelled() => return,
        };
        let Some(uri) = uri else { return };
        if uri.is_empty() {
            return;
        }

        let headers = vec![(HEADER_USER.to_string(), user.clone())];
        let response = match conn
            .transport
            .round_trip(Method::GET, &uri, None, &headers, &done, deadline)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let _ = errors_tx.try_send(e);
                return;
            }
        };

        tokio::select! {
            result = http_tx.send(response) => {
                if result.is_err() {
                    return;
                }
            }
            _ = done.cancelled() => return,
        }
    }
}

async fn run_parser(
    mut http_rx: mpsc::Receiver<reqwest::Response>,
    next_uri_tx: mpsc::Sender<String>,
    query_tx: mpsc::Sender<QueryResults>,
    errors_tx: mpsc::Sender<TrinoLinkError>,
    done: CancelToken,
) {
    loop {
        let response = tokio::select! {
            response = http_rx.recv() => response,
            _ = done.cancelled() => return,
        };
        let Some(response) = response else { return };

        let status_code = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                let _ = errors_tx.try_send(e.into());
                return;
            }
        };
        let results: QueryResults = match serde_json::from_slice(&body) {
            Ok(results) => results,
            Err(e) => {
                let _ = errors_tx.try_send(e.into());
                return;
            }
        };
        if let Err(e) = response_error(status_code, &results.error) {
            let _ = errors_tx.try_send(e);
            return;
        }

        // publish the continuation back to the fetcher before handing the
        // page to the consumer, keeping the cycle driving itself
        tokio::select! {
            result = next_uri_tx.send(results.next_uri.clone()) => {
                if result.is_err() {
                    return;
                }
            }
            _ = done.cancelled() => return,
        }
        tokio::select! {
            result = query_tx.send(results) => {
                if result.is_err() {
                    return;
                }
            }
            _ = done.cancelled() => return,
        }
    }
}
