//! Error types for trino-link client operations.
//!
//! Provides a single error enum covering configuration, transport, protocol,
//! and server-reported failure scenarios, plus the dedicated cancellation
//! variant surfaced when a query is cancelled by the caller or the server.

use crate::models::ErrorDetail;
use std::fmt;

/// Result type alias using [`TrinoLinkError`]
pub type Result<T> = std::result::Result<T, TrinoLinkError>;

/// Errors that can occur during trino-link operations.
///
/// # Examples
///
/// ```rust,no_run
/// use trino_link::{TrinoLinkClient, TrinoLinkError};
///
/// # async fn example() -> trino_link::Result<()> {
/// let client = TrinoLinkClient::from_dsn("http://user@localhost:8080?catalog=tpch")?;
///
/// match client.query("SELECT 1", Vec::new()).await {
///     Ok(rows) => println!("query id: {}", rows.query_id()),
///     Err(TrinoLinkError::QueryFailed { status_code, reason }) => {
///         eprintln!("query failed ({}): {}", status_code, reason);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum TrinoLinkError {
    /// Invalid configuration (malformed DSN, conflicting options)
    Configuration(String),

    /// An HTTP round trip failed, or the server answered with an
    /// unexpected status code
    QueryFailed {
        /// HTTP status code, 0 when the request never completed
        status_code: u16,
        /// Failure cause or truncated response body
        reason: String,
    },

    /// The server reported a structured query error
    Server {
        /// HTTP status code of the carrying response
        status_code: u16,
        /// Structured error returned by the coordinator
        error: ErrorDetail,
    },

    /// Protocol violation: malformed spool envelopes, missing or invalid
    /// segment metadata, size mismatches, unknown segment encodings
    Protocol(String),

    /// JSON serialization/deserialization errors, and unserializable
    /// query parameters
    Serialization(String),

    /// A raw column value could not be converted to its declared type
    Conversion(String),

    /// The server response carried a header this client refuses to apply
    UnsupportedHeader(String),

    /// The server returned an invalid type signature
    InvalidResponseType,

    /// Progress callback and callback period must be set together
    InvalidProgressCallback,

    /// A deadline elapsed before the operation completed
    Timeout(String),

    /// The query was cancelled, either by the caller or server-side
    Cancelled,

    /// The requested database operation is not supported by Trino
    OperationNotSupported(&'static str),
}

impl fmt::Display for TrinoLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {}", msg),
            Self::QueryFailed {
                status_code,
                reason,
            } => write!(f, "query failed ({}): {}", status_code, reason),
            Self::Server { status_code, error } => {
                write!(f, "query failed ({}): {}", status_code, error)
            }
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Serialization(msg) => write!(f, "serialization error: {}", msg),
            Self::Conversion(msg) => write!(f, "conversion error: {}", msg),
            Self::UnsupportedHeader(name) => {
                write!(f, "server response contains an unsupported header: {}", name)
            }
            Self::InvalidResponseType => {
                write!(f, "server response contains an invalid type")
            }
            Self::InvalidProgressCallback => write!(
                f,
                "both the progress callback and the callback period must be set when using progress reporting"
            ),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::Cancelled => write!(f, "query cancelled"),
            Self::OperationNotSupported(op) => {
                write!(f, "operation not supported: {}", op)
            }
        }
    }
}

impl std::error::Error for TrinoLinkError {}

impl From<reqwest::Error> for TrinoLinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        Self::QueryFailed {
            status_code: err.status().map(|s| s.as_u16()).unwrap_or(0),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrinoLinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
