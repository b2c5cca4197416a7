//! Async client engine for the Trino HTTP statement protocol.
//!
//! The coordinator exposes a query as a chain of continuation URIs: the
//! client POSTs to `/v1/statement`, then polls each `nextUri` until the
//! server stops returning one. Result rows arrive either inline with each
//! page (the direct protocol) or as *segments* referenced by the page (the
//! spooling protocol), which are downloaded, decompressed, decoded, and
//! re-ordered concurrently before being streamed to the caller.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use trino_link::TrinoLinkClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TrinoLinkClient::from_dsn(
//!     "http://alice@localhost:8080?catalog=tpch&schema=tiny",
//! )?;
//!
//! let mut rows = client
//!     .query("SELECT name FROM nation WHERE regionkey = ?", vec![1i64.into()])
//!     .await?;
//! while let Some(row) = rows.next_row().await? {
//!     println!("{:?}", row[0]);
//! }
//! rows.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod models;

mod auth;
mod cancel;
mod client;
mod codec;
mod config;
mod convert;
mod error;
mod progress;
mod rows;
mod serial;
mod session;
mod spooling;
mod statement;
mod transport;
mod value;

pub use auth::{AuthProvider, RequestDecorator};
pub use client::{
    deregister_custom_client, register_custom_client, TrinoLinkClient, TrinoLinkClientBuilder,
};
pub use config::{Config, KerberosConfig, DEFAULT_CANCEL_QUERY_TIMEOUT, DEFAULT_QUERY_TIMEOUT};
pub use convert::{ScanKind, SliceElement, TypeConverter};
pub use error::{Result, TrinoLinkError};
pub use progress::{ProgressUpdater, QueryProgressInfo};
pub use rows::{ColumnInfo, Rows};
pub use serial::serialize_literal;
pub use statement::QueryOptions;
pub use value::Value;
