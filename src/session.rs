//! Connection-scoped outbound header state.
//!
//! Trino drives session continuity through headers: the client sends the
//! accumulated `X-Trino-*` headers with every request, and 200 responses may
//! mutate them (`Set-Catalog`, `Set-Session`, `Added-Prepare`, ...). The
//! state lives for the lifetime of the connection and is an ordered
//! multi-map, since `Session`, `Prepared-Statement`, and `Extra-Credential`
//! all repeat.

use crate::error::{Result, TrinoLinkError};
use reqwest::header::HeaderMap;

pub(crate) const TRINO_HEADER_PREFIX: &str = "X-Trino-";

pub(crate) const HEADER_USER: &str = "X-Trino-User";
pub(crate) const HEADER_SOURCE: &str = "X-Trino-Source";
pub(crate) const HEADER_CATALOG: &str = "X-Trino-Catalog";
pub(crate) const HEADER_SCHEMA: &str = "X-Trino-Schema";
pub(crate) const HEADER_SESSION: &str = "X-Trino-Session";
pub(crate) const HEADER_PREPARED_STATEMENT: &str = "X-Trino-Prepared-Statement";
pub(crate) const HEADER_EXTRA_CREDENTIAL: &str = "X-Trino-Extra-Credential";
pub(crate) const HEADER_CLIENT_CAPABILITIES: &str = "X-Trino-Client-Capabilities";
pub(crate) const HEADER_QUERY_DATA_ENCODING: &str = "X-Trino-Query-Data-Encoding";

pub(crate) const HEADER_SET_CATALOG: &str = "X-Trino-Set-Catalog";
pub(crate) const HEADER_SET_SCHEMA: &str = "X-Trino-Set-Schema";
pub(crate) const HEADER_SET_PATH: &str = "X-Trino-Set-Path";
pub(crate) const HEADER_SET_ROLE: &str = "X-Trino-Set-Role";
pub(crate) const HEADER_SET_SESSION: &str = "X-Trino-Set-Session";
pub(crate) const HEADER_CLEAR_SESSION: &str = "X-Trino-Clear-Session";
pub(crate) const HEADER_ADDED_PREPARE: &str = "X-Trino-Added-Prepare";
pub(crate) const HEADER_DEALLOCATED_PREPARE: &str = "X-Trino-Deallocated-Prepare";

pub(crate) const HEADER_AUTHORIZATION: &str = "Authorization";

/// Statement name used for the explicit-prepare binding mode.
pub(crate) const PREPARED_STATEMENT_NAME: &str = "_trino_link";

/// Percent-encode a value for use inside a Trino header (prepared
/// statement text, session property values).
pub(crate) fn query_escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Ordered multi-map of outbound headers for one connection.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionHeaders {
    entries: Vec<(String, String)>,
}

impl SessionHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, keeping any existing values for the same name.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_string(), value.into()));
    }

    /// Replace all values for `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.retain(|(n, _)| n != name);
        self.entries.push((name.to_string(), value.into()));
    }

    /// All values recorded for `name`, in insertion order.
    pub fn values(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// All entries, in insertion order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Remove every entry under `name` whose value starts with `prefix`.
    fn remove_value_prefix(&mut self, name: &str, prefix: &str) {
        self.entries
            .retain(|(n, v)| n != name || !v.starts_with(prefix));
    }

    /// Apply the response-header mutation table for a 200 response.
    ///
    /// `Set-Path` and `Set-Role` are not supported and fail the round trip,
    /// after the supported mutations have been applied.
    pub fn ingest(&mut self, headers: &HeaderMap) -> Result<()> {
        if let Some(catalog) = header_str(headers, HEADER_SET_CATALOG)? {
            self.set(HEADER_CATALOG, catalog);
        }
        if let Some(schema) = header_str(headers, HEADER_SET_SCHEMA)? {
            self.set(HEADER_SCHEMA, schema);
        }
        if let Some(added) = header_str(headers, HEADER_ADDED_PREPARE)? {
            self.add(HEADER_PREPARED_STATEMENT, added);
        }
        if let Some(deallocated) = header_str(headers, HEADER_DEALLOCATED_PREPARE)? {
            self.remove_value_prefix(HEADER_PREPARED_STATEMENT, &format!("{}=", deallocated));
        }
        if let Some(session) = header_str(headers, HEADER_SET_SESSION)? {
            self.add(HEADER_SESSION, session);
        }
        if let Some(cleared) = header_str(headers, HEADER_CLEAR_SESSION)? {
            self.remove_value_prefix(HEADER_SESSION, &format!("{}=", cleared));
        }
        for name in [HEADER_SET_PATH, HEADER_SET_ROLE] {
            if headers.contains_key(name) {
                return Err(TrinoLinkError::UnsupportedHeader(name.to_string()));
            }
        }
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => {
            let s = value.to_str().map_err(|_| {
                TrinoLinkError::Protocol(format!("non-ASCII value for response header {}", name))
            })?;
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}
