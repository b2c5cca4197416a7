use super::column::Column;
use super::error_detail::ErrorDetail;
use super::query_stats::QueryStats;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// A `/v1/statement` response or continuation page.
///
/// `data` is kept as raw JSON because its shape selects the protocol: an
/// array of row arrays means the direct protocol, an object is the spooling
/// envelope, and absence means a status-only page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryResults {
    pub id: String,
    pub info_uri: String,
    pub partial_cancel_uri: String,
    pub next_uri: String,
    pub columns: Vec<Column>,
    pub data: Option<JsonValue>,
    pub stats: QueryStats,
    pub error: Option<ErrorDetail>,
    pub update_type: String,
    pub update_count: i64,
}
