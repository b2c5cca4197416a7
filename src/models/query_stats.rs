use serde::{Deserialize, Deserializer};

/// Statistics snapshot attached to every statement response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryStats {
    pub state: String,
    pub scheduled: bool,
    pub nodes: i64,
    pub total_splits: i64,
    pub queued_splits: i64,
    pub running_splits: i64,
    pub completed_splits: i64,
    pub user_time_millis: i64,
    pub cpu_time_millis: i64,
    pub wall_time_millis: i64,
    pub queued_time_millis: i64,
    pub elapsed_time_millis: i64,
    pub processed_rows: i64,
    pub processed_bytes: i64,
    pub physical_input_bytes: i64,
    pub physical_written_bytes: i64,
    pub peak_memory_bytes: i64,
    pub spilled_bytes: i64,
    pub root_stage: Option<QueryStage>,
    #[serde(deserialize_with = "lenient_f64")]
    pub progress_percentage: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub running_percentage: f64,
}

/// One stage of the query's execution plan tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryStage {
    pub stage_id: String,
    pub state: String,
    pub done: bool,
    pub nodes: i64,
    pub total_splits: i64,
    pub queued_splits: i64,
    pub running_splits: i64,
    pub completed_splits: i64,
    pub user_time_millis: i64,
    pub cpu_time_millis: i64,
    pub wall_time_millis: i64,
    pub processed_rows: i64,
    pub processed_bytes: i64,
    pub sub_stages: Vec<QueryStage>,
}

// Percentages are absent, null, or occasionally a non-number; all of those
// decode to 0 rather than failing the whole response.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(0.0))
}
