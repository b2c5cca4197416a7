use serde::Deserialize;
use std::fmt;

/// Structured error returned by the coordinator in a response body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorDetail {
    pub message: String,
    pub sql_state: String,
    pub error_code: i32,
    pub error_name: String,
    pub error_type: String,
    pub error_location: ErrorLocation,
    pub failure_info: Option<FailureInfo>,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorLocation {
    pub line_number: i32,
    pub column_number: i32,
}

/// Server-side failure cause chain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FailureInfo {
    #[serde(rename = "type")]
    pub failure_type: String,
    pub message: String,
    pub cause: Option<Box<FailureInfo>>,
    pub suppressed: Vec<FailureInfo>,
    pub stack: Vec<String>,
    pub error_location: ErrorLocation,
}
