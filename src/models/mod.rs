//! Wire models for the Trino statement protocol.
//!
//! Defines the response structures returned by `/v1/statement` and its
//! continuation pages, including the column type-signature tree and the
//! spooling protocol's segment descriptors.

pub mod column;
pub mod error_detail;
pub mod query_results;
pub mod query_stats;
pub mod segment;

pub use column::{Column, NamedTypeSignature, RowFieldName, TypeArgument, TypeSignature};
pub use error_detail::{ErrorDetail, ErrorLocation, FailureInfo};
pub use query_results::QueryResults;
pub use query_stats::{QueryStage, QueryStats};
pub use segment::{SegmentMetadata, SpoolEnvelope, SpooledSegment};
