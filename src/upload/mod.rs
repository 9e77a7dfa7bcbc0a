//! Bulk upload of reconciled rows.
//!
//! - `retry`: backoff, Retry-After parsing and row selection policies
//! - `engine`: row preparation and the batched, retrying PUT loop

pub mod engine;
pub mod retry;

pub use engine::{
    endpoint_url, prepare_rows, BlankCounts, BulkUploader, PreparedRows, UploadOptions,
    UploadResult,
};
pub use retry::{parse_retry_after, RetryPolicy, SendPolicy};
