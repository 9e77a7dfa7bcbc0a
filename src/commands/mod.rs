//! Stage commands.
//!
//! Each command resolves its default paths from the dated data layout,
//! runs one stage and reports the outcome through the notifier.

pub mod batch;
pub mod merge;
pub mod pipeline;
pub mod pull;
pub mod push;
pub mod split;

pub use batch::{run_batch_pass, run_batch_pass_with, BatchRun, Pass};
pub use merge::run_merge;
pub use pipeline::{run_pipeline, PipelineReport};
pub use pull::run_pull;
pub use push::run_push;
pub use split::run_split;

use crate::error::AppError;
use crate::state::PipelineState;

/// Sends the success text, or the failure prefix followed by the error's
/// operator presentation (title, message and remedy).
pub(crate) async fn notify_outcome<T>(
    state: &PipelineState,
    result: &Result<T, AppError>,
    on_success: impl FnOnce(&T) -> String,
    failure_prefix: &str,
) {
    let text = match result {
        Ok(value) => on_success(value),
        Err(e) => format!("{}\n{}", failure_prefix, e.to_presentation()),
    };
    state.notify(&text).await;
}
