//! `run`: every stage in order over the dated folders.

use tracing::info;
use uuid::Uuid;

use crate::commands::batch::{run_batch_pass, BatchRun, Pass};
use crate::commands::{run_merge, run_pull, run_push, run_split};
use crate::error::AppError;
use crate::pull::PullReport;
use crate::state::PipelineState;
use crate::streaming::{ChunkResult, MergeReport};
use crate::upload::UploadResult;

/// What each stage produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub pull: PullReport,
    pub split: ChunkResult,
    pub first_pass: BatchRun,
    pub second_pass: BatchRun,
    pub merge: MergeReport,
    pub push: UploadResult,
}

/// Pull, split, both assistant passes, merge and push.
///
/// Stops at the first stage that fails. Each stage sends its own
/// notification; a failed job inside a pass does not stop the run.
pub async fn run_pipeline(
    state: &PipelineState,
    dry_run: bool,
) -> Result<PipelineReport, AppError> {
    let run_id = Uuid::new_v4();
    info!("[PIPELINE] Starting run {} for {}", run_id, state.layout.date());

    let pull = run_pull(state, None).await?;
    let split = run_split(state, &pull.output_path, None, None).await?;
    let first_pass = run_batch_pass(state, Pass::First, None).await?;
    let second_pass = run_batch_pass(state, Pass::Second, None).await?;
    let merge = run_merge(state, None, None, false).await?;
    let push = run_push(state, Some(merge.output_path.clone()), dry_run).await?;

    info!(
        "[PIPELINE] Finished run {}: {} rows pulled, {} chunks, {} rows merged",
        run_id,
        pull.filtered_rows,
        split.chunk_paths.len(),
        merge.rows_merged
    );
    state
        .notify(&format!("Pipeline completed for {}", state.layout.date()))
        .await;

    Ok(PipelineReport {
        pull,
        split,
        first_pass,
        second_pass,
        merge,
        push,
    })
}
