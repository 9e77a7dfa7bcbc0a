//! `merge` stage: combine the final pass outputs into one workbook.

use std::path::PathBuf;

use crate::commands::notify_outcome;
use crate::error::AppError;
use crate::state::PipelineState;
use crate::streaming::{merge_folder, MergeReport};

/// Merges every workbook in `input_dir` (default: the pass 2 output folder).
///
/// Output defaults to `merged/merged_last_monday_<date>.xlsx`.
pub async fn run_merge(
    state: &PipelineState,
    input_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    recursive: bool,
) -> Result<MergeReport, AppError> {
    let input_dir = input_dir.unwrap_or_else(|| {
        state
            .layout
            .pass_output_dir(&state.config.batch.pass2.output_subdir)
    });
    let output = output.unwrap_or_else(|| state.layout.merged_file());

    let result = merge_folder(&input_dir, Some(output.as_path()), recursive).await;
    notify_outcome(
        state,
        &result,
        |report| {
            format!(
                "Merge completed\nInput folder: {}\nOutput file: {}",
                input_dir.display(),
                report.output_path.display()
            )
        },
        "Merge failed",
    )
    .await;
    result
}
