//! `pull` stage: fetch keyword rows and keep last Monday's.

use std::path::PathBuf;

use crate::commands::notify_outcome;
use crate::error::AppError;
use crate::pull::{KeywordPuller, PullReport};
use crate::state::PipelineState;

/// Pulls and filters keyword rows.
///
/// `output` may be a file or a directory; it defaults to `input/<date>`.
pub async fn run_pull(
    state: &PipelineState,
    output: Option<PathBuf>,
) -> Result<PullReport, AppError> {
    let result = pull(state, output).await;
    notify_outcome(
        state,
        &result,
        |report| {
            format!(
                "Pull + filter completed\nOutput file: {}",
                report.output_path.display()
            )
        },
        "Pull + filter failed",
    )
    .await;
    result
}

async fn pull(state: &PipelineState, output: Option<PathBuf>) -> Result<PullReport, AppError> {
    let output = match output {
        Some(path) => path,
        None => {
            let dir = state.layout.input_dir();
            tokio::fs::create_dir_all(&dir).await?;
            dir
        }
    };

    let puller = KeywordPuller::new(state.config.pull.clone())?;
    puller.pull_last_monday(state.run_date()?, &output).await
}
