//! `push` stage: bulk upload of the merged workbook.

use std::path::{Path, PathBuf};

use crate::commands::notify_outcome;
use crate::error::AppError;
use crate::state::PipelineState;
use crate::upload::{BulkUploader, UploadOptions, UploadResult};

/// Pushes `input` (default: the dated merged workbook) to the items endpoint.
pub async fn run_push(
    state: &PipelineState,
    input: Option<PathBuf>,
    dry_run: bool,
) -> Result<UploadResult, AppError> {
    let input = input.unwrap_or_else(|| state.layout.merged_file());
    let upload = &state.config.upload;

    let result = push(state, &input, dry_run).await;
    notify_outcome(
        state,
        &result,
        |r| {
            let mut text = format!(
                "Push completed\nInput file: {}\nBase URL: {}\nEndpoint: {}",
                input.display(),
                upload.base_url,
                upload.endpoint
            );
            if dry_run {
                text.push_str(&format!("\nDry run: {} row(s) validated, nothing sent", r.valid_rows));
            } else {
                text.push_str(&format!(
                    "\nBatches sent: {}\nReceived: {}\nInserted: {}",
                    r.batches_sent, r.received_total, r.inserted_total
                ));
            }
            if !r.failed_batches.is_empty() {
                text.push_str(&format!("\nFailed batches: {:?}", r.failed_batches));
            }
            text
        },
        "Push failed",
    )
    .await;
    result
}

async fn push(
    state: &PipelineState,
    input: &Path,
    dry_run: bool,
) -> Result<UploadResult, AppError> {
    let mut options = UploadOptions::from(&state.config.upload);
    options.dry_run = dry_run;
    BulkUploader::new(options)?.push_file(input).await
}
