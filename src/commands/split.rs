//! `split` stage: cut the pulled workbook into fixed-size chunk files.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::commands::notify_outcome;
use crate::error::AppError;
use crate::state::PipelineState;
use crate::streaming::{split_file, ChunkConfig, ChunkResult};

/// Splits `input` into chunk workbooks.
///
/// Output defaults to `split/<date>`; chunk size defaults to the configured one.
pub async fn run_split(
    state: &PipelineState,
    input: &Path,
    output_dir: Option<PathBuf>,
    chunk_size: Option<usize>,
) -> Result<ChunkResult, AppError> {
    let output_dir = output_dir.unwrap_or_else(|| state.layout.split_dir());
    let chunk_size = chunk_size.unwrap_or(state.config.split.chunk_size);

    let result = split(input, &output_dir, chunk_size).await;
    notify_outcome(
        state,
        &result,
        |_| {
            format!(
                "Split completed\nInput file: {}\nOutput folder: {}\nChunk size: {}",
                input.display(),
                output_dir.display(),
                chunk_size
            )
        },
        "Split failed",
    )
    .await;
    result
}

async fn split(input: &Path, output_dir: &Path, chunk_size: usize) -> Result<ChunkResult, AppError> {
    if chunk_size == 0 {
        return Err(AppError::Config("chunk size must be > 0".into()));
    }

    let result = split_file(input, output_dir, ChunkConfig::default().rows_per_chunk(chunk_size)).await?;
    info!(
        "[SPLIT] {} rows into {} file(s) in {}",
        result.total_rows,
        result.chunk_paths.len(),
        output_dir.display()
    );
    Ok(result)
}
