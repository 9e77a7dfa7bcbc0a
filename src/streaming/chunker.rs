//! Row-count chunking of a single tabular dataset.
//!
//! Row `i` (0-based) always lands in chunk `i / rows_per_chunk`. Chunks are
//! contiguous and ordered, so concatenating them in sequence order rebuilds
//! the source exactly. Every chunk carries the source header row.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::AppError;
use crate::streaming::workbook::{read_table, write_table, Table};

/// Sheet name written into every chunk file.
pub const CHUNK_SHEET_NAME: &str = "Keywords";

/// Configuration for dataset chunking.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum data rows per chunk (excluding header).
    pub rows_per_chunk: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            rows_per_chunk: 100,
        }
    }
}

impl ChunkConfig {
    /// Sets the rows_per_chunk limit.
    pub fn rows_per_chunk(mut self, rows: usize) -> Self {
        self.rows_per_chunk = rows;
        self
    }
}

/// One planned chunk: 1-based sequence number and its half-open row range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub seq: usize,
    /// 0-based index of the first row.
    pub start: usize,
    /// 0-based exclusive end.
    pub end: usize,
}

impl ChunkSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `keywords_chunk_{seq:03}_rows_{start}-{end}.xlsx`, with 1-based inclusive rows.
    pub fn file_name(&self) -> String {
        format!(
            "keywords_chunk_{:03}_rows_{}-{}.xlsx",
            self.seq,
            self.start + 1,
            self.end
        )
    }
}

/// Result of splitting a dataset into chunks.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    /// Paths to the generated chunk files, in sequence order.
    pub chunk_paths: Vec<PathBuf>,
    /// Total data rows processed (excluding headers).
    pub total_rows: usize,
    /// Number of data rows in each chunk (parallel to chunk_paths).
    pub rows_per_chunk: Vec<usize>,
}

/// Plans `ceil(total_rows / rows_per_chunk)` contiguous spans.
pub fn plan_chunks(total_rows: usize, rows_per_chunk: usize) -> Result<Vec<ChunkSpan>, AppError> {
    if rows_per_chunk == 0 {
        return Err(AppError::Config("rows per chunk must be > 0".into()));
    }
    if total_rows == 0 {
        return Err(AppError::EmptyDataset("input sheet has no data rows".into()));
    }

    let count = total_rows.div_ceil(rows_per_chunk);
    Ok((0..count)
        .map(|i| ChunkSpan {
            seq: i + 1,
            start: i * rows_per_chunk,
            end: ((i + 1) * rows_per_chunk).min(total_rows),
        })
        .collect())
}

/// Splits an in-memory table into per-chunk tables.
pub fn split_table(table: &Table, config: &ChunkConfig) -> Result<Vec<(ChunkSpan, Table)>, AppError> {
    let spans = plan_chunks(table.len(), config.rows_per_chunk)?;
    Ok(spans
        .into_iter()
        .map(|span| (span, table.slice(span.start, span.end, CHUNK_SHEET_NAME)))
        .collect())
}

/// Splits a workbook (or CSV) into chunk `.xlsx` files under `output_dir`.
///
/// Fails with `AppError::EmptyDataset` when the source has no data rows.
pub async fn split_file(
    source: &Path,
    output_dir: &Path,
    config: ChunkConfig,
) -> Result<ChunkResult, AppError> {
    if !source.exists() {
        return Err(AppError::FileNotFound(source.display().to_string()));
    }

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| AppError::Io(format!("Failed to create output directory: {}", e)))?;

    let source = source.to_owned();
    let output_dir = output_dir.to_owned();

    tokio::task::spawn_blocking(move || split_file_blocking(&source, &output_dir, config))
        .await
        .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))?
}

fn split_file_blocking(
    source: &Path,
    output_dir: &Path,
    config: ChunkConfig,
) -> Result<ChunkResult, AppError> {
    let table = read_table(source)?;
    let total_rows = table.len();

    info!(
        "[SPLIT] {} rows, {} columns, {} rows per chunk",
        total_rows,
        table.headers.len(),
        config.rows_per_chunk
    );

    let chunks = split_table(&table, &config)?;
    let chunk_count = chunks.len();

    let mut chunk_paths = Vec::with_capacity(chunk_count);
    let mut rows_per_chunk = Vec::with_capacity(chunk_count);

    for (span, chunk) in chunks {
        let path = output_dir.join(span.file_name());
        write_table(&chunk, &path)?;
        info!(
            "[SPLIT] [{:3}/{}] Created {} ({} rows)",
            span.seq,
            chunk_count,
            span.file_name(),
            span.len()
        );
        chunk_paths.push(path);
        rows_per_chunk.push(span.len());
    }

    Ok(ChunkResult {
        chunk_paths,
        total_rows,
        rows_per_chunk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn numbered_table(rows: usize) -> Table {
        let mut table = Table::new("Keywords", vec!["KeyWord".into(), "DDate".into()]);
        for i in 0..rows {
            table.push_row(vec![format!("kw{}", i), "2025-01-06".into()]);
        }
        table
    }

    #[test]
    fn plan_covers_every_row_once() {
        for (total, size) in [(1, 1), (99, 100), (100, 100), (101, 100), (250, 100), (7, 3)] {
            let spans = plan_chunks(total, size).unwrap();
            assert_eq!(spans.len(), total.div_ceil(size));

            let mut expected_start = 0;
            for (i, span) in spans.iter().enumerate() {
                assert_eq!(span.seq, i + 1);
                assert_eq!(span.start, expected_start);
                assert!(span.len() <= size);
                if i + 1 < spans.len() {
                    assert_eq!(span.len(), size);
                }
                expected_start = span.end;
            }
            assert_eq!(expected_start, total);
        }
    }

    #[test]
    fn zero_rows_is_an_error() {
        let err = plan_chunks(0, 100).unwrap_err();
        assert!(matches!(err, AppError::EmptyDataset(_)));
    }

    #[test]
    fn zero_chunk_size_is_an_error() {
        assert!(matches!(plan_chunks(10, 0), Err(AppError::Config(_))));
    }

    #[test]
    fn file_names_use_padded_seq_and_inclusive_rows() {
        let spans = plan_chunks(250, 100).unwrap();
        let names: Vec<String> = spans.iter().map(ChunkSpan::file_name).collect();
        assert_eq!(
            names,
            vec![
                "keywords_chunk_001_rows_1-100.xlsx",
                "keywords_chunk_002_rows_101-200.xlsx",
                "keywords_chunk_003_rows_201-250.xlsx",
            ]
        );
    }

    #[test]
    fn split_table_concatenates_back_to_source() {
        let table = numbered_table(23);
        let chunks = split_table(&table, &ChunkConfig::default().rows_per_chunk(5)).unwrap();

        assert_eq!(chunks.len(), 5);
        let rebuilt: Vec<Vec<String>> = chunks.into_iter().flat_map(|(_, t)| t.rows).collect();
        assert_eq!(rebuilt, table.rows);
    }

    #[tokio::test]
    async fn split_file_writes_ordered_chunks() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("input.xlsx");
        write_table(&numbered_table(250), &source).unwrap();
        let out = dir.path().join("split");

        let result = split_file(&source, &out, ChunkConfig::default()).await.unwrap();

        assert_eq!(result.total_rows, 250);
        assert_eq!(result.rows_per_chunk, vec![100, 100, 50]);
        assert_eq!(
            result.chunk_paths[2].file_name().unwrap().to_str().unwrap(),
            "keywords_chunk_003_rows_201-250.xlsx"
        );

        let last = read_table(&result.chunk_paths[2]).unwrap();
        assert_eq!(last.sheet_name, CHUNK_SHEET_NAME);
        assert_eq!(last.headers, vec!["KeyWord", "DDate"]);
        assert_eq!(last.rows[0][0], "kw200");
        assert_eq!(last.rows[49][0], "kw249");
    }

    #[tokio::test]
    async fn split_file_rejects_empty_sheet() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty.xlsx");
        write_table(&numbered_table(0), &source).unwrap();

        let err = split_file(&source, &dir.path().join("split"), ChunkConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::EmptyDataset(_)));
        assert!(!dir.path().join("split").join("keywords_chunk_001_rows_1-0.xlsx").exists());
    }

    #[tokio::test]
    async fn split_file_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = split_file(&dir.path().join("nope.xlsx"), dir.path(), ChunkConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FileNotFound(_)));
    }
}
