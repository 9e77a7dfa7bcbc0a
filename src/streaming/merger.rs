//! Merging of per-chunk output workbooks into one reconciled dataset.
//!
//! Key features:
//! - Discovers `.xlsx`/`.xlsm`/`.xls` files, skipping Office lock files and
//!   earlier merge outputs
//! - Case-insensitive path ordering so chunk sequence order survives
//! - Per-file column reconciliation onto `keyword, line, item`
//! - Unreadable, empty or keyword-less files are skipped with a reason
//! - Atomic write of the merged workbook

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::AppError;
use crate::record::Record;
use crate::streaming::reconcile::{reconcile, records_to_table};
use crate::streaming::workbook::{read_table, write_table};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Extensions collected for merging.
const MERGE_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls"];

/// Outputs of earlier merges that must never be merged again.
const MERGE_OUTPUT_NAMES: &[&str] = &["merged.xlsx", "merged_output.xlsx"];

/// Default output file name inside the merged folder.
pub const MERGED_FILE_NAME: &str = "merged.xlsx";

/// Sheet name of the merged workbook.
pub const MERGED_SHEET_NAME: &str = "Merged";

/// Skipped files listed in an error message.
const MAX_REPORTED_SKIPS: usize = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// A file left out of the merge and why.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a folder merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub output_path: PathBuf,
    pub files_found: usize,
    pub files_merged: usize,
    pub rows_merged: usize,
    pub skipped: Vec<SkippedFile>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Lists mergeable workbooks under `folder`, sorted case-insensitively by path.
pub fn discover_workbooks(folder: &Path, recursive: bool) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_mergeable(path))
        .collect();

    files.sort_by_key(|p| p.to_string_lossy().to_lowercase());
    files
}

fn is_mergeable(path: &Path) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };
    if name.starts_with("~$") || MERGE_OUTPUT_NAMES.contains(&name.as_str()) {
        return false;
    }
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| MERGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Resolves the output path: default inside the folder, or `merged.xlsx`
/// appended when the given output is an existing directory.
pub fn resolve_output_path(folder: &Path, output: Option<&Path>) -> PathBuf {
    match output {
        None => folder.join(MERGED_FILE_NAME),
        Some(p) if p.is_dir() => p.join(MERGED_FILE_NAME),
        Some(p) => p.to_path_buf(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Merges every workbook in `folder` into a single `keyword, line, item` workbook.
///
/// # Errors
///
/// - `AppError::FileNotFound` if the folder does not exist
/// - `AppError::EmptyDataset` if no workbook is found or none can be merged
pub async fn merge_folder(
    folder: &Path,
    output: Option<&Path>,
    recursive: bool,
) -> Result<MergeReport, AppError> {
    if !folder.is_dir() {
        return Err(AppError::FileNotFound(format!(
            "{} (not a directory)",
            folder.display()
        )));
    }

    let folder = folder.to_owned();
    let output_path = resolve_output_path(&folder, output);

    tokio::task::spawn_blocking(move || merge_folder_blocking(&folder, output_path, recursive))
        .await
        .map_err(|e| AppError::Internal(format!("Merge task panicked: {}", e)))?
}

fn merge_folder_blocking(
    folder: &Path,
    output_path: PathBuf,
    recursive: bool,
) -> Result<MergeReport, AppError> {
    let files = discover_workbooks(folder, recursive);
    if files.is_empty() {
        return Err(AppError::EmptyDataset(format!(
            "no Excel files found in {}",
            folder.display()
        )));
    }

    let mut merged: Vec<Record> = Vec::new();
    let mut skipped: Vec<SkippedFile> = Vec::new();
    let mut files_merged = 0usize;

    for path in &files {
        match load_records(path) {
            Ok(records) => {
                files_merged += 1;
                merged.extend(records);
            }
            Err(reason) => {
                warn!("[MERGE] Skipping {}: {}", path.display(), reason);
                skipped.push(SkippedFile {
                    path: path.clone(),
                    reason,
                });
            }
        }
    }

    if files_merged == 0 {
        let details: Vec<String> = skipped
            .iter()
            .take(MAX_REPORTED_SKIPS)
            .map(|s| format!("  - {}: {}", s.path.display(), s.reason))
            .collect();
        return Err(AppError::EmptyDataset(format!(
            "no valid chunk files to merge in {}\n{}",
            folder.display(),
            details.join("\n")
        )));
    }

    write_table(&records_to_table(&merged, MERGED_SHEET_NAME), &output_path)?;

    info!(
        "[MERGE] {} files found, {} merged, {} rows -> {}",
        files.len(),
        files_merged,
        merged.len(),
        output_path.display()
    );

    Ok(MergeReport {
        output_path,
        files_found: files.len(),
        files_merged,
        rows_merged: merged.len(),
        skipped,
    })
}

/// Reads and reconciles one workbook. `Err` carries the skip reason.
fn load_records(path: &Path) -> Result<Vec<Record>, String> {
    let table = read_table(path).map_err(|e| format!("read failed: {}", e))?;

    if table.is_empty() {
        return Err("empty sheet".into());
    }

    let (records, _) = reconcile(&table);
    if records.iter().all(|r| r.keyword.is_empty()) {
        return Err("missing keyword column".into());
    }

    Ok(records)
}
