//! Tabular file handling for the pipeline.
//!
//! This module reads and writes workbooks, splits one dataset into ordered
//! row chunks, reconciles heterogeneous headers onto the canonical
//! `keyword, line, item` schema, and merges per-chunk outputs back into a
//! single dataset. All file outputs are written atomically.

mod atomic_writer;
mod chunker;
mod merger;
pub mod reconcile;
pub mod workbook;

pub use atomic_writer::{write_atomic, AtomicFileWriter};
pub use chunker::{plan_chunks, split_file, split_table, ChunkConfig, ChunkResult, ChunkSpan, CHUNK_SHEET_NAME};
pub use merger::{
    discover_workbooks, merge_folder, resolve_output_path, MergeReport, SkippedFile,
    MERGED_FILE_NAME, MERGED_SHEET_NAME,
};
pub use reconcile::{build_column_map, clean_cell, normalize_header, reconcile, CanonicalColumn, ColumnMap};
pub use workbook::{read_table, render_text_dump, write_table, Table};
