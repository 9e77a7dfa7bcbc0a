//! Atomic file writer with automatic cleanup on failure.
//!
//! Writes to a temporary file in the same directory as the destination,
//! then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is automatically cleaned up.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::AppError;

/// An atomic writer that never leaves a half-written destination behind.
///
/// Readers of `final_path` see either the previous file or the complete new
/// one. If dropped without calling `finish()`, the temporary file is deleted.
pub struct AtomicFileWriter {
    writer: BufWriter<NamedTempFile>,
    final_path: PathBuf,
}

impl AtomicFileWriter {
    /// Creates a writer targeting `final_path`, creating its parent directory.
    ///
    /// The temporary file lives next to the destination so the final rename
    /// stays on one filesystem.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        std::fs::create_dir_all(&parent_dir).map_err(|e| {
            AppError::Io(format!(
                "Failed to create directory {}: {}",
                parent_dir.display(),
                e
            ))
        })?;

        let temp_file = NamedTempFile::new_in(&parent_dir)
            .map_err(|e| AppError::Io(format!("Failed to create temporary file: {}", e)))?;

        Ok(Self {
            writer: BufWriter::new(temp_file),
            final_path,
        })
    }

    /// Returns a mutable reference to the buffered temporary file.
    pub fn writer_mut(&mut self) -> &mut BufWriter<NamedTempFile> {
        &mut self.writer
    }

    /// Flushes all buffers and atomically persists the file to the final path.
    ///
    /// Returns the final path on success. On error the temporary file is
    /// cleaned up automatically.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let named_temp = self
            .writer
            .into_inner()
            .map_err(|e| AppError::Io(format!("Failed to flush buffer: {}", e.error())))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            AppError::Io(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}

/// Writes `bytes` to `path` atomically.
pub fn write_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> Result<PathBuf, AppError> {
    let mut writer = AtomicFileWriter::new(path)?;
    writer
        .writer_mut()
        .write_all(bytes)
        .map_err(|e| AppError::Io(format!("Failed to write file: {}", e)))?;
    writer.finish()
}
