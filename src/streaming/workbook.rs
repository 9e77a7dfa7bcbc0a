//! Tabular file I/O.
//!
//! Reads the first sheet of an Excel workbook (or a CSV file) into a
//! string-typed [`Table`], writes tables back out as `.xlsx` or `.csv`, and
//! renders whole workbooks as a tab-separated text dump for prompts.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use rust_xlsxwriter::Workbook;

use crate::error::AppError;
use crate::streaming::atomic_writer::{write_atomic, AtomicFileWriter};

/// Extensions read through calamine.
pub const EXCEL_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "xltx", "xltm", "ods"];

/// Extensions whose contents are rendered into the prompt text.
pub const DUMP_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xltx", "xltm"];

/// A header row plus string cells. Every row has exactly `headers.len()` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(sheet_name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            headers,
            rows: Vec::new(),
        }
    }

    /// Appends a row, padding or truncating it to the header width.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Copy of this table restricted to `rows[start..end]`.
    pub fn slice(&self, start: usize, end: usize, sheet_name: &str) -> Table {
        Table {
            sheet_name: sheet_name.to_string(),
            headers: self.headers.clone(),
            rows: self.rows[start..end].to_vec(),
        }
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub fn is_excel_path(path: &Path) -> bool {
    EXCEL_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Formats a cell the way a spreadsheet user would read it.
/// Whole-number floats lose their trailing `.0`.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => if *b { "True".into() } else { "False".into() },
        Data::Error(_) => String::new(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reading
// ─────────────────────────────────────────────────────────────────────────────

/// Reads the first sheet of a workbook, or a CSV file, into a [`Table`].
///
/// The first row is the header. Blank header cells become `Unnamed: <n>`.
pub fn read_table(path: &Path) -> Result<Table, AppError> {
    if !path.exists() {
        return Err(AppError::FileNotFound(path.display().to_string()));
    }

    if extension_of(path) == "csv" {
        return read_csv_table(path);
    }

    let mut workbook = open_workbook_auto(path).map_err(|e| {
        AppError::Spreadsheet(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| AppError::Spreadsheet(format!("{} has no sheets", path.display())))?;

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        AppError::Spreadsheet(format!(
            "Failed to read sheet '{}' of {}: {}",
            sheet_name,
            path.display(),
            e
        ))
    })?;

    Ok(range_to_table(&sheet_name, &range))
}

fn range_to_table(sheet_name: &str, range: &Range<Data>) -> Table {
    let mut rows = range.rows();

    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let name = cell_to_string(cell).trim().to_string();
                if name.is_empty() {
                    format!("Unnamed: {}", i)
                } else {
                    name
                }
            })
            .collect(),
        None => Vec::new(),
    };

    let mut table = Table::new(sheet_name, headers);
    for row in rows {
        table.push_row(row.iter().map(cell_to_string).collect());
    }
    table
}

fn read_csv_table(path: &Path) -> Result<Table, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| AppError::Spreadsheet(format!("Failed to open {}: {}", path.display(), e)))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::Spreadsheet(format!("Failed to read CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut table = Table::new("Sheet1", headers);
    for record in reader.records() {
        let record =
            record.map_err(|e| AppError::Spreadsheet(format!("Invalid CSV record: {}", e)))?;
        table.push_row(record.iter().map(str::to_string).collect());
    }
    Ok(table)
}

// ─────────────────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────────────────

/// Writes a table atomically as `.csv` or, for any other extension, `.xlsx`.
pub fn write_table(table: &Table, path: &Path) -> Result<(), AppError> {
    if extension_of(path) == "csv" {
        return write_csv_table(table, path);
    }

    let bytes = table_to_xlsx_bytes(table)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

fn table_to_xlsx_bytes(table: &Table) -> Result<Vec<u8>, AppError> {
    let xlsx_err = |e: rust_xlsxwriter::XlsxError| AppError::Spreadsheet(e.to_string());

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(&table.sheet_name).map_err(xlsx_err)?;

    for (col, header) in table.headers.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, header)
            .map_err(xlsx_err)?;
    }

    for (row_idx, row) in table.rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            worksheet
                .write_string((row_idx + 1) as u32, col as u16, value)
                .map_err(xlsx_err)?;
        }
    }

    workbook.save_to_buffer().map_err(xlsx_err)
}

fn write_csv_table(table: &Table, path: &Path) -> Result<(), AppError> {
    let mut atomic = AtomicFileWriter::new(path)?;
    {
        let mut writer = csv::Writer::from_writer(atomic.writer_mut());
        writer
            .write_record(&table.headers)
            .map_err(|e| AppError::Io(format!("Failed to write CSV header: {}", e)))?;
        for row in &table.rows {
            writer
                .write_record(row)
                .map_err(|e| AppError::Io(format!("Failed to write CSV record: {}", e)))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::Io(format!("Failed to flush CSV writer: {}", e)))?;
    }
    atomic.finish()?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Text dump
// ─────────────────────────────────────────────────────────────────────────────

/// Renders every sheet of a workbook as plain text: sheet name, row and
/// column counts, then one tab-joined line per non-empty row.
pub fn render_text_dump(path: &Path) -> Result<String, AppError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        AppError::Spreadsheet(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let sheet_names = workbook.sheet_names().to_vec();

    let mut out = String::from("Excel Data Summary:\n\n");
    out.push_str(&format!("File: {}\n", file_name));
    out.push_str(&format!("Total Sheets: {}\n\n", sheet_names.len()));

    for sheet_name in &sheet_names {
        let range = workbook.worksheet_range(sheet_name).map_err(|e| {
            AppError::Spreadsheet(format!("Failed to read sheet '{}': {}", sheet_name, e))
        })?;

        let (total_rows, total_cols) = range
            .end()
            .map(|(r, c)| (r as usize + 1, c as usize + 1))
            .unwrap_or((1, 1));

        out.push_str(&format!("Sheet: {}\n", sheet_name));
        out.push_str(&format!("Total Rows: {}\n", total_rows));
        out.push_str(&format!("Total Columns: {}\n\n", total_cols));

        for row in range.rows() {
            let values: Vec<String> = row
                .iter()
                .map(|c| cell_to_string(c).trim().to_string())
                .collect();
            if values.iter().any(|v| !v.is_empty()) {
                out.push_str(&values.join("\t"));
                out.push('\n');
            }
        }

        out.push_str("\n----------------------------------------\n\n");
    }

    Ok(out)
}
