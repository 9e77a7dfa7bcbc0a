//! Records pull: fetch keyword rows from the keywords API and keep last
//! Monday's rows.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as DateSpan, NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::info;

use crate::assistant::client::build_http_client;
use crate::config::PullConfig;
use crate::error::AppError;
use crate::streaming::reconcile::normalize_header;
use crate::streaming::{write_table, Table};

/// Sheet name of the pulled workbook.
pub const PULL_SHEET_NAME: &str = "Keywords";

const DATE_CANDIDATES: &[&str] = &["date", "ddate", "d date"];
const KEYWORD_CANDIDATES: &[&str] = &["keyword", "key word", "key_word"];

/// Keys that may hold the row list in an object response.
const LIST_KEYS: &[&str] = &["data", "results", "keywords"];

/// Excel's day zero, accounting for the 1900 leap-year bug.
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

// ─────────────────────────────────────────────────────────────────────────────
// Dates
// ─────────────────────────────────────────────────────────────────────────────

/// Most recent Monday strictly before `today`.
pub fn last_monday(today: NaiveDate) -> NaiveDate {
    match today.weekday().num_days_from_monday() {
        0 => today - DateSpan::days(7),
        n => today - DateSpan::days(n as i64),
    }
}

/// Parses a date cell. Unparseable values yield `None`.
///
/// Accepts `YYYY-MM-DD`, ISO datetimes, `YYYY/MM/DD`, `MM/DD/YYYY` and
/// Excel serial day numbers.
pub fn parse_lenient_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }

    if let Ok(serial) = value.parse::<f64>() {
        if (1.0..2_958_466.0).contains(&serial) {
            let (y, m, d) = EXCEL_EPOCH;
            let epoch = NaiveDate::from_ymd_opt(y, m, d)?;
            return epoch.checked_add_signed(DateSpan::days(serial.trunc() as i64));
        }
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Turns the API's JSON into a table.
///
/// An array is a row list; an object with a `data`, `results` or `keywords`
/// list uses that list; any other object is one row; anything else becomes
/// a single `data` cell.
pub fn decode_records(value: Value) -> Table {
    let rows: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            let list_key = LIST_KEYS
                .iter()
                .find(|k| matches!(obj.get(**k), Some(Value::Array(_))));
            match list_key.and_then(|k| obj.remove(*k)) {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(obj)],
            }
        }
        other => {
            let mut obj = Map::new();
            obj.insert("data".into(), Value::String(value_to_cell(&other)));
            vec![Value::Object(obj)]
        }
    };

    let mut headers: Vec<String> = Vec::new();
    for row in &rows {
        match row {
            Value::Object(obj) => {
                for key in obj.keys() {
                    if !headers.contains(key) {
                        headers.push(key.clone());
                    }
                }
            }
            _ => {
                if !headers.iter().any(|h| h == "value") {
                    headers.push("value".into());
                }
            }
        }
    }

    let mut table = Table::new(PULL_SHEET_NAME, headers.clone());
    for row in &rows {
        let cells = headers
            .iter()
            .map(|h| match row {
                Value::Object(obj) => obj.get(h).map(value_to_cell).unwrap_or_default(),
                scalar if h == "value" => value_to_cell(scalar),
                _ => String::new(),
            })
            .collect();
        table.push_row(cells);
    }
    table
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Finds a column by normalized name: `preferred` first, then `candidates`.
pub fn resolve_column(headers: &[String], preferred: &str, candidates: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    std::iter::once(preferred)
        .chain(candidates.iter().copied())
        .map(normalize_header)
        .find_map(|wanted| normalized.iter().position(|h| *h == wanted))
}

/// Rows whose date column parses to `target`. All columns are kept.
pub fn filter_by_date(table: &Table, date_idx: usize, target: NaiveDate) -> Table {
    let mut filtered = Table::new(table.sheet_name.clone(), table.headers.clone());
    for row in &table.rows {
        let matches = row
            .get(date_idx)
            .and_then(|cell| parse_lenient_date(cell))
            .is_some_and(|d| d == target);
        if matches {
            filtered.push_row(row.clone());
        }
    }
    filtered
}

/// `keywords_last_monday_<date>.xlsx`
pub fn output_file_name(target: NaiveDate) -> String {
    format!("keywords_last_monday_{}.xlsx", target.format("%Y-%m-%d"))
}

// ─────────────────────────────────────────────────────────────────────────────
// KeywordPuller
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PullReport {
    pub output_path: PathBuf,
    pub target_date: NaiveDate,
    pub total_rows: usize,
    pub filtered_rows: usize,
}

pub struct KeywordPuller {
    http: Client,
    config: PullConfig,
}

impl KeywordPuller {
    pub fn new(config: PullConfig) -> Result<Self, AppError> {
        let http = build_http_client(
            Duration::from_secs(config.timeout_secs),
            config.accept_invalid_certs,
        )?;
        Ok(Self { http, config })
    }

    /// GETs the keywords API and decodes the rows.
    pub async fn fetch(&self) -> Result<Table, AppError> {
        info!("[PULL] GET {}", self.config.url);
        let response = self
            .http
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Keywords request failed: {}", e)))?;

        let status = response.status();
        info!("[PULL] GET keywords -> {}", status.as_u16());
        if !status.is_success() {
            return Err(AppError::ServiceError(format!(
                "keywords API returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Error reading response body: {}", e)))?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AppError::Decode(format!("keywords response is not JSON: {}", e)))?;
        Ok(decode_records(value))
    }

    /// Fetches rows, keeps last Monday's and writes them to `output`.
    ///
    /// A directory `output` gets the default file name appended.
    ///
    /// # Errors
    ///
    /// - `AppError::EmptyDataset` when the API returns no rows or none match
    /// - `AppError::MissingColumns` when the date or keyword column is absent
    pub async fn pull_last_monday(
        &self,
        today: NaiveDate,
        output: &Path,
    ) -> Result<PullReport, AppError> {
        let table = self.fetch().await?;
        if table.is_empty() {
            return Err(AppError::EmptyDataset("API returned no data".into()));
        }

        let date_idx = resolve_column(&table.headers, &self.config.date_column, DATE_CANDIDATES)
            .ok_or_else(|| {
                AppError::MissingColumns(format!(
                    "date column not found, expected {}",
                    self.config.date_column
                ))
            })?;
        resolve_column(&table.headers, &self.config.keyword_column, KEYWORD_CANDIDATES)
            .ok_or_else(|| {
                AppError::MissingColumns(format!(
                    "keyword column not found, expected {}",
                    self.config.keyword_column
                ))
            })?;

        let target = last_monday(today);
        let filtered = filter_by_date(&table, date_idx, target);
        if filtered.is_empty() {
            return Err(AppError::EmptyDataset(format!(
                "no rows found for last Monday ({}); check the {} values",
                target, table.headers[date_idx]
            )));
        }

        let output_path = if output.is_dir() {
            output.join(output_file_name(target))
        } else {
            output.to_path_buf()
        };

        let report = PullReport {
            output_path: output_path.clone(),
            target_date: target,
            total_rows: table.len(),
            filtered_rows: filtered.len(),
        };

        tokio::task::spawn_blocking(move || write_table(&filtered, &output_path))
            .await
            .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))??;

        info!(
            "[PULL] Last Monday {}: {} of {} rows written to {}",
            report.target_date,
            report.filtered_rows,
            report.total_rows,
            report.output_path.display()
        );
        Ok(report)
    }
}
