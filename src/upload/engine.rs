//! Bulk upload of reconciled rows to the items endpoint.
//!
//! Rows are reconciled onto `keyword, line, item`, filtered by the active
//! [`SendPolicy`], then sent in order as contiguous batches. Each batch is
//! one `PUT {"rows": [...]}` retried on its own with exponential backoff on
//! connection failures and retryable statuses. Batches run strictly in
//! sequence.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::assistant::client::build_http_client;
use crate::config::UploadConfig;
use crate::error::AppError;
use crate::record::Record;
use crate::streaming::reconcile::reconcile;
use crate::streaming::{read_table, Table};
use crate::upload::retry::{parse_retry_after, RetryPolicy, SendPolicy};

/// Longest response body kept in a batch error.
const MAX_ERROR_BODY_CHARS: usize = 1000;

/// Rows shown by a dry run.
const PREVIEW_ROWS: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Options and results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Full endpoint URL
    pub url: String,
    pub batch_size: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub send_policy: SendPolicy,
    pub continue_on_error: bool,
    pub dry_run: bool,
    pub accept_invalid_certs: bool,
}

impl From<&UploadConfig> for UploadOptions {
    fn from(config: &UploadConfig) -> Self {
        Self {
            url: endpoint_url(&config.base_url, &config.endpoint),
            batch_size: config.batch_size,
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::from(config),
            send_policy: SendPolicy::from_flags(config.include_all_rows, config.require_all_fields),
            continue_on_error: config.continue_on_error,
            dry_run: false,
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }
}

/// Joins a base URL and an endpoint path.
pub fn endpoint_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if endpoint.is_empty() || endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    }
}

/// Blank cells per canonical column, after cleaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlankCounts {
    pub keyword: usize,
    pub line: usize,
    pub item: usize,
}

/// Rows selected for sending plus statistics over the whole sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedRows {
    pub total_rows: usize,
    pub rows: Vec<Record>,
    pub blanks: BlankCounts,
    /// Rows with an item but no line
    pub item_without_line: usize,
}

impl PreparedRows {
    pub fn dropped(&self) -> usize {
        self.total_rows - self.rows.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadResult {
    pub total_rows_in_excel: usize,
    pub valid_rows: usize,
    pub dropped_rows: usize,
    pub batches_sent: usize,
    pub received_total: u64,
    pub inserted_total: u64,
    /// 1-based numbers of batches skipped under `continue_on_error`
    pub failed_batches: Vec<usize>,
    pub blank_counts: BlankCounts,
    pub item_without_line: usize,
    /// First rows of the payload, filled by dry runs only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<Record>,
}

impl UploadResult {
    /// Pretty `{"rows": [...]}` rendering of the dry-run preview.
    pub fn preview_json(&self) -> String {
        serde_json::to_string_pretty(&json!({ "rows": self.preview })).unwrap_or_default()
    }
}

/// Counters reported by the endpoint for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BatchAck {
    received: u64,
    inserted: u64,
    json: bool,
}

impl BatchAck {
    fn from_body(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self {
                received: counter(&value, "received"),
                inserted: counter(&value, "inserted"),
                json: true,
            },
            Err(_) => Self::default(),
        }
    }
}

fn counter(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row preparation
// ─────────────────────────────────────────────────────────────────────────────

/// Reconciles `table` and applies `policy`.
///
/// # Errors
///
/// - `AppError::EmptyDataset` when the sheet has no rows
/// - `AppError::MissingColumns` when none of keyword, line or item is present
/// - `AppError::NoEligibleRows` when the policy keeps nothing
pub fn prepare_rows(table: &Table, policy: SendPolicy) -> Result<PreparedRows, AppError> {
    if table.is_empty() {
        return Err(AppError::EmptyDataset(format!(
            "sheet '{}' has no rows",
            table.sheet_name
        )));
    }

    let (records, map) = reconcile(table);
    if map.is_empty() {
        return Err(AppError::MissingColumns(format!(
            "required keyword, line, item; found: {}",
            table.headers.join(", ")
        )));
    }
    let missing = map.missing();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|c| c.as_str()).collect();
        warn!(
            "[UPLOAD] Columns not found, sending them empty: {}",
            names.join(", ")
        );
    }

    let mut blanks = BlankCounts::default();
    let mut item_without_line = 0;
    for record in &records {
        blanks.keyword += record.keyword.is_empty() as usize;
        blanks.line += record.line.is_empty() as usize;
        blanks.item += record.item.is_empty() as usize;
        item_without_line += !record.item_has_line() as usize;
    }

    let total_rows = records.len();
    let rows: Vec<Record> = records.into_iter().filter(|r| policy.accepts(r)).collect();
    if rows.is_empty() {
        return Err(AppError::NoEligibleRows(format!(
            "all {} rows were dropped by the {:?} policy",
            total_rows, policy
        )));
    }

    Ok(PreparedRows {
        total_rows,
        rows,
        blanks,
        item_without_line,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// BulkUploader
// ─────────────────────────────────────────────────────────────────────────────

pub struct BulkUploader {
    http: Client,
    options: UploadOptions,
}

impl BulkUploader {
    /// # Errors
    ///
    /// Returns `AppError::Config` if `batch_size` is 0.
    pub fn new(options: UploadOptions) -> Result<Self, AppError> {
        if options.batch_size == 0 {
            return Err(AppError::Config("upload.batch_size must be >= 1".into()));
        }
        let http = build_http_client(options.timeout, options.accept_invalid_certs)?;
        Ok(Self { http, options })
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Reads the first sheet of `path` and pushes it.
    pub async fn push_file(&self, path: &Path) -> Result<UploadResult, AppError> {
        if !path.exists() {
            return Err(AppError::FileNotFound(path.display().to_string()));
        }
        info!("[UPLOAD] Input: {}", path.display());

        let owned = path.to_path_buf();
        let table = tokio::task::spawn_blocking(move || read_table(&owned))
            .await
            .map_err(|e| AppError::Internal(format!("Spreadsheet read task failed: {}", e)))??;

        self.push_table(&table).await
    }

    /// Validates, batches and sends `table`.
    ///
    /// # Errors
    ///
    /// Preparation errors abort before any request. Without
    /// `continue_on_error`, the first failed batch aborts the run with
    /// `AppError::BatchFailed` or `AppError::ConnectionFailed`.
    pub async fn push_table(&self, table: &Table) -> Result<UploadResult, AppError> {
        let options = &self.options;
        info!(
            "[UPLOAD] PUT {} (batch size {}, retries {}, backoff {}, timeout {}s, dry run {})",
            options.url,
            options.batch_size,
            options.retry.retries,
            options.retry.backoff_factor,
            options.timeout.as_secs(),
            options.dry_run
        );

        let prepared = prepare_rows(table, options.send_policy)?;
        info!(
            "[UPLOAD] Rows: {} in sheet, {} to send, {} skipped",
            prepared.total_rows,
            prepared.rows.len(),
            prepared.dropped()
        );
        info!(
            "[UPLOAD] Blank-field counts: keyword={}, line={}, item={}",
            prepared.blanks.keyword, prepared.blanks.line, prepared.blanks.item
        );
        if prepared.item_without_line > 0 {
            warn!(
                "[UPLOAD] {} row(s) have an item but no line",
                prepared.item_without_line
            );
        }

        let mut result = UploadResult {
            total_rows_in_excel: prepared.total_rows,
            valid_rows: prepared.rows.len(),
            dropped_rows: prepared.dropped(),
            blank_counts: prepared.blanks,
            item_without_line: prepared.item_without_line,
            ..Default::default()
        };

        if options.dry_run {
            result.preview = prepared.rows.iter().take(PREVIEW_ROWS).cloned().collect();
            info!(
                "[UPLOAD] Dry run: {} batch(es) would be sent, nothing uploaded",
                prepared.rows.len().div_ceil(options.batch_size)
            );
            return Ok(result);
        }

        for (idx, batch) in prepared.rows.chunks(options.batch_size).enumerate() {
            let number = idx + 1;
            match self.send_batch(number, batch).await {
                Ok(ack) => {
                    result.batches_sent += 1;
                    result.received_total += ack.received;
                    result.inserted_total += ack.inserted;
                    if ack.json {
                        info!(
                            "[UPLOAD] Batch {}: sent={} received={} inserted={}",
                            number,
                            batch.len(),
                            ack.received,
                            ack.inserted
                        );
                    } else {
                        info!(
                            "[UPLOAD] Batch {}: sent={} (non-JSON response)",
                            number,
                            batch.len()
                        );
                    }
                }
                Err(e) if options.continue_on_error => {
                    warn!("[UPLOAD] Batch {} failed, continuing: {}", number, e);
                    result.failed_batches.push(number);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "[UPLOAD] Complete: {} batch(es) sent, received {}, inserted {}",
            result.batches_sent, result.received_total, result.inserted_total
        );
        if !result.failed_batches.is_empty() {
            warn!("[UPLOAD] Failed batches: {:?}", result.failed_batches);
        }
        Ok(result)
    }

    /// Sends one batch, retrying transient failures.
    async fn send_batch(&self, number: usize, rows: &[Record]) -> Result<BatchAck, AppError> {
        let policy = self.options.retry;
        let payload = json!({ "rows": rows });
        let mut retry = 0u32;

        loop {
            match self.http.put(&self.options.url).json(&payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if RetryPolicy::is_retryable_status(status) && retry < policy.retries {
                        retry += 1;
                        let hint = response
                            .headers()
                            .get(RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| parse_retry_after(v, Utc::now()));
                        let delay = policy.delay(retry, hint);
                        warn!(
                            "[UPLOAD] Batch {}: HTTP {}, retry {}/{} in {:.2}s",
                            number,
                            status.as_u16(),
                            retry,
                            policy.retries,
                            delay.as_secs_f64()
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    if status.is_client_error() || status.is_server_error() {
                        return Err(AppError::BatchFailed {
                            batch: number,
                            status: status.as_u16(),
                            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                        });
                    }
                    return Ok(BatchAck::from_body(&body));
                }
                Err(e) if retry < policy.retries => {
                    retry += 1;
                    let delay = policy.backoff(retry);
                    warn!(
                        "[UPLOAD] Batch {}: request failed ({}), retry {}/{} in {:.2}s",
                        number,
                        e,
                        retry,
                        policy.retries,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(AppError::ConnectionFailed(format!(
                        "batch {} failed after {} attempt(s): {}",
                        number,
                        retry + 1,
                        e
                    )));
                }
            }
        }
    }
}
