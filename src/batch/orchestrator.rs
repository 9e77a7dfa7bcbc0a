//! Batch orchestration of chunk files through the assistant service.
//!
//! Each chunk becomes one [`ProcessingJob`]. With one worker the jobs run
//! strictly in sequence; with more, up to `workers` jobs run concurrently
//! and each outcome is written to the slot of its chunk index, so the
//! returned list always follows chunk order. A failing or panicking job is
//! recorded as an error result and never stops its siblings.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::assistant::{
    AssistantProfile, Conversation, Gateway, ServiceClient, SubmitOutcome, SubmitRequest,
};
use crate::batch::scheduler::BatchScheduler;
use crate::error::AppError;
use crate::streaming::write_atomic;

/// Extensions picked up as chunk files.
const CHUNK_EXTENSIONS: &[&str] = &["xlsx", "xls"];

// ─────────────────────────────────────────────────────────────────────────────
// Traits for Testing
// ─────────────────────────────────────────────────────────────────────────────

/// Runs one job to completion, allowing test fakes.
pub trait JobRunner: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        job: &'a ProcessingJob,
    ) -> Pin<Box<dyn Future<Output = Result<SubmitOutcome, AppError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// One chunk file plus the attachments that travel with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    /// 1-based position in the batch
    pub index: usize,
    pub input_file: PathBuf,
    /// Chunk file first, then extras without duplicates
    pub attachments: Vec<PathBuf>,
}

impl ProcessingJob {
    pub fn new(index: usize, input_file: PathBuf, extra_attachments: &[PathBuf]) -> Self {
        let mut attachments = vec![input_file.clone()];
        for extra in extra_attachments {
            if !attachments.contains(extra) {
                attachments.push(extra.clone());
            }
        }

        Self {
            index,
            input_file,
            attachments,
        }
    }

    /// File name without directories, as reported in results.
    pub fn file_name(&self) -> String {
        self.input_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_file.display().to_string())
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Success { response: SubmitOutcome },
    Error { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub input_file: String,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Success { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Error { error } => Some(error),
            JobStatus::Success { .. } => None,
        }
    }

    fn failed(input_file: String, message: String) -> Self {
        Self {
            input_file,
            status: JobStatus::Error { error: message },
        }
    }
}

/// Aggregate counts, always derived from a result list.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary<'a> {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: &'a [JobResult],
}

impl<'a> BatchSummary<'a> {
    pub fn from_results(results: &'a [JobResult]) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        Self {
            total_files: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestration
// ─────────────────────────────────────────────────────────────────────────────

/// Builds one job per chunk file, in the given order.
pub fn build_jobs(chunk_files: Vec<PathBuf>, extra_attachments: &[PathBuf]) -> Vec<ProcessingJob> {
    chunk_files
        .into_iter()
        .enumerate()
        .map(|(i, path)| ProcessingJob::new(i + 1, path, extra_attachments))
        .collect()
}

/// Runs every job and returns results in job order.
///
/// # Errors
///
/// Returns `AppError::Config` if `workers` is 0. Job failures never error
/// the batch; they appear as `JobStatus::Error` entries.
pub async fn run_batch<R: JobRunner>(
    runner: Arc<R>,
    jobs: Vec<ProcessingJob>,
    workers: usize,
) -> Result<Vec<JobResult>, AppError> {
    let scheduler = BatchScheduler::new(workers)?;

    if jobs.is_empty() {
        warn!("[BATCH] No chunk files to process");
        return Ok(Vec::new());
    }

    let total = jobs.len();
    info!("[BATCH] Processing {} file(s) with {} worker(s)", total, workers);

    let results = if workers == 1 {
        let mut results = Vec::with_capacity(total);
        for job in &jobs {
            results.push(run_job(runner.as_ref(), job, total).await);
        }
        results
    } else {
        run_concurrent(runner, jobs, scheduler).await
    };

    let summary = BatchSummary::from_results(&results);
    info!(
        "[BATCH] Summary: total {}, successful {}, failed {}",
        summary.total_files, summary.successful, summary.failed
    );
    Ok(results)
}

async fn run_concurrent<R: JobRunner>(
    runner: Arc<R>,
    jobs: Vec<ProcessingJob>,
    scheduler: BatchScheduler,
) -> Vec<JobResult> {
    let total = jobs.len();
    let names: Vec<String> = jobs.iter().map(ProcessingJob::file_name).collect();
    let mut slots: Vec<Option<JobResult>> = vec![None; total];
    let mut join_set: JoinSet<(usize, JobResult)> = JoinSet::new();

    info!(
        "[BATCH] Spawning {} job(s) over {} worker slot(s)",
        total,
        scheduler.workers()
    );

    // Every job is spawned up front; the scheduler's permits bound how many run.
    for (slot, job) in jobs.into_iter().enumerate() {
        let runner = runner.clone();
        let scheduler = scheduler.clone();
        join_set.spawn(async move {
            let result = match scheduler.acquire().await {
                Ok(_permit) => run_job(runner.as_ref(), &job, total).await,
                Err(e) => JobResult::failed(job.file_name(), e.to_string()),
            };
            (slot, result)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((slot, result)) => slots[slot] = Some(result),
            Err(e) => error!("[BATCH] Task join error: {}", e),
        }
    }

    slots
        .into_iter()
        .zip(names)
        .map(|(slot, name)| {
            slot.unwrap_or_else(|| JobResult::failed(name, "job did not complete".into()))
        })
        .collect()
}

/// Runs one job, turning errors and panics into an error result.
async fn run_job<R: JobRunner + ?Sized>(runner: &R, job: &ProcessingJob, total: usize) -> JobResult {
    let name = job.file_name();
    info!("[BATCH] Processing file {}/{}: {}", job.index, total, name);

    let outcome = AssertUnwindSafe(runner.run(job)).catch_unwind().await;
    match outcome {
        Ok(Ok(response)) => {
            info!("[BATCH] OK {}", name);
            JobResult {
                input_file: name,
                status: JobStatus::Success { response },
            }
        }
        Ok(Err(e)) => {
            error!("[BATCH] FAIL {}: {}", name, e);
            JobResult::failed(name, e.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("[BATCH] FAIL {}: job panicked: {}", name, message);
            JobResult::failed(name, format!("job panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

/// Lists chunk workbooks directly inside `folder`, sorted case-insensitively.
///
/// Office lock files (`~$...`) are skipped.
pub fn discover_chunk_files(folder: &Path) -> Result<Vec<PathBuf>, AppError> {
    if !folder.is_dir() {
        return Err(AppError::FileNotFound(folder.display().to_string()));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            !name.starts_with("~$") && CHUNK_EXTENSIONS.contains(&ext.as_str())
        })
        .collect();

    files.sort_by_key(|p| p.to_string_lossy().to_lowercase());
    Ok(files)
}

/// Writes `{total_files, successful, failed, results}` as pretty JSON.
pub fn write_summary_json(path: &Path, results: &[JobResult]) -> Result<PathBuf, AppError> {
    let summary = BatchSummary::from_results(results);
    let json = serde_json::to_vec_pretty(&summary)
        .map_err(|e| AppError::Internal(format!("Failed to serialize batch summary: {}", e)))?;
    let written = write_atomic(path, &json)?;
    info!("[BATCH] Summary written to {}", written.display());
    Ok(written)
}

// ─────────────────────────────────────────────────────────────────────────────
// Assistant-backed runner
// ─────────────────────────────────────────────────────────────────────────────

/// Submits each job through the gateway with a fixed profile and instruction.
pub struct AssistantJobRunner {
    gateway: Gateway<ServiceClient>,
    profile: AssistantProfile,
    instruction: String,
    use_conversation: bool,
    output_dir: PathBuf,
}

impl AssistantJobRunner {
    pub fn new(
        gateway: Gateway<ServiceClient>,
        profile: AssistantProfile,
        instruction: impl Into<String>,
        use_conversation: bool,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            gateway,
            profile,
            instruction: instruction.into(),
            use_conversation,
            output_dir,
        }
    }

    fn request_for(&self, job: &ProcessingJob) -> SubmitRequest {
        let mut request = SubmitRequest::from_profile(&self.profile, self.instruction.clone());
        request.file_paths = job.attachments.clone();
        // fresh conversation per chunk
        request.conversation = Conversation::from_flag(self.use_conversation, None);
        request.output_dir = Some(self.output_dir.clone());
        request
    }
}

impl JobRunner for AssistantJobRunner {
    fn run<'a>(
        &'a self,
        job: &'a ProcessingJob,
    ) -> Pin<Box<dyn Future<Output = Result<SubmitOutcome, AppError>> + Send + 'a>> {
        Box::pin(self.gateway.submit(self.request_for(job)))
    }
}
