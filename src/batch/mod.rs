//! Batch processing of chunk files.
//!
//! - `scheduler`: semaphore-backed worker slots
//! - `orchestrator`: ordered, failure-isolated job runs and batch summaries

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{
    build_jobs, discover_chunk_files, run_batch, write_summary_json, AssistantJobRunner,
    BatchSummary, JobResult, JobRunner, JobStatus, ProcessingJob,
};
pub use scheduler::{BatchScheduler, WorkerPermit};
