//! `batch` stage: run one assistant pass over a folder of chunk files.
//!
//! Pass 1 reads the split folder. Pass 2 reads pass 1's output and also
//! attaches the line-to-items mapping file. Each pass downloads generated
//! files into its own dated output folder, writes a JSON summary under
//! `logs/` and sends a batch acknowledgement.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::assistant::{AssistantProfile, Gateway, GatewaySettings, ServiceClient};
use crate::batch::{
    build_jobs, discover_chunk_files, run_batch, write_summary_json, AssistantJobRunner,
    BatchSummary, JobResult, JobRunner,
};
use crate::config::PassConfig;
use crate::error::AppError;
use crate::notify::{format_batch_ack, format_batch_failure};
use crate::state::PipelineState;

/// Which assistant pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    First,
    Second,
}

impl Pass {
    /// Maps `1` or `2` to a pass.
    pub fn from_number(number: u8) -> Result<Self, AppError> {
        match number {
            1 => Ok(Pass::First),
            2 => Ok(Pass::Second),
            other => Err(AppError::Config(format!("pass must be 1 or 2, got {}", other))),
        }
    }

    fn config(self, state: &PipelineState) -> &PassConfig {
        match self {
            Pass::First => &state.config.batch.pass1,
            Pass::Second => &state.config.batch.pass2,
        }
    }

    fn default_input_dir(self, state: &PipelineState) -> PathBuf {
        match self {
            Pass::First => state.layout.split_dir(),
            Pass::Second => state
                .layout
                .pass_output_dir(&state.config.batch.pass1.output_subdir),
        }
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub results: Vec<JobResult>,
    pub output_dir: PathBuf,
    pub summary_path: PathBuf,
}

impl BatchRun {
    pub fn summary(&self) -> BatchSummary<'_> {
        BatchSummary::from_results(&self.results)
    }
}

/// Resolved folders and attachments for one pass.
struct PassPlan {
    label: String,
    input_dir: PathBuf,
    output_dir: PathBuf,
    summary_path: PathBuf,
    extras: Vec<PathBuf>,
}

impl PassPlan {
    fn new(state: &PipelineState, pass: Pass, input_dir: Option<PathBuf>) -> Self {
        let config = pass.config(state);
        Self {
            label: config.label.clone(),
            input_dir: input_dir.unwrap_or_else(|| pass.default_input_dir(state)),
            output_dir: state.layout.pass_output_dir(&config.output_subdir),
            summary_path: state.layout.logs_dir().join(&config.summary_file),
            extras: config.mapping_file.iter().cloned().collect(),
        }
    }
}

/// Runs a pass through the assistant service.
pub async fn run_batch_pass(
    state: &PipelineState,
    pass: Pass,
    input_dir: Option<PathBuf>,
) -> Result<BatchRun, AppError> {
    let plan = PassPlan::new(state, pass, input_dir);
    match assistant_runner(state, pass, &plan) {
        Ok(runner) => execute(state, plan, Arc::new(runner)).await,
        Err(e) => {
            fail(state, &plan, &e).await;
            Err(e)
        }
    }
}

/// Runs a pass with a caller-supplied runner.
pub async fn run_batch_pass_with<R: JobRunner>(
    state: &PipelineState,
    pass: Pass,
    input_dir: Option<PathBuf>,
    runner: Arc<R>,
) -> Result<BatchRun, AppError> {
    let plan = PassPlan::new(state, pass, input_dir);
    execute(state, plan, runner).await
}

fn assistant_runner(
    state: &PipelineState,
    pass: Pass,
    plan: &PassPlan,
) -> Result<AssistantJobRunner, AppError> {
    let config = pass.config(state);
    let api_key = state.config.require_api_key()?.clone();
    let profile = AssistantProfile::load(&config.profile_path)?;
    let client = ServiceClient::new(&state.config.service, api_key)?;
    let gateway = Gateway::new(client, GatewaySettings::from(&state.config.service));

    Ok(AssistantJobRunner::new(
        gateway,
        profile,
        config.instruction.clone(),
        state.config.batch.use_conversation,
        plan.output_dir.clone(),
    ))
}

async fn execute<R: JobRunner>(
    state: &PipelineState,
    plan: PassPlan,
    runner: Arc<R>,
) -> Result<BatchRun, AppError> {
    match process(state, &plan, runner).await {
        Ok(results) => {
            let summary_path = plan.summary_path.display().to_string();
            state
                .notify(&format_batch_ack(&plan.label, &results, Some(&summary_path)))
                .await;
            Ok(BatchRun {
                results,
                output_dir: plan.output_dir,
                summary_path: plan.summary_path,
            })
        }
        Err(e) => {
            fail(state, &plan, &e).await;
            Err(e)
        }
    }
}

async fn process<R: JobRunner>(
    state: &PipelineState,
    plan: &PassPlan,
    runner: Arc<R>,
) -> Result<Vec<JobResult>, AppError> {
    for extra in &plan.extras {
        if !extra.is_file() {
            return Err(AppError::FileNotFound(extra.display().to_string()));
        }
    }

    info!(
        "[BATCH] {}: {} -> {}",
        plan.label,
        plan.input_dir.display(),
        plan.output_dir.display()
    );
    let files = discover_chunk_files(&plan.input_dir)?;
    tokio::fs::create_dir_all(&plan.output_dir).await?;

    let jobs = build_jobs(files, &plan.extras);
    let results = run_batch(runner, jobs, state.config.batch.workers).await?;
    write_summary_json(&plan.summary_path, &results)?;
    Ok(results)
}

async fn fail(state: &PipelineState, plan: &PassPlan, error: &AppError) {
    let summary_path = plan.summary_path.display().to_string();
    state
        .notify(&format_batch_failure(&plan.label, Some(&summary_path), error))
        .await;
}
