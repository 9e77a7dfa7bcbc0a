//! Keyword pipeline CLI.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keyword_pipeline::commands::{
    run_batch_pass, run_merge, run_pipeline, run_pull, run_push, run_split, Pass,
};
use keyword_pipeline::streaming::ChunkResult;
use keyword_pipeline::upload::UploadResult;
use keyword_pipeline::{AppError, PipelineConfig, PipelineState};

#[derive(Parser)]
#[command(name = "keyword-pipeline")]
#[command(about = "Pull, enrich, merge and push weekly keyword rows", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run date (YYYY-MM-DD) selecting the dated data folders
    #[arg(long, global = true)]
    date: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch keyword rows and keep last Monday's
    Pull {
        #[arg(long)]
        url: Option<String>,
        /// Output file or folder (default: input/<date>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        date_column: Option<String>,
        #[arg(long)]
        keyword_column: Option<String>,
    },

    /// Split a workbook into fixed-size chunks
    Split {
        #[arg(short, long)]
        input: PathBuf,
        /// Chunk folder (default: split/<date>)
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Run one assistant pass over a folder of chunks
    Batch {
        /// 1 or 2
        #[arg(long, default_value_t = 1)]
        pass: u8,
        #[arg(long)]
        input_dir: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Merge every workbook in a folder onto keyword/line/item
    Merge {
        #[arg(long)]
        input_dir: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        recursive: bool,
    },

    /// Push a workbook to the items endpoint in batches
    Push {
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Validate and preview without sending
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        retries: Option<u32>,
        #[arg(long)]
        backoff: Option<f64>,
        #[arg(long)]
        continue_on_error: bool,
        #[arg(long)]
        require_all_fields: bool,
        #[arg(long)]
        include_all_rows: bool,
    },

    /// Run every stage in order
    Run {
        /// Skip the final push, previewing it instead
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a configuration file with default values
    GenerateConfig {
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::GenerateConfig { output } => generate_config_command(&output),
        command => run_command(cli.config, cli.date, command).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("{:#}", e);
            eprintln!("{}", describe_failure(&e));
            ExitCode::FAILURE
        }
    }
}

/// Operator presentation for pipeline errors, the plain chain otherwise.
fn describe_failure(error: &anyhow::Error) -> String {
    match error.downcast_ref::<AppError>() {
        Some(app) => app.to_presentation().to_string(),
        None => format!("Error: {:#}", error),
    }
}

fn split_summary(result: &ChunkResult, chunk_size: usize) -> String {
    format!(
        "{} row(s) -> {} chunk(s) of up to {}",
        result.total_rows,
        result.chunk_paths.len(),
        chunk_size
    )
}

async fn run_command(
    config_path: Option<PathBuf>,
    date: Option<String>,
    command: Commands,
) -> Result<()> {
    let mut config = PipelineConfig::load(config_path.as_deref())?;
    if let Some(date) = date {
        config.run_date = Some(date);
    }
    apply_overrides(&mut config, &command);
    config.validate()?;

    let state = PipelineState::from_config(config)?;

    match command {
        Commands::Pull { output, .. } => {
            let report = run_pull(&state, output).await?;
            println!(
                "{} of {} row(s) dated {} -> {}",
                report.filtered_rows,
                report.total_rows,
                report.target_date,
                report.output_path.display()
            );
        }
        Commands::Split {
            input,
            output_dir,
            chunk_size,
        } => {
            let result = run_split(&state, &input, output_dir, chunk_size).await?;
            println!(
                "{}",
                split_summary(&result, chunk_size.unwrap_or(state.config.split.chunk_size))
            );
        }
        Commands::Batch {
            pass, input_dir, ..
        } => {
            let run = run_batch_pass(&state, Pass::from_number(pass)?, input_dir).await?;
            let summary = run.summary();
            println!(
                "{} file(s): {} ok, {} failed. Summary: {}",
                summary.total_files,
                summary.successful,
                summary.failed,
                run.summary_path.display()
            );
        }
        Commands::Merge {
            input_dir,
            output,
            recursive,
        } => {
            let report = run_merge(&state, input_dir, output, recursive).await?;
            println!(
                "{} row(s) from {} file(s) -> {}",
                report.rows_merged,
                report.files_merged,
                report.output_path.display()
            );
        }
        Commands::Push { input, dry_run, .. } => {
            let result = run_push(&state, input, dry_run).await?;
            print_push(&result, dry_run);
        }
        Commands::Run { dry_run } => {
            let report = run_pipeline(&state, dry_run).await?;
            print_push(&report.push, dry_run);
        }
        Commands::GenerateConfig { output } => generate_config_command(&output)?,
    }

    Ok(())
}

fn apply_overrides(config: &mut PipelineConfig, command: &Commands) {
    match command {
        Commands::Pull {
            url,
            date_column,
            keyword_column,
            ..
        } => {
            if let Some(url) = url {
                config.pull.url = url.clone();
            }
            if let Some(column) = date_column {
                config.pull.date_column = column.clone();
            }
            if let Some(column) = keyword_column {
                config.pull.keyword_column = column.clone();
            }
        }
        Commands::Batch {
            workers: Some(workers),
            ..
        } => {
            config.batch.workers = *workers;
        }
        Commands::Push {
            base_url,
            endpoint,
            batch_size,
            retries,
            backoff,
            continue_on_error,
            require_all_fields,
            include_all_rows,
            ..
        } => {
            let upload = &mut config.upload;
            if let Some(url) = base_url {
                upload.base_url = url.clone();
            }
            if let Some(endpoint) = endpoint {
                upload.endpoint = endpoint.clone();
            }
            if let Some(size) = batch_size {
                upload.batch_size = *size;
            }
            if let Some(retries) = retries {
                upload.retries = *retries;
            }
            if let Some(factor) = backoff {
                upload.backoff_factor = *factor;
            }
            upload.continue_on_error |= *continue_on_error;
            upload.require_all_fields |= *require_all_fields;
            upload.include_all_rows |= *include_all_rows;
        }
        _ => {}
    }
}

fn print_push(result: &UploadResult, dry_run: bool) {
    println!(
        "{} of {} row(s) valid, {} dropped",
        result.valid_rows, result.total_rows_in_excel, result.dropped_rows
    );
    if dry_run {
        println!("{}", result.preview_json());
    } else {
        println!(
            "{} batch(es) sent, {} received, {} inserted",
            result.batches_sent, result.received_total, result.inserted_total
        );
        if !result.failed_batches.is_empty() {
            println!("Failed batches: {:?}", result.failed_batches);
        }
    }
}

fn generate_config_command(output: &Path) -> Result<()> {
    let yaml = PipelineConfig::default().to_yaml()?;
    std::fs::write(output, yaml)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Configuration written to {}", output.display());
    Ok(())
}
