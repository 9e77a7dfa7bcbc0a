//! Weekly keyword pipeline.
//!
//! Pulls last Monday's keyword rows, splits them into chunk workbooks, runs
//! two assistant passes over the chunks, merges the results onto
//! keyword/line/item and pushes them to the items endpoint in batches.

pub mod assistant;
pub mod batch;
pub mod commands;
pub mod config;
pub mod error;
pub mod notify;
pub mod pull;
pub mod record;
pub mod state;
pub mod streaming;
pub mod upload;

pub use config::PipelineConfig;
pub use error::AppError;
pub use record::Record;
pub use state::PipelineState;
