//! Shared state for pipeline commands.
//!
//! Holds the loaded configuration, the notifier and the run date that
//! selects the dated data folders.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::notify::{self, Notifier};

// ─────────────────────────────────────────────────────────────────────────────
// Data layout
// ─────────────────────────────────────────────────────────────────────────────

/// Dated folders under `data_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
    date: String,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>, date: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            date: date.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    /// `input/<date>`
    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input").join(&self.date)
    }

    /// `split/<date>`
    pub fn split_dir(&self) -> PathBuf {
        self.root.join("split").join(&self.date)
    }

    /// `<subdir>/<date>`, for assistant pass outputs.
    pub fn pass_output_dir(&self, subdir: &str) -> PathBuf {
        self.root.join(subdir).join(&self.date)
    }

    pub fn merged_dir(&self) -> PathBuf {
        self.root.join("merged")
    }

    /// `merged/merged_last_monday_<date>.xlsx`
    pub fn merged_file(&self) -> PathBuf {
        self.merged_dir()
            .join(format!("merged_last_monday_{}.xlsx", self.date))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline State
// ─────────────────────────────────────────────────────────────────────────────

/// State shared by every stage command.
pub struct PipelineState {
    pub config: Arc<PipelineConfig>,
    pub notifier: Arc<dyn Notifier>,
    pub layout: DataLayout,
}

impl PipelineState {
    pub fn new(config: PipelineConfig, notifier: Arc<dyn Notifier>) -> Self {
        let layout = DataLayout::new(config.data_dir.clone(), config.run_date_or_today());
        Self {
            config: Arc::new(config),
            notifier,
            layout,
        }
    }

    /// Builds state with the notifier the configuration asks for.
    pub fn from_config(config: PipelineConfig) -> Result<Self, AppError> {
        let notifier = notify::from_config(&config.notify)?;
        Ok(Self::new(config, notifier))
    }

    /// The run date as a calendar date.
    pub fn run_date(&self) -> Result<NaiveDate, AppError> {
        NaiveDate::parse_from_str(self.layout.date(), "%Y-%m-%d").map_err(|_| {
            AppError::Config(format!(
                "run_date must be YYYY-MM-DD, got {}",
                self.layout.date()
            ))
        })
    }

    pub async fn notify(&self, text: &str) {
        notify::notify_best_effort(self.notifier.as_ref(), text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;

    #[test]
    fn layout_paths_are_dated() {
        let layout = DataLayout::new("data", "2026-10-12");
        assert_eq!(layout.input_dir(), PathBuf::from("data/input/2026-10-12"));
        assert_eq!(layout.split_dir(), PathBuf::from("data/split/2026-10-12"));
        assert_eq!(
            layout.pass_output_dir("assistant1_output"),
            PathBuf::from("data/assistant1_output/2026-10-12")
        );
        assert_eq!(
            layout.merged_file(),
            PathBuf::from("data/merged/merged_last_monday_2026-10-12.xlsx")
        );
        assert_eq!(layout.logs_dir(), PathBuf::from("data/logs"));
    }

    #[test]
    fn state_uses_configured_run_date() {
        let config = PipelineConfig {
            run_date: Some("2026-10-12".into()),
            ..PipelineConfig::default()
        };
        let state = PipelineState::new(config, Arc::new(LogNotifier));
        assert_eq!(state.layout.date(), "2026-10-12");
        assert_eq!(
            state.run_date().unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 12).unwrap()
        );
    }
}
