//! Pipeline configuration.
//!
//! Loaded once from a YAML or JSON file (every section has defaults, so an
//! empty file is valid), then overlaid with environment variables. The
//! resulting struct is passed explicitly into each stage; nothing reads the
//! environment mid-operation.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Environment variables recognised by [`PipelineConfig::apply_env`].
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_BATCH_WORKERS: &str = "BATCH_WORKERS";
pub const ENV_COMPLETION_BUDGET: &str = "OPENAI_COMPLETION_BUDGET_TOKENS";
pub const ENV_INPUT_SAFETY: &str = "OPENAI_INPUT_SAFETY_TOKENS";
pub const ENV_TRIM_MARGIN: &str = "OPENAI_TRIM_MARGIN_TOKENS";
pub const ENV_WEBHOOK_URL: &str = "GOOGLE_CHAT_WEBHOOK_URL";
pub const ENV_RUN_DATE: &str = "RUN_DATE";

// ─────────────────────────────────────────────────────────────────────────────
// PipelineConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Main configuration for the keyword pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Assistant service connection and context budget
    #[serde(default)]
    pub service: ServiceConfig,

    /// Chunk splitting
    #[serde(default)]
    pub split: SplitConfig,

    /// Batch passes through the assistant service
    #[serde(default)]
    pub batch: BatchConfig,

    /// Bulk upload to the items endpoint
    #[serde(default)]
    pub upload: UploadConfig,

    /// Records pull from the keywords endpoint
    #[serde(default)]
    pub pull: PullConfig,

    /// Operator notifications
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Root of the dated data folders
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fixed run date (YYYY-MM-DD); defaults to today when unset
    #[serde(default)]
    pub run_date: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            split: SplitConfig::default(),
            batch: BatchConfig::default(),
            upload: UploadConfig::default(),
            pull: PullConfig::default(),
            notify: NotifyConfig::default(),
            data_dir: default_data_dir(),
            run_date: None,
        }
    }
}

/// Assistant service settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_base_url")]
    pub base_url: String,

    /// Never serialized; supplied through the environment only.
    #[serde(skip)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Seconds between status polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum seconds to wait for a response to leave queued/in_progress
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    #[serde(default = "default_completion_budget_tokens")]
    pub completion_budget_tokens: usize,

    #[serde(default = "default_input_safety_tokens")]
    pub input_safety_tokens: usize,

    #[serde(default = "default_trim_margin_tokens")]
    pub trim_margin_tokens: usize,

    /// Floor applied to the allowed input budget
    #[serde(default = "default_min_input_tokens")]
    pub min_input_tokens: usize,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("max_wait_secs", &self.max_wait_secs)
            .field("completion_budget_tokens", &self.completion_budget_tokens)
            .field("input_safety_tokens", &self.input_safety_tokens)
            .field("trim_margin_tokens", &self.trim_margin_tokens)
            .field("min_input_tokens", &self.min_input_tokens)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_service_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
            completion_budget_tokens: default_completion_budget_tokens(),
            input_safety_tokens: default_input_safety_tokens(),
            trim_margin_tokens: default_trim_margin_tokens(),
            min_input_tokens: default_min_input_tokens(),
        }
    }
}

/// Chunk splitting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Rows per chunk file
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// Batch pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Concurrent jobs; 1 runs chunks strictly in sequence
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Start a server-side conversation per job
    #[serde(default)]
    pub use_conversation: bool,

    #[serde(default = "PassConfig::first")]
    pub pass1: PassConfig,

    #[serde(default = "PassConfig::second")]
    pub pass2: PassConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            use_conversation: false,
            pass1: PassConfig::first(),
            pass2: PassConfig::second(),
        }
    }
}

/// One assistant pass over a folder of chunk files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassConfig {
    /// Label used in logs and notifications
    pub label: String,
    /// Assistant profile JSON
    pub profile_path: PathBuf,
    /// Instruction text sent with every chunk
    pub instruction: String,
    /// Output folder name under `data_dir`
    pub output_subdir: String,
    /// Summary JSON file name under `data_dir/logs`
    pub summary_file: String,
    /// Optional reference file attached to every job
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
}

impl PassConfig {
    pub fn first() -> Self {
        Self {
            label: "Assistant 1".into(),
            profile_path: PathBuf::from("assistant_1.json"),
            instruction: PASS1_INSTRUCTION.trim().to_string(),
            output_subdir: "assistant1_output".into(),
            summary_file: "batch_results_assistant1.json".into(),
            mapping_file: None,
        }
    }

    pub fn second() -> Self {
        Self {
            label: "Assistant 2".into(),
            profile_path: PathBuf::from("assistant_2.json"),
            instruction: PASS2_INSTRUCTION.trim().to_string(),
            output_subdir: "assistant2_output".into(),
            summary_file: "batch_results_assistant2.json".into(),
            mapping_file: Some(PathBuf::from("Items_Grouped_By_Line_ALL_ROWS.txt")),
        }
    }
}

/// Bulk upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_base_url")]
    pub base_url: String,

    #[serde(default = "default_upload_endpoint")]
    pub endpoint: String,

    /// Rows per PUT
    #[serde(default = "default_upload_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_upload_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries per batch after the first attempt
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base of the exponential backoff, in seconds
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// The items endpoint uses a self-signed certificate
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub continue_on_error: bool,

    #[serde(default)]
    pub require_all_fields: bool,

    #[serde(default)]
    pub include_all_rows: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: default_upload_base_url(),
            endpoint: default_upload_endpoint(),
            batch_size: default_upload_batch_size(),
            timeout_secs: default_upload_timeout_secs(),
            retries: default_retries(),
            backoff_factor: default_backoff_factor(),
            max_backoff_secs: default_max_backoff_secs(),
            accept_invalid_certs: true,
            continue_on_error: false,
            require_all_fields: false,
            include_all_rows: false,
        }
    }
}

/// Records pull settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    #[serde(default = "default_pull_url")]
    pub url: String,

    #[serde(default = "default_upload_timeout_secs")]
    pub timeout_secs: u64,

    /// Preferred date column; falls back to common spellings
    #[serde(default = "default_date_column")]
    pub date_column: String,

    /// Preferred keyword column; falls back to common spellings
    #[serde(default = "default_keyword_column")]
    pub keyword_column: String,

    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            url: default_pull_url(),
            timeout_secs: default_upload_timeout_secs(),
            date_column: default_date_column(),
            keyword_column: default_keyword_column(),
            accept_invalid_certs: true,
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Chat webhook; notifications are logged only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

impl PipelineConfig {
    /// Loads configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "json" => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, AppError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
            .map_err(|e| AppError::Config(format!("Invalid YAML configuration: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("Invalid JSON configuration: {}", e)))
    }

    pub fn to_yaml(&self) -> Result<String, AppError> {
        serde_yaml::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialize configuration: {}", e)))
    }

    /// Loads `.env`, reads the optional config file, applies the process
    /// environment and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::warn!("[CONFIG] {} not found, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays values from an environment lookup. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(key) = get(ENV_API_KEY) {
            self.service.api_key = Some(SecretString::from(key));
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.service.base_url = url;
        }
        if let Some(v) = get(ENV_BATCH_WORKERS) {
            self.batch.workers = parse_env(ENV_BATCH_WORKERS, &v)?;
        }
        if let Some(v) = get(ENV_COMPLETION_BUDGET) {
            self.service.completion_budget_tokens = parse_env(ENV_COMPLETION_BUDGET, &v)?;
        }
        if let Some(v) = get(ENV_INPUT_SAFETY) {
            self.service.input_safety_tokens = parse_env(ENV_INPUT_SAFETY, &v)?;
        }
        if let Some(v) = get(ENV_TRIM_MARGIN) {
            self.service.trim_margin_tokens = parse_env(ENV_TRIM_MARGIN, &v)?;
        }
        if let Some(url) = get(ENV_WEBHOOK_URL) {
            self.notify.webhook_url = Some(url);
        }
        if let Some(date) = get(ENV_RUN_DATE) {
            self.run_date = Some(date);
        }
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.split.chunk_size == 0 {
            return Err(AppError::Config("split.chunk_size must be > 0".into()));
        }
        if self.upload.batch_size == 0 {
            return Err(AppError::Config("upload.batch_size must be > 0".into()));
        }
        if self.batch.workers == 0 {
            return Err(AppError::Config("batch.workers must be >= 1".into()));
        }
        if self.service.poll_interval_secs == 0 {
            return Err(AppError::Config("service.poll_interval_secs must be > 0".into()));
        }
        if self.upload.backoff_factor < 0.0 {
            return Err(AppError::Config("upload.backoff_factor must not be negative".into()));
        }
        for (name, value) in [
            ("service.base_url", &self.service.base_url),
            ("upload.base_url", &self.upload.base_url),
            ("pull.url", &self.pull.url),
        ] {
            Url::parse(value)
                .map_err(|e| AppError::Config(format!("{} is not a valid URL: {}", name, e)))?;
        }
        if let Some(run_date) = &self.run_date {
            chrono::NaiveDate::parse_from_str(run_date, "%Y-%m-%d").map_err(|_| {
                AppError::Config(format!("run_date must be YYYY-MM-DD, got {}", run_date))
            })?;
        }
        Ok(())
    }

    /// Returns the API key or a configuration error naming the variable to set.
    pub fn require_api_key(&self) -> Result<&SecretString, AppError> {
        self.service
            .api_key
            .as_ref()
            .ok_or_else(|| AppError::Config(format!("{} is not set", ENV_API_KEY)))
    }

    /// Run date as `YYYY-MM-DD`, defaulting to today.
    pub fn run_date_or_today(&self) -> String {
        self.run_date
            .clone()
            .unwrap_or_else(|| chrono::Local::now().date_naive().format("%Y-%m-%d").to_string())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .parse()
        .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, value)))
}

// Default value functions for serde
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_service_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_request_timeout_secs() -> u64 { 300 }
fn default_poll_interval_secs() -> u64 { 2 }
fn default_max_wait_secs() -> u64 { 300 }
fn default_completion_budget_tokens() -> usize { 1024 }
fn default_input_safety_tokens() -> usize { 512 }
fn default_trim_margin_tokens() -> usize { 512 }
fn default_min_input_tokens() -> usize { 1024 }
fn default_chunk_size() -> usize { 100 }
fn default_workers() -> usize { 1 }
fn default_upload_base_url() -> String { "https://192.168.80.74".to_string() }
fn default_upload_endpoint() -> String { "/api/ws/items".to_string() }
fn default_upload_batch_size() -> usize { 300 }
fn default_upload_timeout_secs() -> u64 { 120 }
fn default_retries() -> u32 { 5 }
fn default_backoff_factor() -> f64 { 0.75 }
fn default_max_backoff_secs() -> u64 { 120 }
fn default_pull_url() -> String { "https://192.168.80.74/api/ws/keywords".to_string() }
fn default_date_column() -> String { "DDate".to_string() }
fn default_keyword_column() -> String { "KeyWord".to_string() }
fn default_true() -> bool { true }

const PASS1_INSTRUCTION: &str = r#"
Check the attachment of Key words of web searches report. For each term, assign the most relevant Line item using fuzzy matching, ensuring that every Key Word receives a Line assignment. If you are not able to map a specific "Line" to an item, keep it blank. Once "Line" is mapped, you have to extract the exact item name from the Key words values. If key word value has only line name, keep the "Item" column blank. Else you have to extract the exact item name by removing the "Line" value from it. Then create an excel file which should have a "Key Word", "Line" and "Item" as columns and their respective data. Make sure you ALWAYS provide an output excel file in the response for each request.
"#;

const PASS2_INSTRUCTION: &str = r#"
You will be provided with an Excel attachment containing web search report Key Words, where some records may already have Line and Item values populated, and a structured key-value dataset, where each key represents a Line and each value represents an Item belonging to that Line. Only process Key Words where both the "Line" and "Item" columns are currently blank; do not re-evaluate or modify any rows that already have a Line and/or Item assigned.
For each eligible blank Key Word, compare it against all available Item values across all Lines using strict fuzzy matching, with strong emphasis on handling spelling mistakes, including missing letters, extra letters, swapped characters, and spacing differences. If a relevant Item is confidently identified, assign that exact Item to the Key Word and derive the corresponding Line from the Item's parent key. Assign only one single Item per Key Word; do not combine, list, or concatenate multiple Items in any form. If more than one Item appears relevant, you must select only the single best (highest-confidence) match; if no clear single best Item exists, leave both Line and Item blank. Never output multiple Items separated by /, ;, |, commas, or new lines. Never assign a Line directly if a better match exists at the Item level; Item-level matches always take precedence over Line-level matches. If none of the Items are relevant to the Key Word, keep both Line and Item columns blank.
Finally, generate an Excel file that includes all original rows from the input along with any newly mapped Line and Item values, preserving existing assignments unchanged, ensuring no input data is dropped or omitted and that every Key Word appears in the final output. Make sure you always provide an output excel file in the response.
"#;
