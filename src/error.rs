use std::fmt;

use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for operator display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "authorization:",
    "api_key=",
    "api_key:",
    "sk-",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for operator display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Operator-facing error presentation, used for notifications and CLI output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// `<title>: <message>`, then `Action: <action>` on its own line when present.
impl fmt::Display for ErrorPresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)?;
        if let Some(action) = &self.action {
            write!(f, "\nAction: {}", action)?;
        }
        Ok(())
    }
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("No rows eligible to send: {0}")]
    NoEligibleRows(String),

    // ── Transport ─────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    // ── External service ──────────────────────────────────────────────────────
    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Timed out after {waited_secs}s waiting for completion")]
    Timeout { waited_secs: u64 },

    // ── Upload ────────────────────────────────────────────────────────────────
    #[error("Batch {batch} failed with status {status}: {body}")]
    BatchFailed { batch: usize, status: u16, body: String },

    // ── File / Spreadsheet ────────────────────────────────────────────────────
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("I/O error: {0}")]
    Io(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into an operator-friendly presentation.
    /// Never leaks API keys, bearer tokens or authorization headers.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Configuration ─────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Configuration Error".into(),
                message: sanitize_message(msg, "The pipeline configuration is invalid."),
                action: Some("Fix the configuration file or environment and rerun".into()),
            },

            AppError::FileNotFound(path) => ErrorPresentation {
                title: "File Not Found".into(),
                message: format!("Could not find {}", path),
                action: Some("Check the path or run the previous stage first".into()),
            },

            AppError::MissingColumns(msg) => ErrorPresentation {
                title: "Missing Columns".into(),
                message: format!("The spreadsheet is missing required columns: {}", msg),
                action: Some("Add a keyword, line or item column and rerun".into()),
            },

            AppError::EmptyDataset(msg) => ErrorPresentation {
                title: "Empty Dataset".into(),
                message: format!("There is no data to process: {}", msg),
                action: Some("Check the input source produced rows".into()),
            },

            AppError::NoEligibleRows(msg) => ErrorPresentation {
                title: "Nothing To Send".into(),
                message: format!("No rows passed the send policy: {}", msg),
                action: Some("Relax the send policy or check the merged file".into()),
            },

            // ── Transport ─────────────────────────────────────────────────────
            AppError::ConnectionFailed(msg) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: sanitize_message(msg, "Could not reach the remote service."),
                action: Some("Check network and retry".into()),
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("The remote service is limiting requests. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            // ── External service ──────────────────────────────────────────────
            AppError::ServiceError(msg) => ErrorPresentation {
                title: "Service Error".into(),
                message: sanitize_message(msg, "The assistant service returned an error."),
                action: None,
            },

            AppError::Decode(msg) => ErrorPresentation {
                title: "Unexpected Response".into(),
                message: sanitize_message(msg, "A response could not be understood."),
                action: None,
            },

            AppError::Timeout { waited_secs } => ErrorPresentation {
                title: "Timed Out".into(),
                message: format!("The request did not complete within {} seconds.", waited_secs),
                action: Some("Retry later or raise the maximum wait".into()),
            },

            // ── Upload ────────────────────────────────────────────────────────
            AppError::BatchFailed { batch, status, body } => ErrorPresentation {
                title: "Upload Failed".into(),
                message: sanitize_message(
                    &format!("Batch {} was rejected with status {}: {}", batch, status, body),
                    &format!("Batch {} was rejected with status {}.", batch, status),
                ),
                action: Some("Review the error and rerun the push stage".into()),
            },

            // ── File / Spreadsheet ────────────────────────────────────────────
            AppError::Spreadsheet(msg) => ErrorPresentation {
                title: "Spreadsheet Error".into(),
                message: format!("Error while processing spreadsheet: {}", msg),
                action: Some("Check the workbook format".into()),
            },

            AppError::Io(msg) => ErrorPresentation {
                title: "File Error".into(),
                message: sanitize_message(msg, "A file operation failed."),
                action: Some("Check permissions and free disk space".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::FileNotFound(e.to_string())
        } else {
            AppError::Io(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns all AppError variants for exhaustive testing.
    fn all_variants() -> Vec<AppError> {
        vec![
            // Configuration
            AppError::Config("chunk size must be > 0".into()),
            AppError::FileNotFound("data/merged.xlsx".into()),
            AppError::MissingColumns("keyword, line, item".into()),
            AppError::EmptyDataset("input.xlsx".into()),
            AppError::NoEligibleRows("require_all_fields".into()),
            // Transport
            AppError::ConnectionFailed("timeout".into()),
            AppError::RateLimited { retry_after_secs: Some(30) },
            AppError::RateLimited { retry_after_secs: None },
            // External service
            AppError::ServiceError("model not found".into()),
            AppError::Decode("missing field id".into()),
            AppError::Timeout { waited_secs: 300 },
            // Upload
            AppError::BatchFailed { batch: 2, status: 400, body: "bad row".into() },
            // Files
            AppError::Spreadsheet("no sheets".into()),
            AppError::Io("permission denied".into()),
            // Generic
            AppError::Internal("something broke".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_title_and_message() {
        for variant in all_variants() {
            let presentation = variant.to_presentation();
            assert!(
                !presentation.title.trim().is_empty(),
                "Empty title for {:?}",
                variant
            );
            assert!(
                !presentation.message.trim().is_empty(),
                "Empty message for {:?}",
                variant
            );
        }
    }

    #[test]
    fn configuration_errors_carry_remedy_hint() {
        let config_errors = vec![
            AppError::Config("bad".into()),
            AppError::FileNotFound("x.xlsx".into()),
            AppError::MissingColumns("keyword".into()),
            AppError::EmptyDataset("x.xlsx".into()),
            AppError::NoEligibleRows("default".into()),
        ];

        for variant in config_errors {
            let presentation = variant.to_presentation();
            let action = presentation.action.expect("configuration error should have action");
            assert!(!action.trim().is_empty(), "Empty action for {:?}", variant);
        }
    }

    #[test]
    fn rate_limited_suggests_wait_retry() {
        let presentation = AppError::RateLimited { retry_after_secs: Some(30) }.to_presentation();
        let action = presentation.action.expect("RateLimited should have action");
        let action_lower = action.to_lowercase();
        assert!(
            action_lower.contains("wait") || action_lower.contains("retry"),
            "RateLimited action should mention wait/retry, got: {}",
            action
        );
        assert!(
            presentation.message.contains("30"),
            "RateLimited message should mention retry_after_secs"
        );
    }

    #[test]
    fn io_not_found_maps_to_file_not_found() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, AppError::FileNotFound(_)));

        let err: AppError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no").into();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[test]
    fn presentation_renders_action_line() {
        let text = AppError::FileNotFound("data/merged/x.xlsx".into())
            .to_presentation()
            .to_string();
        assert_eq!(
            text,
            "File Not Found: Could not find data/merged/x.xlsx\nAction: Check the path or run the previous stage first"
        );

        let text = AppError::ServiceError("model not found".into())
            .to_presentation()
            .to_string();
        assert_eq!(text, "Service Error: model not found");
        assert!(!text.contains("Action:"));
    }

    #[test]
    fn naming_a_missing_key_is_not_a_leak() {
        let presentation = AppError::Config("OPENAI_API_KEY is not set".into()).to_presentation();
        assert_eq!(presentation.message, "OPENAI_API_KEY is not set");

        let presentation = AppError::Config("OPENAI_API_KEY: abc".into()).to_presentation();
        assert_eq!(presentation.message, "The pipeline configuration is invalid.");
    }

    #[test]
    fn connection_detail_is_kept_unless_sensitive() {
        let presentation = AppError::ConnectionFailed("batch 2 failed after 3 attempt(s)".into())
            .to_presentation();
        assert_eq!(presentation.message, "batch 2 failed after 3 attempt(s)");
    }

    #[test]
    fn no_secret_leakage_in_presentation() {
        let test_cases: Vec<(&str, AppError)> = vec![
            ("Config", AppError::Config("OPENAI_API_KEY=sk-abc123".into())),
            ("ServiceError", AppError::ServiceError("Authorization: Bearer sk-live".into())),
            ("Decode", AppError::Decode("bearer token in body".into())),
            ("ConnectionFailed", AppError::ConnectionFailed("api_key=xyz".into())),
            ("Internal", AppError::Internal("sk-leaked".into())),
            ("BatchFailed", AppError::BatchFailed {
                batch: 1,
                status: 401,
                body: "Bearer sk-123 invalid".into(),
            }),
        ];

        for (label, variant) in test_cases {
            let presentation = variant.to_presentation();
            let output_lower = format!(
                "{} {} {}",
                presentation.title,
                presentation.message,
                presentation.action.as_deref().unwrap_or("")
            )
            .to_ascii_lowercase();

            for pattern in SENSITIVE_PATTERNS {
                assert!(
                    !output_lower.contains(pattern),
                    "{} presentation contains sensitive pattern",
                    label
                );
            }
        }
    }
}
