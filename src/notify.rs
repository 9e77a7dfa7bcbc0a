//! Operator notifications.
//!
//! Every stage reports success and failure through a [`Notifier`]. Delivery
//! is best effort: callers go through [`notify_best_effort`], which logs a
//! failed delivery and never retries it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::assistant::client::build_http_client;
use crate::batch::JobResult;
use crate::config::NotifyConfig;
use crate::error::AppError;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest OK or FAIL list in a batch acknowledgement.
const MAX_LISTED_FILES: usize = 50;

/// Sends one plain-text message.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

/// Posts `{"text": ...}` to a chat webhook.
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, AppError> {
        Ok(Self {
            http: build_http_client(WEBHOOK_TIMEOUT, false)?,
            url: url.into(),
        })
    }

    async fn post(&self, text: &str) -> Result<(), AppError> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        info!("[NOTIFY] POST webhook -> {}", status.as_u16());
        if !status.is_success() {
            return Err(AppError::ServiceError(format!(
                "webhook returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.post(text))
    }
}

/// Writes messages to the log when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            info!("[NOTIFY] {}", text.replace('\n', " | "));
            Ok(())
        })
    }
}

/// Webhook notifier when a URL is configured, log notifier otherwise.
pub fn from_config(config: &NotifyConfig) -> Result<Arc<dyn Notifier>, AppError> {
    match config.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(Arc::new(WebhookNotifier::new(url)?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}

/// Sends `text`, logging instead of returning any delivery failure.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.notify(text).await {
        warn!("[NOTIFY] Notification not delivered: {}", e);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message formatting
// ─────────────────────────────────────────────────────────────────────────────

/// Summary header shared by acknowledgements and failure notices.
pub fn format_batch_summary(
    label: &str,
    total: usize,
    successful: usize,
    failed: usize,
    summary_path: Option<&str>,
    error_message: Option<&str>,
) -> String {
    let mut lines = vec![
        format!("Batch processing acknowledgement - {}", label),
        format!("Total files: {}", total),
        format!("Successful: {}", successful),
        format!("Failed: {}", failed),
    ];
    if let Some(path) = summary_path {
        lines.push(format!("Summary JSON: {}", path));
    }
    if let Some(error) = error_message {
        lines.push(format!("Error: {}", error));
    }
    lines.join("\n")
}

/// Acknowledgement for a finished batch, listing OK and FAIL files.
pub fn format_batch_ack(label: &str, results: &[JobResult], summary_path: Option<&str>) -> String {
    let successful: Vec<&JobResult> = results.iter().filter(|r| r.is_success()).collect();
    let failed: Vec<&JobResult> = results.iter().filter(|r| !r.is_success()).collect();

    let mut text = format_batch_summary(
        label,
        results.len(),
        successful.len(),
        failed.len(),
        summary_path,
        None,
    );

    if !successful.is_empty() {
        text.push_str("\nSuccessful files:");
        for r in successful.iter().take(MAX_LISTED_FILES) {
            text.push_str(&format!("\n  OK  {}", r.input_file));
        }
        if successful.len() > MAX_LISTED_FILES {
            text.push_str(&format!("\n  ...and {} more", successful.len() - MAX_LISTED_FILES));
        }
    }

    if !failed.is_empty() {
        text.push_str("\nFailed files:");
        for r in failed.iter().take(MAX_LISTED_FILES) {
            text.push_str(&format!(
                "\n  FAIL {}: {}",
                r.input_file,
                r.error_message().unwrap_or("unknown error")
            ));
        }
        if failed.len() > MAX_LISTED_FILES {
            text.push_str(&format!("\n  ...and {} more", failed.len() - MAX_LISTED_FILES));
        }
    }

    text
}

/// Notice for a batch run that failed before producing results.
///
/// The error line carries the operator presentation, remedy included.
pub fn format_batch_failure(label: &str, summary_path: Option<&str>, error: &AppError) -> String {
    format_batch_summary(
        label,
        0,
        0,
        0,
        summary_path,
        Some(&format!("Batch run failed: {}", error.to_presentation())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::wire::ResponseStatus;
    use crate::assistant::SubmitOutcome;
    use crate::batch::JobStatus;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok(name: &str) -> JobResult {
        JobResult {
            input_file: name.into(),
            status: JobStatus::Success {
                response: SubmitOutcome {
                    response_id: "resp_1".into(),
                    conversation_id: None,
                    text: String::new(),
                    status: ResponseStatus::Completed,
                    model: "gpt-4o".into(),
                    files: Vec::new(),
                },
            },
        }
    }

    fn failed(name: &str) -> JobResult {
        JobResult {
            input_file: name.into(),
            status: JobStatus::Error {
                error: "Timed out".into(),
            },
        }
    }

    #[tokio::test]
    async fn webhook_posts_text_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({"text": "Split completed"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", server.uri())).unwrap();
        notifier.notify("Split completed").await.unwrap();
    }

    #[tokio::test]
    async fn webhook_error_is_swallowed_by_best_effort() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(server.uri()).unwrap();
        assert!(matches!(
            notifier.notify("hello").await,
            Err(AppError::ServiceError(_))
        ));
        notify_best_effort(&notifier, "hello again").await;
    }

    #[test]
    fn config_picks_notifier() {
        assert!(from_config(&NotifyConfig::default()).is_ok());
        assert!(from_config(&NotifyConfig {
            webhook_url: Some("https://chat.example.com/hook".into())
        })
        .is_ok());
    }

    #[test]
    fn ack_lists_ok_and_failed_files() {
        let results = vec![ok("a.xlsx"), failed("b.xlsx"), ok("c.xlsx")];
        let text = format_batch_ack("Assistant 1", &results, Some("logs/summary.json"));

        assert!(text.starts_with("Batch processing acknowledgement - Assistant 1\n"));
        assert!(text.contains("Total files: 3\nSuccessful: 2\nFailed: 1"));
        assert!(text.contains("Summary JSON: logs/summary.json"));
        assert!(text.contains("\n  OK  a.xlsx\n  OK  c.xlsx"));
        assert!(text.contains("\n  FAIL b.xlsx: Timed out"));
        assert!(!text.contains("more"));
    }

    #[test]
    fn ack_caps_long_lists() {
        let results: Vec<JobResult> = (0..53).map(|i| ok(&format!("f{}.xlsx", i))).collect();
        let text = format_batch_ack("Assistant 2", &results, None);
        assert_eq!(text.matches("  OK  ").count(), 50);
        assert!(text.ends_with("  ...and 3 more"));
        assert!(!text.contains("Failed files:"));
    }

    #[test]
    fn failure_notice_has_zero_counts() {
        let text = format_batch_failure(
            "Assistant 1",
            Some("logs/summary.json"),
            &AppError::Config("no key".into()),
        );
        assert!(text.contains("Total files: 0\nSuccessful: 0\nFailed: 0\nSummary JSON: logs/summary.json"));
        assert!(text.ends_with(
            "Error: Batch run failed: Configuration Error: no key\nAction: Fix the configuration file or environment and rerun"
        ));
    }
}
