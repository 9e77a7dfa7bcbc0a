//! Submission workflow against the assistant service.
//!
//! One `submit` call runs the full lifecycle for a single request:
//! upload attachments, optionally open a conversation, build the prompt
//! (with spreadsheet text dumps clipped to the context budget), create the
//! response, poll until it settles, download generated files, and delete
//! the uploaded inputs.
//!
//! Failure semantics:
//! - any step up to and including polling aborts the call with its error
//! - download and delete failures are logged and do not fail the call
//! - once any upload succeeded, uploaded ids are deleted on every exit path

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::assistant::budget::{estimate_tokens, ContextBudget};
use crate::assistant::client::{redact_id, ServiceClient};
use crate::assistant::profile::{AssistantProfile, BuiltinTool, Sampling, ToolSpec};
use crate::assistant::wire::{
    CreateResponseRequest, GeneratedFile, InputItem, ResponseObject, ResponseStatus,
    CONTAINER_FILE_PREFIX,
};
use crate::config::ServiceConfig;
use crate::error::AppError;
use crate::streaming::workbook::{render_text_dump, DUMP_EXTENSIONS};

// ─────────────────────────────────────────────────────────────────────────────
// Traits for Testing
// ─────────────────────────────────────────────────────────────────────────────

/// Remote operations the gateway needs, allowing test fakes.
pub trait AssistantApi: Send + Sync {
    fn upload_file<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>>;

    fn create_conversation(
        &self,
        metadata: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + '_>>;

    fn create_response<'a>(
        &'a self,
        request: &'a CreateResponseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ResponseObject, AppError>> + Send + 'a>>;

    fn retrieve_response<'a>(
        &'a self,
        response_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ResponseObject, AppError>> + Send + 'a>>;

    fn download_file<'a>(
        &'a self,
        file: &'a GeneratedFile,
        output_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>>;

    fn delete_file<'a>(
        &'a self,
        file_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

impl AssistantApi for ServiceClient {
    fn upload_file<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(ServiceClient::upload_file(self, path))
    }

    fn create_conversation(
        &self,
        metadata: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + '_>> {
        Box::pin(ServiceClient::create_conversation(self, metadata))
    }

    fn create_response<'a>(
        &'a self,
        request: &'a CreateResponseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ResponseObject, AppError>> + Send + 'a>> {
        Box::pin(ServiceClient::create_response(self, request))
    }

    fn retrieve_response<'a>(
        &'a self,
        response_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ResponseObject, AppError>> + Send + 'a>> {
        Box::pin(ServiceClient::retrieve_response(self, response_id))
    }

    fn download_file<'a>(
        &'a self,
        file: &'a GeneratedFile,
        output_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>> {
        Box::pin(ServiceClient::download_file(self, file, output_path))
    }

    fn delete_file<'a>(
        &'a self,
        file_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(ServiceClient::delete_file(self, file_id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Conversation handling for one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Conversation {
    /// Each call stands alone.
    #[default]
    Stateless,
    /// Open a fresh server-side conversation for this call.
    New,
    /// Reuse an existing conversation.
    Continuing(String),
}

impl Conversation {
    /// Maps the `use_conversation` flag and an optional existing id.
    pub fn from_flag(use_conversation: bool, existing: Option<String>) -> Self {
        match (existing, use_conversation) {
            (Some(id), _) => Conversation::Continuing(id),
            (None, true) => Conversation::New,
            (None, false) => Conversation::Stateless,
        }
    }
}

/// Everything one submission needs.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub model: String,
    pub instructions: String,
    pub user_message: String,
    pub tools: Vec<ToolSpec>,
    pub file_paths: Vec<PathBuf>,
    pub conversation: Conversation,
    pub sampling: Option<Sampling>,
    /// Where generated files land; the working directory when unset
    pub output_dir: Option<PathBuf>,
    /// Metadata attached to a newly created conversation
    pub metadata: Map<String, Value>,
}

impl SubmitRequest {
    /// Starts a request from a profile's model, instructions, tools and sampling.
    pub fn from_profile(profile: &AssistantProfile, user_message: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("assistant_id".into(), json!(profile.id));
        metadata.insert("assistant_name".into(), json!(profile.name));

        Self {
            model: profile.model.clone(),
            instructions: profile.instructions.clone(),
            user_message: user_message.into(),
            tools: profile.tools.clone(),
            file_paths: Vec::new(),
            conversation: Conversation::Stateless,
            sampling: profile.sampling,
            output_dir: None,
            metadata,
        }
    }
}

/// A generated file saved locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadedFile {
    pub file_id: String,
    pub filename: Option<String>,
    pub local_path: PathBuf,
}

/// Result of a completed submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub response_id: String,
    pub conversation_id: Option<String>,
    pub text: String,
    pub status: ResponseStatus,
    pub model: String,
    pub files: Vec<DownloadedFile>,
}

/// Polling and budget settings.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub budget: ContextBudget,
}

impl From<&ServiceConfig> for GatewaySettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_wait: Duration::from_secs(config.max_wait_secs),
            budget: ContextBudget::from(config),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

/// Runs submissions against an [`AssistantApi`].
pub struct Gateway<A> {
    api: A,
    settings: GatewaySettings,
}

impl<A: AssistantApi> Gateway<A> {
    pub fn new(api: A, settings: GatewaySettings) -> Self {
        Self { api, settings }
    }

    /// Runs the full submission lifecycle.
    ///
    /// # Errors
    ///
    /// - Upload, conversation, submit and poll errors abort the call
    /// - `AppError::Timeout` when the response stays pending past `max_wait`
    /// - `AppError::ServiceError` when the response ends failed, cancelled or incomplete
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, AppError> {
        let mut uploaded: Vec<String> = Vec::with_capacity(request.file_paths.len());
        for path in &request.file_paths {
            match self.api.upload_file(path).await {
                Ok(id) => {
                    info!(
                        "[ASSISTANT] Uploaded {} as {}",
                        display_name(path),
                        redact_id(&id)
                    );
                    uploaded.push(id);
                }
                Err(e) => {
                    self.cleanup(&uploaded).await;
                    return Err(e);
                }
            }
        }

        let result = self.run_uploaded(&request, &uploaded).await;
        self.cleanup(&uploaded).await;
        result
    }

    async fn run_uploaded(
        &self,
        request: &SubmitRequest,
        file_ids: &[String],
    ) -> Result<SubmitOutcome, AppError> {
        let conversation_id = match &request.conversation {
            Conversation::Stateless => {
                info!("[ASSISTANT] Running stateless (no conversation)");
                None
            }
            Conversation::New => Some(
                self.api
                    .create_conversation(request.metadata.clone())
                    .await?,
            ),
            Conversation::Continuing(id) => {
                info!("[ASSISTANT] Using conversation {}", redact_id(id));
                Some(id.clone())
            }
        };

        let message = self.build_message(request).await;
        let payload = build_response_request(request, message, file_ids, conversation_id.clone());

        let created = self.api.create_response(&payload).await?;
        let response = self.wait_until_settled(created).await?;

        if response.status.is_failure() {
            return Err(AppError::ServiceError(response.failure_message()));
        }

        let text = response.output_text();
        let files = self
            .download_generated(&response.generated_files(), request.output_dir.as_deref())
            .await;

        Ok(SubmitOutcome {
            response_id: response.id,
            conversation_id,
            text,
            status: response.status,
            model: request.model.clone(),
            files,
        })
    }

    /// Appends spreadsheet text dumps to the user message, then clips to budget.
    async fn build_message(&self, request: &SubmitRequest) -> String {
        let mut message = request.user_message.clone();

        for path in request.file_paths.iter().filter(|p| is_dump_candidate(p)) {
            let owned = path.clone();
            let dump = tokio::task::spawn_blocking(move || render_text_dump(&owned)).await;
            match dump {
                Ok(Ok(text)) => {
                    message.push_str(&format!(
                        "\n\nExcel Content from {}:\n{}\n",
                        display_name(path),
                        text
                    ));
                }
                Ok(Err(e)) => warn!(
                    "[ASSISTANT] Could not render {} for the prompt: {}",
                    display_name(path),
                    e
                ),
                Err(e) => warn!("[ASSISTANT] Prompt rendering task failed: {}", e),
            }
        }

        let before = estimate_tokens(&message);
        let limit = self.settings.budget.max_message_tokens(&request.model);
        if before > limit {
            info!(
                "[ASSISTANT] Trimming user message from ~{} to ~{} tokens to fit context window",
                before, limit
            );
        }
        self.settings.budget.fit(&request.model, message)
    }

    /// Re-fetches the response while it is queued or in progress.
    ///
    /// A failed status fetch is logged and polling continues until the deadline.
    async fn wait_until_settled(&self, mut response: ResponseObject) -> Result<ResponseObject, AppError> {
        let start = Instant::now();

        while response.status.is_pending() {
            if start.elapsed() > self.settings.max_wait {
                return Err(AppError::Timeout {
                    waited_secs: self.settings.max_wait.as_secs(),
                });
            }

            info!(
                "[ASSISTANT] Response {} is {}, waiting...",
                redact_id(&response.id),
                response.status.as_str()
            );
            tokio::time::sleep(self.settings.poll_interval).await;

            match self.api.retrieve_response(&response.id).await {
                Ok(latest) => response = latest,
                Err(e) => warn!(
                    "[ASSISTANT] Status check for {} failed: {}",
                    redact_id(&response.id),
                    e
                ),
            }
        }

        info!(
            "[ASSISTANT] Response {} settled with status {}",
            redact_id(&response.id),
            response.status.as_str()
        );
        Ok(response)
    }

    /// Downloads each generated file; failures are logged and omitted.
    async fn download_generated(
        &self,
        files: &[GeneratedFile],
        output_dir: Option<&Path>,
    ) -> Vec<DownloadedFile> {
        if files.is_empty() {
            return Vec::new();
        }
        info!("[ASSISTANT] Found {} generated file(s)", files.len());

        let dir = output_dir.unwrap_or_else(|| Path::new("."));
        let mut downloaded = Vec::with_capacity(files.len());

        for file in files {
            if file.is_container_file() && file.container_id.is_none() {
                warn!(
                    "[ASSISTANT] Skipping container file {} without a container id",
                    redact_id(&file.file_id)
                );
                continue;
            }

            let local_path = dir.join(safe_file_name(file));
            match self.api.download_file(file, &local_path).await {
                Ok(_) => downloaded.push(DownloadedFile {
                    file_id: file.file_id.clone(),
                    filename: file.filename.clone(),
                    local_path,
                }),
                Err(e) => warn!(
                    "[ASSISTANT] Download of {} failed: {}",
                    redact_id(&file.file_id),
                    e
                ),
            }
        }

        downloaded
    }

    /// Best-effort deletion of uploaded inputs. Container files are left to the service.
    async fn cleanup(&self, file_ids: &[String]) {
        if file_ids.is_empty() {
            return;
        }
        info!("[ASSISTANT] Cleaning up {} uploaded file(s)", file_ids.len());

        for id in file_ids {
            if id.starts_with(CONTAINER_FILE_PREFIX) {
                info!("[ASSISTANT] Skipping deletion of container file {}", redact_id(id));
                continue;
            }
            if let Err(e) = self.api.delete_file(id).await {
                warn!("[ASSISTANT] Failed to delete {}: {}", redact_id(id), e);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Building
// ─────────────────────────────────────────────────────────────────────────────

/// Assembles the outbound payload.
///
/// File reference items are included unless a built-in tool is requested, in
/// which case the files travel through the tool configuration instead.
pub fn build_response_request(
    request: &SubmitRequest,
    message: String,
    file_ids: &[String],
    conversation_id: Option<String>,
) -> CreateResponseRequest {
    let mut input = Vec::with_capacity(file_ids.len() + 1);
    if !message.is_empty() {
        input.push(InputItem::user_text(message));
    }

    let tools = configure_tools(&request.tools, file_ids);
    if !request.tools.iter().any(ToolSpec::is_builtin) {
        input.extend(file_ids.iter().map(|id| InputItem::InputFile {
            file_id: id.clone(),
        }));
    }

    let sampling = request.sampling.unwrap_or_default();
    CreateResponseRequest {
        model: request.model.clone(),
        instructions: request.instructions.clone(),
        input,
        tools,
        temperature: sampling.temperature,
        top_p: sampling.top_p,
        conversation: conversation_id,
    }
}

/// Converts tool specs to request JSON.
///
/// The code sandbox gets the uploaded file ids; retrieval search is dropped
/// since no search index is configured.
pub fn configure_tools(tools: &[ToolSpec], file_ids: &[String]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|spec| match spec {
            ToolSpec::Builtin {
                tool: BuiltinTool::FileSearch,
                ..
            } => {
                warn!("[ASSISTANT] file_search requires a vector store; skipping it");
                None
            }
            ToolSpec::Builtin { tool, settings } => {
                let mut obj = settings.clone();
                obj.insert("type".into(), json!(tool.as_str()));
                if *tool == BuiltinTool::CodeInterpreter {
                    obj.insert(
                        "container".into(),
                        json!({"type": "auto", "file_ids": file_ids}),
                    );
                }
                Some(Value::Object(obj))
            }
            ToolSpec::Function(value) => Some(value.clone()),
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

fn is_dump_candidate(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| DUMP_EXTENSIONS.contains(&ext.as_str()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Base name of the reported filename, or `output_<file_id>.bin`.
///
/// The fallback keeps only ASCII alphanumerics, `-`, `_` and `.` from the id,
/// so it is always a single path component.
pub fn safe_file_name(file: &GeneratedFile) -> String {
    file.filename
        .as_deref()
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("output_{}.bin", file_id_component(&file.file_id)))
}

fn file_id_component(file_id: &str) -> String {
    file_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::wire::decode_response;
    use crate::streaming::workbook::{write_table, Table};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    // ─────────────────────────────────────────────────────────────────────────
    // Fake API
    // ─────────────────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeApi {
        upload_counter: AtomicUsize,
        fail_upload_at: Option<usize>,
        fail_create: bool,
        /// Responses returned by retrieve, in order; the last one repeats.
        polls: Mutex<VecDeque<Result<String, AppError>>>,
        created_status: Option<&'static str>,
        output: Value,
        requests: Mutex<Vec<CreateResponseRequest>>,
        conversations: AtomicUsize,
        downloads: Mutex<Vec<(String, PathBuf)>>,
        fail_download: bool,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn response_json(&self, status: &str) -> String {
            let output = if self.output.is_null() {
                json!([])
            } else {
                self.output.clone()
            };
            json!({"id": "resp_fake_0001", "status": status, "output": output}).to_string()
        }
    }

    impl AssistantApi for FakeApi {
        fn upload_file<'a>(
            &'a self,
            _path: &'a Path,
        ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
            Box::pin(async move {
                let n = self.upload_counter.fetch_add(1, Ordering::SeqCst);
                if self.fail_upload_at == Some(n) {
                    return Err(AppError::ConnectionFailed("upload reset".into()));
                }
                Ok(format!("file-{}", n))
            })
        }

        fn create_conversation(
            &self,
            _metadata: Map<String, Value>,
        ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + '_>> {
            Box::pin(async move {
                let n = self.conversations.fetch_add(1, Ordering::SeqCst);
                Ok(format!("conv_{}", n))
            })
        }

        fn create_response<'a>(
            &'a self,
            request: &'a CreateResponseRequest,
        ) -> Pin<Box<dyn Future<Output = Result<ResponseObject, AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request.clone());
                if self.fail_create {
                    return Err(AppError::ServiceError("HTTP 400 bad request".into()));
                }
                decode_response(&self.response_json(self.created_status.unwrap_or("completed")))
            })
        }

        fn retrieve_response<'a>(
            &'a self,
            _response_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<ResponseObject, AppError>> + Send + 'a>> {
            Box::pin(async move {
                let next = {
                    let mut polls = self.polls.lock().unwrap();
                    if polls.len() > 1 {
                        polls.pop_front()
                    } else {
                        polls.front().map(|r| match r {
                            Ok(s) => Ok(s.clone()),
                            Err(_) => Err(AppError::ConnectionFailed("again".into())),
                        })
                    }
                };
                match next {
                    Some(Ok(status)) => decode_response(&self.response_json(&status)),
                    Some(Err(e)) => Err(e),
                    None => decode_response(&self.response_json("completed")),
                }
            })
        }

        fn download_file<'a>(
            &'a self,
            file: &'a GeneratedFile,
            output_path: &'a Path,
        ) -> Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail_download {
                    return Err(AppError::ConnectionFailed("download reset".into()));
                }
                self.downloads
                    .lock()
                    .unwrap()
                    .push((file.file_id.clone(), output_path.to_path_buf()));
                Ok(1)
            })
        }

        fn delete_file<'a>(
            &'a self,
            file_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                self.deleted.lock().unwrap().push(file_id.to_string());
                Ok(())
            })
        }
    }

    fn fast_settings() -> GatewaySettings {
        GatewaySettings {
            poll_interval: Duration::from_millis(5),
            max_wait: Duration::from_millis(200),
            budget: ContextBudget::default(),
        }
    }

    fn base_request(files: Vec<PathBuf>) -> SubmitRequest {
        SubmitRequest {
            model: "gpt-4o".into(),
            instructions: "Map keywords.".into(),
            user_message: "Process the attachment.".into(),
            tools: vec![ToolSpec::builtin(BuiltinTool::CodeInterpreter)],
            file_paths: files,
            conversation: Conversation::Stateless,
            sampling: None,
            output_dir: None,
            metadata: Map::new(),
        }
    }

    fn citation_output() -> Value {
        json!([{
            "type": "message",
            "content": [{
                "type": "output_text",
                "text": "Done.",
                "annotations": [
                    {"type": "container_file_citation", "file_id": "cfile_1", "filename": "../../etc/result.xlsx", "container_id": "cntr_1"},
                    {"type": "container_file_citation", "file_id": "cfile_2", "filename": "orphan.xlsx"},
                    {"type": "container_file_citation", "file_id": "file-9"}
                ]
            }]
        }])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Workflow Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn submit_happy_path_downloads_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let chunk = dir.path().join("keywords_chunk_001_rows_1-2.xlsx");
        let mut table = Table::new("Keywords", vec!["KeyWord".into()]);
        table.push_row(vec!["red shoes".into()]);
        write_table(&table, &chunk).unwrap();
        let mapping = dir.path().join("mapping.txt");
        std::fs::write(&mapping, "Shoes: Red").unwrap();

        let api = FakeApi {
            output: citation_output(),
            ..Default::default()
        };
        let gateway = Gateway::new(api, fast_settings());

        let mut request = base_request(vec![chunk, mapping]);
        request.output_dir = Some(dir.path().join("out"));
        let outcome = gateway.submit(request).await.unwrap();

        assert_eq!(outcome.response_id, "resp_fake_0001");
        assert_eq!(outcome.text, "Done.");
        assert_eq!(outcome.status, ResponseStatus::Completed);
        assert!(outcome.conversation_id.is_none());

        // Container file without container id is skipped; traversal is stripped
        let names: Vec<PathBuf> = outcome.files.iter().map(|f| f.local_path.clone()).collect();
        assert_eq!(
            names,
            vec![
                dir.path().join("out").join("result.xlsx"),
                dir.path().join("out").join("output_file-9.bin"),
            ]
        );

        let requests = gateway.api.requests.lock().unwrap();
        let sent = &requests[0];
        // Built-in tool: only the message item goes out, files ride in the container
        assert_eq!(sent.input.len(), 1);
        match &sent.input[0] {
            InputItem::Message { content, .. } => {
                let crate::assistant::wire::InputContent::InputText { text } = &content[0];
                assert!(text.starts_with("Process the attachment."));
                assert!(text.contains("Excel Content from keywords_chunk_001_rows_1-2.xlsx:"));
                assert!(text.contains("red shoes"));
                assert!(!text.contains("Excel Content from mapping.txt"));
            }
            other => panic!("unexpected input {:?}", other),
        }
        assert_eq!(
            sent.tools[0],
            json!({"type": "code_interpreter", "container": {"type": "auto", "file_ids": ["file-0", "file-1"]}})
        );

        assert_eq!(*gateway.api.deleted.lock().unwrap(), vec!["file-0", "file-1"]);
    }

    #[tokio::test]
    async fn polling_waits_through_pending_and_errors() {
        let api = FakeApi {
            created_status: Some("queued"),
            polls: Mutex::new(VecDeque::from(vec![
                Ok("in_progress".to_string()),
                Err(AppError::ConnectionFailed("blip".into())),
                Ok("completed".to_string()),
            ])),
            ..Default::default()
        };
        let gateway = Gateway::new(api, fast_settings());

        let outcome = gateway.submit(base_request(vec![])).await.unwrap();
        assert_eq!(outcome.status, ResponseStatus::Completed);
    }

    #[tokio::test]
    async fn polling_times_out_and_still_cleans_up() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();

        let api = FakeApi {
            created_status: Some("in_progress"),
            polls: Mutex::new(VecDeque::from(vec![Ok("in_progress".to_string())])),
            ..Default::default()
        };
        let gateway = Gateway::new(api, fast_settings());

        let err = gateway.submit(base_request(vec![file])).await.unwrap_err();

        assert!(matches!(err, AppError::Timeout { .. }));
        assert_eq!(*gateway.api.deleted.lock().unwrap(), vec!["file-0"]);
    }

    #[tokio::test]
    async fn failed_status_becomes_service_error() {
        let api = FakeApi {
            created_status: Some("failed"),
            ..Default::default()
        };
        let gateway = Gateway::new(api, fast_settings());

        let err = gateway.submit(base_request(vec![])).await.unwrap_err();
        assert!(matches!(err, AppError::ServiceError(_)));
    }

    #[tokio::test]
    async fn upload_failure_aborts_and_deletes_partial_uploads() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let api = FakeApi {
            fail_upload_at: Some(1),
            ..Default::default()
        };
        let gateway = Gateway::new(api, fast_settings());

        let err = gateway.submit(base_request(vec![a, b])).await.unwrap_err();

        assert!(matches!(err, AppError::ConnectionFailed(_)));
        assert!(gateway.api.requests.lock().unwrap().is_empty());
        assert_eq!(*gateway.api.deleted.lock().unwrap(), vec!["file-0"]);
    }

    #[tokio::test]
    async fn submit_failure_still_cleans_up() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "a").unwrap();

        let api = FakeApi {
            fail_create: true,
            ..Default::default()
        };
        let gateway = Gateway::new(api, fast_settings());

        assert!(gateway.submit(base_request(vec![a])).await.is_err());
        assert_eq!(*gateway.api.deleted.lock().unwrap(), vec!["file-0"]);
    }

    #[tokio::test]
    async fn download_failures_are_omitted_not_fatal() {
        let api = FakeApi {
            output: citation_output(),
            fail_download: true,
            ..Default::default()
        };
        let gateway = Gateway::new(api, fast_settings());

        let outcome = gateway.submit(base_request(vec![])).await.unwrap();
        assert!(outcome.files.is_empty());
        assert_eq!(outcome.text, "Done.");
    }

    #[tokio::test]
    async fn new_conversation_is_created_and_continuing_is_reused() {
        let gateway = Gateway::new(FakeApi::default(), fast_settings());

        let mut request = base_request(vec![]);
        request.conversation = Conversation::New;
        let outcome = gateway.submit(request).await.unwrap();
        assert_eq!(outcome.conversation_id.as_deref(), Some("conv_0"));

        let mut request = base_request(vec![]);
        request.conversation = Conversation::Continuing("conv_existing".into());
        let outcome = gateway.submit(request).await.unwrap();
        assert_eq!(outcome.conversation_id.as_deref(), Some("conv_existing"));
        assert_eq!(gateway.api.conversations.load(Ordering::SeqCst), 1);

        let requests = gateway.api.requests.lock().unwrap();
        assert_eq!(requests[1].conversation.as_deref(), Some("conv_existing"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request Building Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn conversation_from_flag() {
        assert_eq!(Conversation::from_flag(false, None), Conversation::Stateless);
        assert_eq!(Conversation::from_flag(true, None), Conversation::New);
        assert_eq!(
            Conversation::from_flag(true, Some("c1".into())),
            Conversation::Continuing("c1".into())
        );
    }

    #[test]
    fn file_items_kept_without_builtin_tools() {
        let mut request = base_request(vec![]);
        request.tools = vec![ToolSpec::Function(json!({"type": "function", "name": "f"}))];
        request.sampling = Some(Sampling {
            temperature: Some(0.1),
            top_p: None,
        });

        let payload = build_response_request(
            &request,
            "hello".into(),
            &["file-a".to_string(), "file-b".to_string()],
            None,
        );

        assert_eq!(payload.input.len(), 3);
        assert_eq!(
            payload.input[1],
            InputItem::InputFile {
                file_id: "file-a".into()
            }
        );
        assert_eq!(payload.tools, vec![json!({"type": "function", "name": "f"})]);
        assert_eq!(payload.temperature, Some(0.1));
        assert_eq!(payload.top_p, None);
    }

    #[test]
    fn file_search_is_dropped_and_others_pass_through() {
        let tools = vec![
            ToolSpec::builtin(BuiltinTool::FileSearch),
            ToolSpec::builtin(BuiltinTool::WebSearch),
            ToolSpec::builtin(BuiltinTool::ImageGeneration),
        ];
        let configured = configure_tools(&tools, &[]);
        assert_eq!(
            configured,
            vec![json!({"type": "web_search"}), json!({"type": "image_generation"})]
        );
    }

    #[test]
    fn empty_message_sends_no_message_item() {
        let mut request = base_request(vec![]);
        request.tools.clear();
        let payload = build_response_request(&request, String::new(), &["file-a".to_string()], None);
        assert_eq!(payload.input.len(), 1);
        assert!(!payload.input[0].is_message());
    }

    #[test]
    fn safe_file_name_strips_directories() {
        let file = |name: Option<&str>| GeneratedFile {
            file_id: "cfile_x".into(),
            filename: name.map(str::to_string),
            container_id: Some("c".into()),
        };
        assert_eq!(safe_file_name(&file(Some("out.xlsx"))), "out.xlsx");
        assert_eq!(safe_file_name(&file(Some("/mnt/data/out.xlsx"))), "out.xlsx");
        assert_eq!(safe_file_name(&file(Some("..\\..\\evil.xlsx"))), "evil.xlsx");
        assert_eq!(safe_file_name(&file(Some("../"))), "output_cfile_x.bin");
        assert_eq!(safe_file_name(&file(Some(".."))), "output_cfile_x.bin");
        assert_eq!(safe_file_name(&file(None)), "output_cfile_x.bin");

        let hostile = GeneratedFile {
            file_id: "x/../../../tmp/evil".into(),
            filename: None,
            container_id: Some("c".into()),
        };
        let name = safe_file_name(&hostile);
        assert_eq!(name, "output_x_.._.._.._tmp_evil.bin");
        let out = Path::new("/data/out").join(&name);
        assert_eq!(out.parent(), Some(Path::new("/data/out")));
        assert_eq!(out.file_name().unwrap(), name.as_str());

        let backslashed = GeneratedFile {
            file_id: "..\\..\\evil".into(),
            filename: Some("..".into()),
            container_id: None,
        };
        assert!(!safe_file_name(&backslashed).contains(['/', '\\']));
    }

    #[test]
    fn from_profile_copies_fields_and_metadata() {
        let profile = AssistantProfile::from_json(
            r#"{"assistant_id": "asst_1", "name": "A1", "model": "gpt-4.1", "instructions": "x", "builtin_tools": ["code_interpreter"]}"#,
        )
        .unwrap();
        let request = SubmitRequest::from_profile(&profile, "msg");
        assert_eq!(request.model, "gpt-4.1");
        assert_eq!(request.instructions, "x");
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.metadata["assistant_id"], json!("asst_1"));
        assert_eq!(request.metadata["assistant_name"], json!("A1"));
    }
}
