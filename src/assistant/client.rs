//! HTTP client for the assistant service.
//!
//! Covers file upload and deletion, conversation creation, response
//! creation and retrieval, and generated-file download.
//!
//! # Security
//!
//! - The API key is held as a `SecretString` and only exposed to set the
//!   `Authorization` header
//! - Request and response bodies are never logged
//! - Only HTTP method, path and status codes are logged, with ids redacted

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::info;
use url::Url;

use crate::assistant::wire::{
    decode_response, CreateConversationRequest, CreateResponseRequest, ErrorEnvelope,
    GeneratedFile, IdObject, ResponseObject,
};
use crate::config::ServiceConfig;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

const CLIENT_USER_AGENT: &str = concat!("keyword-pipeline/", env!("CARGO_PKG_VERSION"));

/// Upload purpose for files consumed by assistants.
const UPLOAD_PURPOSE: &str = "assistants";

/// Header required by the container files endpoints.
const CONTAINERS_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "containers=v1");

// ─────────────────────────────────────────────────────────────────────────────
// ServiceClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the assistant service REST API.
#[derive(Clone)]
pub struct ServiceClient {
    http: Client,
    base_url: Url,
    api_key: SecretString,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl ServiceClient {
    /// Creates a client from the service configuration.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` if the base URL does not parse
    /// - `AppError::Internal` if the HTTP client fails to initialize
    pub fn new(config: &ServiceConfig, api_key: SecretString) -> Result<Self, AppError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| AppError::Config(format!("service.base_url is invalid: {}", e)))?;
        let http = build_http_client(Duration::from_secs(config.request_timeout_secs), false)?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    /// Uploads a file for assistant use, streaming it from disk.
    ///
    /// Returns the remote file id.
    pub async fn upload_file(&self, file_path: &Path) -> Result<String, AppError> {
        let url = self.endpoint(&["files"])?;

        let file = File::open(file_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::FileNotFound(file_path.display().to_string()),
            _ => AppError::Io(format!("Failed to open {}: {}", file_path.display(), e)),
        })?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| AppError::Io(format!("Failed to get file metadata: {}", e)))?
            .len();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, file_size).file_name(file_name);
        let form = Form::new().text("purpose", UPLOAD_PURPOSE).part("file", part);

        info!("[ASSISTANT] POST /files ({} bytes)", file_size);

        let response = self
            .http
            .post(url)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("File upload failed: {}", e)))?;

        let status = response.status();
        info!("[ASSISTANT] POST /files -> {}", status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        let created: IdObject = response
            .json()
            .await
            .map_err(|e| AppError::Decode(format!("file upload response: {}", e)))?;
        Ok(created.id)
    }

    /// Creates a server-side conversation and returns its id.
    pub async fn create_conversation(&self, metadata: Map<String, Value>) -> Result<String, AppError> {
        let url = self.endpoint(&["conversations"])?;

        let response = self
            .http
            .post(url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&CreateConversationRequest { metadata })
            .send()
            .await
            .map_err(|e| {
                AppError::ConnectionFailed(format!("Conversation creation failed: {}", e))
            })?;

        let status = response.status();
        info!("[ASSISTANT] POST /conversations -> {}", status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        let created: IdObject = response
            .json()
            .await
            .map_err(|e| AppError::Decode(format!("conversation response: {}", e)))?;
        info!("[ASSISTANT] Created conversation {}", redact_id(&created.id));
        Ok(created.id)
    }

    /// Submits a response request.
    pub async fn create_response(
        &self,
        request: &CreateResponseRequest,
    ) -> Result<ResponseObject, AppError> {
        let url = self.endpoint(&["responses"])?;

        info!(
            "[ASSISTANT] POST /responses (model {}, {} input items, {} tools)",
            request.model,
            request.input.len(),
            request.tools.len()
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Response creation failed: {}", e)))?;

        let status = response.status();
        info!("[ASSISTANT] POST /responses -> {}", status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        read_response_object(response).await
    }

    /// Fetches the current state of a response.
    pub async fn retrieve_response(&self, response_id: &str) -> Result<ResponseObject, AppError> {
        let url = self.endpoint(&["responses", response_id])?;

        let response = self
            .http
            .get(url)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Response retrieval failed: {}", e)))?;

        let status = response.status();
        info!(
            "[ASSISTANT] GET /responses/{} -> {}",
            redact_id(response_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        read_response_object(response).await
    }

    /// Downloads a generated file to `output_path` using an atomic write.
    ///
    /// Container files are fetched from their container; everything else
    /// from the plain file content endpoint. Returns the bytes written.
    pub async fn download_file(
        &self,
        file: &GeneratedFile,
        output_path: &Path,
    ) -> Result<u64, AppError> {
        let request = if file.is_container_file() {
            let container_id = file.container_id.as_deref().ok_or_else(|| {
                AppError::ServiceError(format!(
                    "container file {} has no container id",
                    redact_id(&file.file_id)
                ))
            })?;
            let url = self.endpoint(&["containers", container_id, "files", &file.file_id, "content"])?;
            info!(
                "[ASSISTANT] GET /containers/{}/files/{}/content (downloading)",
                redact_id(container_id),
                redact_id(&file.file_id)
            );
            self.http
                .get(url)
                .header(CONTAINERS_BETA_HEADER.0, CONTAINERS_BETA_HEADER.1)
        } else {
            let url = self.endpoint(&["files", &file.file_id, "content"])?;
            info!(
                "[ASSISTANT] GET /files/{}/content (downloading)",
                redact_id(&file.file_id)
            );
            self.http.get(url)
        };

        let response = request
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("File download failed: {}", e)))?;

        let status = response.status();
        info!(
            "[ASSISTANT] download {} -> {}",
            redact_id(&file.file_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        // Ensure parent directory exists
        let parent_dir = output_path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent_dir)
            .await
            .map_err(|e| AppError::Io(format!("Failed to create output directory: {}", e)))?;

        // Temp file in the same directory for atomic rename
        let temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| AppError::Io(format!("Failed to create temp file: {}", e)))?;
        let std_file = temp_file
            .reopen()
            .map_err(|e| AppError::Io(format!("Failed to reopen temp file: {}", e)))?;
        let mut async_file = File::from_std(std_file);

        let mut stream = response.bytes_stream();
        let mut total_bytes = 0u64;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                AppError::ConnectionFailed(format!("Error reading response stream: {}", e))
            })?;
            async_file
                .write_all(&chunk)
                .await
                .map_err(|e| AppError::Io(format!("Error writing to file: {}", e)))?;
            total_bytes += chunk.len() as u64;
        }

        async_file
            .flush()
            .await
            .map_err(|e| AppError::Io(format!("Failed to flush output file: {}", e)))?;
        async_file
            .sync_all()
            .await
            .map_err(|e| AppError::Io(format!("Failed to sync output file: {}", e)))?;

        temp_file
            .persist(output_path)
            .map_err(|e| AppError::Io(format!("Failed to persist temp file: {}", e)))?;

        info!(
            "[ASSISTANT] Downloaded {} ({} bytes)",
            redact_id(&file.file_id),
            total_bytes
        );
        Ok(total_bytes)
    }

    /// Deletes an uploaded file.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), AppError> {
        let url = self.endpoint(&["files", file_id])?;

        let response = self
            .http
            .delete(url)
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("File deletion failed: {}", e)))?;

        let status = response.status();
        info!(
            "[ASSISTANT] DELETE /files/{} -> {}",
            redact_id(file_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Builders
    // ─────────────────────────────────────────────────────────────────────────

    /// Appends path segments to the base URL, escaping each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Config("service.base_url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a client with the crate user agent and a request timeout.
///
/// `accept_invalid_certs` is for internal endpoints with self-signed certificates.
pub(crate) fn build_http_client(
    timeout: Duration,
    accept_invalid_certs: bool,
) -> Result<Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

async fn read_response_object(response: reqwest::Response) -> Result<ResponseObject, AppError> {
    let body = response
        .text()
        .await
        .map_err(|e| AppError::ConnectionFailed(format!("Error reading response body: {}", e)))?;
    decode_response(&body)
}

/// Maps an error response to an `AppError`.
pub(crate) async fn parse_error_response(
    response: reqwest::Response,
    status: StatusCode,
) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let label = envelope.error.code.or(envelope.error.kind);
        return AppError::ServiceError(match label {
            Some(code) => format!(
                "HTTP {} [{}] {}",
                status.as_u16(),
                code,
                envelope.error.message
            ),
            None => format!("HTTP {} {}", status.as_u16(), envelope.error.message),
        });
    }

    AppError::ServiceError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

/// Redacts a remote id for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::wire::InputItem;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_client(mock_url: &str) -> ServiceClient {
        let config = ServiceConfig {
            base_url: mock_url.to_string(),
            ..ServiceConfig::default()
        };
        ServiceClient::new(&config, SecretString::from("test_key".to_string())).unwrap()
    }

    #[tokio::test]
    async fn upload_file_posts_multipart_with_purpose() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/files"))
            .and(header("Authorization", "Bearer test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file-abc123"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("chunk.xlsx");
        std::fs::write(&file_path, b"fake workbook").unwrap();

        let file_id = client.upload_file(&file_path).await.unwrap();
        assert_eq!(file_id, "file-abc123");

        let requests = mock_server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"purpose\""));
        assert!(body.contains("assistants"));
        assert!(body.contains("filename=\"chunk.xlsx\""));
        assert!(body.contains("fake workbook"));
    }

    #[tokio::test]
    async fn upload_missing_file_fails_before_network() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        let err = client
            .upload_file(Path::new("/nonexistent/chunk.xlsx"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::FileNotFound(_)));
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_response_sends_request_and_decodes() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/responses"))
            .and(body_partial_json(json!({"model": "gpt-4o", "instructions": "be brief"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "resp_1",
                "status": "queued",
                "output": []
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let request = CreateResponseRequest {
            model: "gpt-4o".into(),
            instructions: "be brief".into(),
            input: vec![InputItem::user_text("hi")],
            tools: vec![],
            temperature: None,
            top_p: None,
            conversation: None,
        };

        let response = client.create_response(&request).await.unwrap();
        assert_eq!(response.id, "resp_1");
        assert!(response.status.is_pending());
    }

    #[tokio::test]
    async fn retrieve_response_undecodable_body_is_decode_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/responses/resp_1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let err = client.retrieve_response("resp_1").await.unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[tokio::test]
    async fn create_conversation_returns_id() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/conversations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "conv_42"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let id = client.create_conversation(Map::new()).await.unwrap();
        assert_eq!(id, "conv_42");
    }

    #[tokio::test]
    async fn container_file_download_uses_container_path() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/containers/cntr_1/files/cfile_9/content"))
            .and(header("OpenAI-Beta", "containers=v1"))
            .and(header("Authorization", "Bearer test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"xlsx-bytes".to_vec()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out").join("result.xlsx");
        let file = GeneratedFile {
            file_id: "cfile_9".into(),
            filename: Some("result.xlsx".into()),
            container_id: Some("cntr_1".into()),
        };

        let bytes = client.download_file(&file, &output).await.unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&output).unwrap(), b"xlsx-bytes");
    }

    #[tokio::test]
    async fn regular_file_download_uses_file_content_path() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("GET"))
            .and(path("/files/file-7/content"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = TempDir::new().unwrap();
        let output = dir.path().join("f.bin");
        let file = GeneratedFile {
            file_id: "file-7".into(),
            filename: None,
            container_id: None,
        };

        client.download_file(&file, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"data");
    }

    #[tokio::test]
    async fn container_file_without_container_id_is_rejected() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        let dir = TempDir::new().unwrap();
        let file = GeneratedFile {
            file_id: "cfile_9".into(),
            filename: None,
            container_id: None,
        };

        let err = client
            .download_file(&file, &dir.path().join("x.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ServiceError(_)));
        assert!(!dir.path().join("x.bin").exists());
    }

    #[tokio::test]
    async fn delete_file_hits_file_path() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("DELETE"))
            .and(path("/files/file-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file-1", "deleted": true})))
            .expect(1)
            .mount(&mock_server)
            .await;

        client.delete_file("file-1").await.unwrap();
    }

    #[tokio::test]
    async fn rate_limited_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "60"))
            .mount(&mock_server)
            .await;

        match client.delete_file("file-1").await.unwrap_err() {
            AppError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, Some(60)),
            e => panic!("Expected RateLimited, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn service_error_envelope_is_parsed() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/conversations"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "Unknown parameter", "type": "invalid_request_error", "code": null}
            })))
            .mount(&mock_server)
            .await;

        match client.create_conversation(Map::new()).await.unwrap_err() {
            AppError::ServiceError(msg) => {
                assert!(msg.contains("400"));
                assert!(msg.contains("invalid_request_error"));
                assert!(msg.contains("Unknown parameter"));
            }
            e => panic!("Expected ServiceError, got: {:?}", e),
        }
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let client = create_test_client("https://api.example.com/v1");
        let url = client.endpoint(&["files", "file-1", "content"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/files/file-1/content");

        let client = create_test_client("https://api.example.com/v1/");
        let url = client.endpoint(&["responses"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/responses");
    }

    #[test]
    fn debug_redacts_key() {
        let client = create_test_client("https://api.example.com/v1");
        let debug = format!("{:?}", client);
        assert!(!debug.contains("test_key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_redact_id_long() {
        assert_eq!(redact_id("resp_0123456789abcdef"), "resp_012...");
    }

    #[test]
    fn test_redact_id_short() {
        assert_eq!(redact_id("file-1"), "file-1");
    }
}
