//! Wire types for the assistant service.
//!
//! Requests are plain serde structs. Responses go through a small tagged
//! decoder: unknown output items, content blocks and annotations decode to an
//! `Other` variant instead of failing, and anything structurally wrong
//! surfaces as `AppError::Decode` at the client boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /responses`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateResponseRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
}

/// One entry of the request `input` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: String,
        content: Vec<InputContent>,
    },
    InputFile {
        file_id: String,
    },
}

impl InputItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        InputItem::Message {
            role: "user".to_string(),
            content: vec![InputContent::InputText { text: text.into() }],
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, InputItem::Message { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    InputText { text: String },
}

/// Body of `POST /conversations`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationRequest {
    pub metadata: serde_json::Map<String, Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Object with just an `id`, as returned by file upload and conversation creation.
#[derive(Debug, Clone, Deserialize)]
pub struct IdObject {
    pub id: String,
}

/// Lifecycle status of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Queued,
    InProgress,
    #[default]
    Completed,
    Failed,
    Cancelled,
    Incomplete,
    #[serde(other)]
    Unknown,
}

impl ResponseStatus {
    /// True while the service is still working on the response.
    pub fn is_pending(self) -> bool {
        matches!(self, ResponseStatus::Queued | ResponseStatus::InProgress)
    }

    /// True for terminal states that carry no usable output.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ResponseStatus::Failed | ResponseStatus::Cancelled | ResponseStatus::Incomplete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResponseStatus::Queued => "queued",
            ResponseStatus::InProgress => "in_progress",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Failed => "failed",
            ResponseStatus::Cancelled => "cancelled",
            ResponseStatus::Incomplete => "incomplete",
            ResponseStatus::Unknown => "unknown",
        }
    }
}

/// A response object as returned by create and retrieve.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub output: Vec<OutputEntry>,
    #[serde(default)]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Output entries are usually items, but nested arrays of items also occur.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputEntry {
    Nested(Vec<OutputItem>),
    Item(OutputItem),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentBlock>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    OutputText {
        #[serde(default)]
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    Text {
        #[serde(default)]
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    ContainerFileCitation {
        file_id: String,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        container_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// A file the service generated and cited in its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub file_id: String,
    pub filename: Option<String>,
    pub container_id: Option<String>,
}

/// Prefix of file ids that live inside a sandbox container.
pub const CONTAINER_FILE_PREFIX: &str = "cfile_";

impl GeneratedFile {
    pub fn is_container_file(&self) -> bool {
        self.file_id.starts_with(CONTAINER_FILE_PREFIX)
    }
}

impl ResponseObject {
    fn messages(&self) -> impl Iterator<Item = &Vec<ContentBlock>> {
        self.output
            .iter()
            .flat_map(|entry| match entry {
                OutputEntry::Item(item) => std::slice::from_ref(item).iter(),
                OutputEntry::Nested(items) => items.iter(),
            })
            .filter_map(|item| match item {
                OutputItem::Message { content } => Some(content),
                OutputItem::Other => None,
            })
    }

    /// Text of every message content block, joined with newlines.
    pub fn output_text(&self) -> String {
        let parts: Vec<&str> = self
            .messages()
            .flatten()
            .filter_map(|block| match block {
                ContentBlock::OutputText { text, .. } | ContentBlock::Text { text, .. } => {
                    Some(text.as_str())
                }
                ContentBlock::Other => None,
            })
            .collect();
        parts.join("\n")
    }

    /// Container file citations across all message content.
    pub fn generated_files(&self) -> Vec<GeneratedFile> {
        self.messages()
            .flatten()
            .flat_map(|block| match block {
                ContentBlock::OutputText { annotations, .. }
                | ContentBlock::Text { annotations, .. } => annotations.as_slice(),
                ContentBlock::Other => &[],
            })
            .filter_map(|annotation| match annotation {
                Annotation::ContainerFileCitation {
                    file_id,
                    filename,
                    container_id,
                } => Some(GeneratedFile {
                    file_id: file_id.clone(),
                    filename: filename.clone(),
                    container_id: container_id.clone(),
                }),
                Annotation::Other => None,
            })
            .collect()
    }

    /// Human-readable reason for a failed response.
    pub fn failure_message(&self) -> String {
        match &self.error {
            Some(ResponseError {
                code,
                message: Some(message),
            }) => match code {
                Some(code) => format!("[{}] {}", code, message),
                None => message.clone(),
            },
            _ => format!("response ended with status {}", self.status.as_str()),
        }
    }
}

/// Decodes a response body.
pub fn decode_response(body: &str) -> Result<ResponseObject, AppError> {
    serde_json::from_str(body).map_err(|e| AppError::Decode(format!("response object: {}", e)))
}

/// Service error envelope: `{"error": {"message", "type", "code"}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}
