//! Assistant profiles: the model, instructions, tools and sampling used for
//! one batch pass, loaded from a small JSON document.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::AppError;

const DEFAULT_ASSISTANT_ID: &str = "unknown";
const DEFAULT_ASSISTANT_NAME: &str = "Unknown Assistant";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Built-in tools the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinTool {
    FileSearch,
    CodeInterpreter,
    WebSearch,
    ComputerUse,
    ImageGeneration,
}

impl BuiltinTool {
    pub fn as_str(self) -> &'static str {
        match self {
            BuiltinTool::FileSearch => "file_search",
            BuiltinTool::CodeInterpreter => "code_interpreter",
            BuiltinTool::WebSearch => "web_search",
            BuiltinTool::ComputerUse => "computer_use",
            BuiltinTool::ImageGeneration => "image_generation",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "file_search" => Some(BuiltinTool::FileSearch),
            "code_interpreter" => Some(BuiltinTool::CodeInterpreter),
            "web_search" => Some(BuiltinTool::WebSearch),
            "computer_use" => Some(BuiltinTool::ComputerUse),
            "image_generation" => Some(BuiltinTool::ImageGeneration),
            _ => None,
        }
    }
}

/// A tool requested by a profile.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSpec {
    /// Built-in tool plus any extra settings from its JSON object.
    Builtin {
        tool: BuiltinTool,
        settings: Map<String, Value>,
    },
    /// Function tool, forwarded as written.
    Function(Value),
}

impl ToolSpec {
    pub fn builtin(tool: BuiltinTool) -> Self {
        ToolSpec::Builtin {
            tool,
            settings: Map::new(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolSpec::Builtin { tool, .. } => tool.as_str(),
            ToolSpec::Function(_) => "function",
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, ToolSpec::Builtin { .. })
    }

    /// Parses a `builtin_tools` entry: a bare name or an object with `type`.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(name) => BuiltinTool::parse(name).map(Self::builtin),
            Value::Object(obj) => {
                let kind = obj.get("type").and_then(Value::as_str)?;
                if kind == "function" {
                    return Some(ToolSpec::Function(value.clone()));
                }
                let tool = BuiltinTool::parse(kind)?;
                let mut settings = obj.clone();
                settings.remove("type");
                Some(ToolSpec::Builtin { tool, settings })
            }
            _ => None,
        }
    }
}

/// Optional sampling overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

/// A loaded assistant profile.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantProfile {
    pub id: String,
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub tools: Vec<ToolSpec>,
    pub sampling: Option<Sampling>,
}

/// Raw document shape. Every field is optional and loosely typed.
#[derive(Debug, Default, Deserialize)]
struct ProfileDocument {
    #[serde(default)]
    assistant_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    instructions: Value,
    #[serde(default)]
    builtin_tools: Value,
    #[serde(default)]
    sampling: Option<Sampling>,
}

impl AssistantProfile {
    /// Reads and normalizes a profile JSON file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AppError::FileNotFound(path.display().to_string()),
            _ => AppError::Io(format!("Failed to read {}: {}", path.display(), e)),
        })?;
        let profile = Self::from_json(&contents).map_err(|e| match e {
            AppError::Config(msg) => AppError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;

        info!(
            "[ASSISTANT] Loaded profile '{}' (model {}, tools [{}])",
            profile.name,
            profile.model,
            profile.tool_names().join(", ")
        );
        Ok(profile)
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let doc: ProfileDocument = serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("invalid assistant profile: {}", e)))?;

        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let tools = match &doc.builtin_tools {
            Value::Array(entries) => entries
                .iter()
                .filter_map(|entry| {
                    let parsed = ToolSpec::from_value(entry);
                    if parsed.is_none() {
                        warn!("[ASSISTANT] Ignoring unsupported tool entry {}", entry);
                    }
                    parsed
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            id: non_blank(doc.assistant_id)
                .or_else(|| non_blank(doc.id))
                .unwrap_or_else(|| DEFAULT_ASSISTANT_ID.to_string()),
            name: non_blank(doc.name).unwrap_or_else(|| DEFAULT_ASSISTANT_NAME.to_string()),
            model: non_blank(doc.model).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            instructions: match doc.instructions {
                Value::String(s) => s,
                _ => String::new(),
            },
            tools,
            sampling: doc.sampling,
        })
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(ToolSpec::name).collect()
    }
}
