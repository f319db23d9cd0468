pub mod anthropic;
pub mod gemini;
pub mod http;
pub mod openai;
pub mod pricing;

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CascadeError;

/// Wire fields some providers send as an explicit `null` instead of omitting.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Admission lane hint. JSON-mode requests default to `Reasoning`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum IntelligenceClass {
    #[default]
    #[serde(alias = "text", alias = "chat")]
    Fast,
    #[serde(alias = "logic")]
    Reasoning,
}

impl IntelligenceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Reasoning => "reasoning",
        }
    }
}

/// Uniform conversation role. Each adapter maps `Model` onto its own
/// vocabulary ("assistant" for OpenAI/Anthropic, "model" for Gemini).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Inline media attachment, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaPart {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments object.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// A structured call the backend asked the caller to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_units: u64,
    pub completion_units: u64,
    pub total_units: u64,
}

/// Request-scoped custom backend, resolved by the catalog on demand.
#[derive(Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CustomBackend {
    pub id: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub multimodal: bool,
}

fn default_true() -> bool {
    true
}

impl std::fmt::Debug for CustomBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomBackend")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("models", &self.models)
            .field("enabled", &self.enabled)
            .field("multimodal", &self.multimodal)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f64>,
    /// Maximum output size in backend units (tokens).
    pub max_output_units: Option<u32>,
    pub json_mode: bool,
    pub tools: Vec<ToolDefinition>,
    /// Prior conversation turns, oldest first.
    pub history: Vec<ChatTurn>,
    pub media: Vec<MediaPart>,
    pub custom_backend: Option<CustomBackend>,
    pub intelligence: Option<IntelligenceClass>,
    /// Caller-supplied ceiling for a single remote call.
    pub timeout: Option<Duration>,
}

impl GenerationOptions {
    /// The lane this request runs in: explicit hint, else JSON mode means reasoning.
    pub fn intelligence_class(&self) -> IntelligenceClass {
        self.intelligence.unwrap_or(if self.json_mode {
            IntelligenceClass::Reasoning
        } else {
            IntelligenceClass::Fast
        })
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }

    /// Copy with the fields `caps` cannot carry removed. Media is dropped
    /// silently for text-only backends instead of failing the call.
    pub fn supported_by(&self, caps: &BackendCapabilities) -> GenerationOptions {
        let mut opts = self.clone();
        if !caps.supports_multimodal_input {
            opts.media.clear();
        }
        if !caps.supports_tool_calls {
            opts.tools.clear();
        }
        opts
    }
}

/// Immutable once dispatched; the orchestrator derives sanitized copies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_instructions: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, system_instructions: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_instructions: system_instructions.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub content: String,
    pub structured_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// Id of the backend that produced this result.
    pub backend: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    pub supports_multimodal_input: bool,
    pub supports_tool_calls: bool,
    pub supports_structured_output: bool,
    pub max_context_units: u32,
}

impl BackendCapabilities {
    pub const fn text_only(max_context_units: u32) -> Self {
        Self {
            supports_multimodal_input: false,
            supports_tool_calls: false,
            supports_structured_output: false,
            max_context_units,
        }
    }
}

/// Remote protocol spoken by an adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    /// OpenAI-compatible chat completions (most hosted and local backends).
    #[default]
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini generateContent.
    Gemini,
}

impl ApiFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

/// Uniform contract every remote backend satisfies toward the orchestrator.
#[async_trait]
pub trait Backend: Send + Sync {
    fn id(&self) -> &str;

    fn api_format(&self) -> ApiFormat;

    fn capabilities(&self) -> BackendCapabilities;

    /// Cheap synchronous check (credential present). Never does I/O: it runs
    /// on every candidate-filtering pass.
    fn is_available(&self) -> bool;

    async fn generate(
        &self,
        prompt: &str,
        system_instructions: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, CascadeError>;

    fn cost_estimate(&self, model: &str, usage: &Usage) -> f64 {
        pricing::cost_estimate(model, usage)
    }
}

/// Connection details shared by all HTTP adapters.
#[derive(Clone)]
pub struct Endpoint {
    pub id: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model used for the fast lane.
    pub model: String,
    /// Model used for the reasoning lane, if different.
    pub reasoning_model: Option<String>,
    pub capabilities: BackendCapabilities,
    /// Local inference servers run without credentials.
    pub requires_key: bool,
}

impl Endpoint {
    pub fn has_credentials(&self) -> bool {
        !self.requires_key || self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    pub fn model_for(&self, class: IntelligenceClass) -> &str {
        match class {
            IntelligenceClass::Reasoning => self.reasoning_model.as_deref().unwrap_or(&self.model),
            IntelligenceClass::Fast => &self.model,
        }
    }

    pub(crate) fn require_key(&self) -> Result<&str, CascadeError> {
        match self.api_key.as_deref() {
            Some(k) if !k.trim().is_empty() => Ok(k),
            _ if !self.requires_key => Ok(""),
            _ => Err(CascadeError::AuthFailed {
                backend: self.id.clone(),
                message: "no API key configured".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("reasoning_model", &self.reasoning_model)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
