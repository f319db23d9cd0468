use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::backend::anthropic::AnthropicAdapter;
use crate::backend::gemini::GeminiAdapter;
use crate::backend::http::HttpClient;
use crate::backend::openai::OpenAiAdapter;
use crate::backend::{
    ApiFormat, Backend, BackendCapabilities, CustomBackend, Endpoint, GenerationOptions,
    IntelligenceClass,
};
use crate::config::Config;
use crate::error::CascadeError;

/// Prefix for user-configured OpenAI-compatible backends.
pub const CUSTOM_PREFIX: &str = "custom:";

/// Backends the catalog knows how to build without user input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Gemini,
    Anthropic,
    OpenAi,
    Groq,
    DeepSeek,
    Mistral,
    Kimi,
    Cohere,
    OpenRouter,
    HuggingFace,
}

impl BackendKind {
    pub const ALL: [BackendKind; 10] = [
        Self::Gemini,
        Self::Anthropic,
        Self::OpenAi,
        Self::Groq,
        Self::DeepSeek,
        Self::Mistral,
        Self::Kimi,
        Self::Cohere,
        Self::OpenRouter,
        Self::HuggingFace,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::DeepSeek => "deepseek",
            Self::Mistral => "mistral",
            Self::Kimi => "kimi",
            Self::Cohere => "cohere",
            Self::OpenRouter => "openrouter",
            Self::HuggingFace => "huggingface",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.id() == id)
    }

    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
            Self::Kimi => "KIMI_API_KEY",
            Self::Cohere => "COHERE_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::HuggingFace => "HUGGINGFACE_API_KEY",
        }
    }

    pub fn api_format(&self) -> ApiFormat {
        match self {
            Self::Gemini => ApiFormat::Gemini,
            Self::Anthropic => ApiFormat::Anthropic,
            _ => ApiFormat::OpenAi,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/models",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Self::DeepSeek => "https://api.deepseek.com/chat/completions",
            Self::Mistral => "https://api.mistral.ai/v1/chat/completions",
            Self::Kimi => "https://api.moonshot.ai/v1/chat/completions",
            Self::Cohere => "https://api.cohere.ai/compatibility/v1/chat/completions",
            Self::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            Self::HuggingFace => "https://router.huggingface.co/v1/chat/completions",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-flash",
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::OpenAi => "gpt-4o-mini",
            Self::Groq => "llama-3.1-8b-instant",
            Self::DeepSeek => "deepseek-chat",
            Self::Mistral => "mistral-small-latest",
            Self::Kimi => "moonshot-v1-128k",
            Self::Cohere => "command-r",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::HuggingFace => "meta-llama/Llama-3.1-8B-Instruct",
        }
    }

    pub fn reasoning_model(&self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("gemini-2.5-pro"),
            Self::Anthropic => Some("claude-sonnet-4-0"),
            Self::OpenAi => Some("gpt-4o"),
            Self::Groq => Some("llama-3.3-70b-versatile"),
            Self::DeepSeek => Some("deepseek-reasoner"),
            Self::Mistral => Some("mistral-large-latest"),
            Self::Cohere => Some("command-r-plus"),
            Self::Kimi | Self::OpenRouter | Self::HuggingFace => None,
        }
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        let full = |max_context_units| BackendCapabilities {
            supports_multimodal_input: true,
            supports_tool_calls: true,
            supports_structured_output: true,
            max_context_units,
        };
        let text_with_tools = |max_context_units| BackendCapabilities {
            supports_multimodal_input: false,
            supports_tool_calls: true,
            supports_structured_output: true,
            max_context_units,
        };
        match self {
            Self::Gemini => full(1_000_000),
            Self::Anthropic => BackendCapabilities {
                supports_structured_output: false,
                ..full(200_000)
            },
            Self::OpenAi | Self::OpenRouter => full(128_000),
            Self::Groq => text_with_tools(8_192),
            Self::DeepSeek => text_with_tools(64_000),
            Self::Mistral => text_with_tools(32_000),
            Self::Kimi => text_with_tools(128_000),
            Self::Cohere => BackendCapabilities {
                supports_structured_output: false,
                ..text_with_tools(128_000)
            },
            Self::HuggingFace => BackendCapabilities::text_only(8_192),
        }
    }
}

/// Well-known local inference servers. Keyless, OpenAI-compatible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalAlias {
    Ollama,
    LmStudio,
    Gpt4All,
}

impl LocalAlias {
    pub fn parse(alias: &str) -> Option<Self> {
        match alias {
            "ollama" => Some(Self::Ollama),
            "lmstudio" | "lm_studio" => Some(Self::LmStudio),
            "gpt4all" => Some(Self::Gpt4All),
            _ => None,
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434/v1/chat/completions",
            Self::LmStudio => "http://localhost:1234/v1/chat/completions",
            Self::Gpt4All => "http://localhost:4891/v1/chat/completions",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Ollama => "llama3.2",
            Self::LmStudio | Self::Gpt4All => "local-model",
        }
    }
}

/// A builtin backend's credential and overrides, as loaded from config.
#[derive(Clone, PartialEq)]
pub struct BuiltinBackend {
    pub kind: BackendKind,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for BuiltinBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinBackend")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Typed description of any backend id the catalog can resolve.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendDescriptor {
    Builtin(BuiltinBackend),
    Custom(CustomBackend),
    Local {
        alias: LocalAlias,
        model: Option<String>,
    },
}

impl BackendDescriptor {
    /// Build the adapter this descriptor names.
    pub fn build(&self, http: &HttpClient) -> Arc<dyn Backend> {
        match self {
            Self::Builtin(b) => {
                let endpoint = Endpoint {
                    id: b.kind.id().to_string(),
                    base_url: b
                        .base_url
                        .clone()
                        .unwrap_or_else(|| b.kind.default_base_url().to_string()),
                    api_key: b.api_key.clone(),
                    model: b
                        .model
                        .clone()
                        .unwrap_or_else(|| b.kind.default_model().to_string()),
                    // An explicit model override pins both lanes.
                    reasoning_model: match b.model {
                        Some(_) => None,
                        None => b.kind.reasoning_model().map(str::to_string),
                    },
                    capabilities: b.kind.capabilities(),
                    requires_key: true,
                };
                match b.kind.api_format() {
                    ApiFormat::Gemini => Arc::new(GeminiAdapter::new(endpoint, http.clone())),
                    ApiFormat::Anthropic => {
                        Arc::new(AnthropicAdapter::new(endpoint, http.clone()))
                    }
                    ApiFormat::OpenAi => Arc::new(OpenAiAdapter::new(endpoint, http.clone())),
                }
            }
            Self::Custom(c) => {
                let endpoint = Endpoint {
                    id: format!("{CUSTOM_PREFIX}{}", c.id),
                    base_url: c.base_url.clone(),
                    api_key: c.api_key.clone(),
                    model: c.models.first().cloned().unwrap_or_default(),
                    reasoning_model: c.models.get(1).cloned(),
                    capabilities: BackendCapabilities {
                        supports_multimodal_input: c.multimodal,
                        supports_tool_calls: true,
                        supports_structured_output: true,
                        max_context_units: 32_000,
                    },
                    requires_key: false,
                };
                Arc::new(OpenAiAdapter::new(endpoint, http.clone()))
            }
            Self::Local { alias, model } => {
                let id = match model {
                    Some(m) => format!("{}:{m}", local_id(*alias)),
                    None => local_id(*alias).to_string(),
                };
                let endpoint = Endpoint {
                    id,
                    base_url: alias.base_url().to_string(),
                    api_key: None,
                    model: model
                        .clone()
                        .unwrap_or_else(|| alias.default_model().to_string()),
                    reasoning_model: None,
                    capabilities: BackendCapabilities::text_only(8_192),
                    requires_key: false,
                };
                Arc::new(OpenAiAdapter::new(endpoint, http.clone()))
            }
        }
    }
}

fn local_id(alias: LocalAlias) -> &'static str {
    match alias {
        LocalAlias::Ollama => "ollama",
        LocalAlias::LmStudio => "lmstudio",
        LocalAlias::Gpt4All => "gpt4all",
    }
}

/// Reject a custom backend that could never work.
pub fn validate_custom(custom: &CustomBackend) -> Result<(), CascadeError> {
    if custom.id.trim().is_empty() {
        return Err(CascadeError::Configuration(
            "custom backend id must not be empty".to_string(),
        ));
    }
    if custom.id.contains(':') {
        return Err(CascadeError::Configuration(format!(
            "custom backend id '{}' must not contain ':'",
            custom.id
        )));
    }
    if !(custom.base_url.starts_with("http://") || custom.base_url.starts_with("https://")) {
        return Err(CascadeError::Configuration(format!(
            "custom backend '{}' base_url must be http(s)",
            custom.id
        )));
    }
    if custom.models.iter().all(|m| m.trim().is_empty()) {
        return Err(CascadeError::Configuration(format!(
            "custom backend '{}' declares no models",
            custom.id
        )));
    }
    Ok(())
}

/// Parse a local alias id: `ollama`, `lmstudio`, or `ollama:<model>`.
fn parse_local(id: &str) -> Option<(LocalAlias, Option<String>)> {
    let (alias, model) = match id.split_once(':') {
        Some((a, m)) if !m.is_empty() => (a, Some(m.to_string())),
        Some(_) => return None,
        None => (id, None),
    };
    LocalAlias::parse(alias).map(|a| (a, model))
}

/// Cascade order derived from the intelligence class. The primary leads;
/// enabled custom backends trail.
pub fn derive_order(
    primary: &str,
    class: IntelligenceClass,
    customs: &[CustomBackend],
) -> Vec<String> {
    let mut ids: Vec<String> = vec![primary.to_string()];
    let body: &[&str] = match class {
        IntelligenceClass::Reasoning => &["openai", "kimi", "cohere", "groq"],
        IntelligenceClass::Fast => &[
            "anthropic",
            "deepseek",
            "openai",
            "groq",
            "kimi",
            "cohere",
            "mistral",
            "openrouter",
        ],
    };
    for id in body.iter().chain(std::iter::once(&"huggingface")) {
        if !ids.iter().any(|existing| existing.as_str() == *id) {
            ids.push(id.to_string());
        }
    }
    for c in customs.iter().filter(|c| c.enabled) {
        let id = format!("{CUSTOM_PREFIX}{}", c.id);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Resolves backend ids to adapters. Builtins are registered up front;
/// custom and local ids are built on first use and cached.
pub struct Catalog {
    http: HttpClient,
    adapters: Mutex<HashMap<String, Arc<dyn Backend>>>,
    customs: Vec<CustomBackend>,
    preference: Option<Vec<String>>,
    primary: String,
}

impl Catalog {
    /// An empty catalog. Use `register` to add adapters.
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            adapters: Mutex::new(HashMap::new()),
            customs: Vec::new(),
            preference: None,
            primary: BackendKind::Gemini.id().to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, CascadeError> {
        config.validate()?;
        let http = HttpClient::new()?;
        let catalog = Self {
            preference: config.preference.clone(),
            primary: config.primary.clone(),
            customs: config.custom_backends.clone(),
            ..Self::new(http)
        };

        for builtin in &config.builtins {
            catalog.register(BackendDescriptor::Builtin(builtin.clone()).build(&catalog.http));
        }
        tracing::info!(
            builtins = config.builtins.len(),
            customs = config.custom_backends.len(),
            primary = %catalog.primary,
            "backend catalog ready"
        );
        Ok(catalog)
    }

    /// Fix the cascade order instead of deriving it per request.
    pub fn with_preference(mut self, order: Vec<String>) -> Self {
        self.preference = Some(order);
        self
    }

    /// Configured custom backends, appended to derived cascades when enabled.
    pub fn with_customs(mut self, customs: Vec<CustomBackend>) -> Self {
        self.customs = customs;
        self
    }

    /// The designated primary, eligible for sticky retries.
    pub fn with_primary(mut self, primary: impl Into<String>) -> Self {
        self.primary = primary.into();
        self
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn register(&self, backend: Arc<dyn Backend>) {
        if let Ok(mut adapters) = self.adapters.lock() {
            adapters.insert(backend.id().to_string(), backend);
        }
    }

    /// Adapter for a custom backend carried by a single request. Built
    /// fresh on every call and never stored, so configured customs and
    /// other requests' cascades are unaffected. `None` when disabled.
    pub fn request_scoped(
        &self,
        custom: &CustomBackend,
    ) -> Result<Option<Arc<dyn Backend>>, CascadeError> {
        if !custom.enabled {
            return Ok(None);
        }
        validate_custom(custom)?;
        Ok(Some(BackendDescriptor::Custom(custom.clone()).build(&self.http)))
    }

    /// Resolve an id to its adapter, constructing dynamic ones on demand.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Backend>, CascadeError> {
        let mut adapters = self
            .adapters
            .lock()
            .map_err(|_| CascadeError::Configuration("catalog lock poisoned".to_string()))?;
        if let Some(adapter) = adapters.get(id) {
            return Ok(adapter.clone());
        }

        let descriptor = self.descriptor_for(id)?;
        let adapter = descriptor.build(&self.http);
        tracing::debug!(backend = %id, "constructed dynamic backend adapter");
        adapters.insert(id.to_string(), adapter.clone());
        Ok(adapter)
    }

    fn descriptor_for(&self, id: &str) -> Result<BackendDescriptor, CascadeError> {
        if let Some(custom_id) = id.strip_prefix(CUSTOM_PREFIX) {
            return self
                .customs
                .iter()
                .find(|c| c.id == custom_id)
                .cloned()
                .map(BackendDescriptor::Custom)
                .ok_or_else(|| CascadeError::UnknownBackend { id: id.to_string() });
        }
        if let Some((alias, model)) = parse_local(id) {
            return Ok(BackendDescriptor::Local { alias, model });
        }
        if let Some(kind) = BackendKind::from_id(id) {
            // Builtin without config: registered keyless, reports unavailable.
            return Ok(BackendDescriptor::Builtin(BuiltinBackend {
                kind,
                api_key: None,
                model: None,
                base_url: None,
            }));
        }
        Err(CascadeError::UnknownBackend { id: id.to_string() })
    }

    /// Candidate ids for a request, in cascade order, before availability
    /// and circuit-breaker filtering.
    /// A request-scoped custom backend is not included; see `request_scoped`.
    pub fn candidate_ids(&self, options: &GenerationOptions) -> Vec<String> {
        match &self.preference {
            Some(order) => order.clone(),
            None => derive_order(&self.primary, options.intelligence_class(), &self.customs),
        }
    }

    /// Every resolved adapter, sorted by id.
    pub fn list(&self) -> Vec<Arc<dyn Backend>> {
        let mut all: Vec<Arc<dyn Backend>> = self
            .adapters
            .lock()
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }
}

/// True if `id` names something the catalog could resolve given `customs`.
pub fn is_resolvable(id: &str, customs: &[CustomBackend]) -> bool {
    if let Some(custom_id) = id.strip_prefix(CUSTOM_PREFIX) {
        return customs.iter().any(|c| c.id == custom_id);
    }
    parse_local(id).is_some() || BackendKind::from_id(id).is_some()
}
