use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::backend::http::HttpClient;
use crate::backend::{
    ApiFormat, Backend, BackendCapabilities, Endpoint, GenerationOptions, GenerationResult, Role,
    ToolCall, Usage,
};
use crate::error::CascadeError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The Messages API requires max_tokens on every call.
const DEFAULT_MAX_TOKENS: u32 = 4096;

const JSON_MODE_SUFFIX: &str =
    "Respond with a single valid JSON document and nothing else. No prose, no code fences.";

pub struct AnthropicAdapter {
    endpoint: Endpoint,
    http: HttpClient,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicAdapter {
    pub fn new(endpoint: Endpoint, http: HttpClient) -> Self {
        Self { endpoint, http }
    }

    fn build_body(
        &self,
        model: &str,
        prompt: &str,
        system_instructions: &str,
        options: &GenerationOptions,
    ) -> Value {
        let mut messages: Vec<Value> = options
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Model => "assistant",
                };
                json!({"role": role, "content": turn.content})
            })
            .collect();

        let mut parts = vec![json!({"type": "text", "text": prompt})];
        for media in &options.media {
            parts.push(json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media.mime_type, "data": media.data}
            }));
        }
        messages.push(json!({"role": "user", "content": parts}));

        // No native JSON mode: steer through the system prompt.
        let system = if options.json_mode {
            if system_instructions.is_empty() {
                JSON_MODE_SUFFIX.to_string()
            } else {
                format!("{system_instructions}\n\n{JSON_MODE_SUFFIX}")
            }
        } else {
            system_instructions.to_string()
        };

        let mut body = json!({
            "model": model,
            "max_tokens": options.max_output_units.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t.clamp(0.0, 1.0));
        }
        if !options.tools.is_empty() {
            let tools: Vec<Value> = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

#[async_trait]
impl Backend for AnthropicAdapter {
    fn id(&self) -> &str {
        &self.endpoint.id
    }

    fn api_format(&self) -> ApiFormat {
        ApiFormat::Anthropic
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.endpoint.capabilities
    }

    fn is_available(&self) -> bool {
        self.endpoint.has_credentials()
    }

    async fn generate(
        &self,
        prompt: &str,
        system_instructions: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, CascadeError> {
        let api_key = self.endpoint.require_key()?;
        let options = options.supported_by(&self.endpoint.capabilities);
        let model = self.endpoint.model_for(options.intelligence_class()).to_string();
        let body = self.build_body(&model, prompt, system_instructions, &options);

        let headers = [
            ("x-api-key", api_key.to_string()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ];

        let response: MessagesResponse = self
            .http
            .post_json(
                &self.endpoint.id,
                &self.endpoint.base_url,
                &headers,
                &body,
                options.timeout,
            )
            .await?;

        let mut content = String::new();
        let mut structured_calls = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text } => content.push_str(&text),
                ContentBlock::ToolUse { name, input } => structured_calls.push(ToolCall {
                    name,
                    arguments: input,
                }),
                ContentBlock::Other => {}
            }
        }

        if content.is_empty() && structured_calls.is_empty() {
            return Err(CascadeError::Upstream {
                backend: self.endpoint.id.clone(),
                message: "empty content".to_string(),
                status: None,
            });
        }

        Ok(GenerationResult {
            content,
            structured_calls,
            usage: response.usage.map(|u| Usage {
                prompt_units: u.input_tokens,
                completion_units: u.output_tokens,
                total_units: u.input_tokens + u.output_tokens,
            }),
            backend: self.endpoint.id.clone(),
            model: response.model.unwrap_or(model),
        })
    }
}
