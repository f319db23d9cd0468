use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::backend::http::HttpClient;
use crate::backend::{
    ApiFormat, Backend, BackendCapabilities, Endpoint, GenerationOptions, GenerationResult, Role,
    ToolCall, Usage,
};
use crate::error::CascadeError;

/// OpenAI-compatible chat completions. Serves the hosted OpenAI-style
/// backends, configured custom backends and local inference servers.
pub struct OpenAiAdapter {
    endpoint: Endpoint,
    http: HttpClient,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
    #[serde(default, deserialize_with = "crate::backend::null_as_default")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default, deserialize_with = "crate::backend::null_as_default")]
    arguments: String,
}

#[derive(Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl OpenAiAdapter {
    pub fn new(endpoint: Endpoint, http: HttpClient) -> Self {
        Self { endpoint, http }
    }

    /// Build the chat-completions body.
    fn build_body(
        &self,
        model: &str,
        prompt: &str,
        system_instructions: &str,
        options: &GenerationOptions,
    ) -> Value {
        let mut messages = Vec::with_capacity(options.history.len() + 2);
        if !system_instructions.is_empty() {
            messages.push(json!({"role": "system", "content": system_instructions}));
        }
        for turn in &options.history {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "assistant",
            };
            messages.push(json!({"role": role, "content": turn.content}));
        }

        let user_content = if options.media.is_empty() {
            json!(prompt)
        } else {
            let mut parts = vec![json!({"type": "text", "text": prompt})];
            for media in &options.media {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:{};base64,{}", media.mime_type, media.data)}
                }));
            }
            Value::Array(parts)
        };
        messages.push(json!({"role": "user", "content": user_content}));

        let mut body = json!({
            "model": model,
            "messages": messages,
        });

        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(max) = options.max_output_units {
            body["max_tokens"] = json!(max);
        }
        if options.json_mode && self.endpoint.capabilities.supports_structured_output {
            body["response_format"] = json!({"type": "json_object"});
        }
        if !options.tools.is_empty() {
            let tools: Vec<Value> = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }
}

#[async_trait]
impl Backend for OpenAiAdapter {
    fn id(&self) -> &str {
        &self.endpoint.id
    }

    fn api_format(&self) -> ApiFormat {
        ApiFormat::OpenAi
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

        let mut headers = Vec::new();
        if !api_key.is_empty() {
            headers.push(("Authorization", format!("Bearer {api_key}")));
        }

        let completion: ChatCompletion = self
            .http
            .post_json(
                &self.endpoint.id,
                &self.endpoint.base_url,
                &headers,
                &body,
                options.timeout,
            )
            .await?;

        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| CascadeError::Upstream {
                backend: self.endpoint.id.clone(),
                message: "empty choices".to_string(),
                status: None,
            })?;

        let structured_calls: Vec<ToolCall> = message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                arguments: serde_json::from_str(&c.function.arguments)
                    .unwrap_or(Value::String(c.function.arguments)),
                name: c.function.name,
            })
            .collect();

        let content = message.content.unwrap_or_default();
        if content.is_empty() && structured_calls.is_empty() {
            return Err(CascadeError::Upstream {
                backend: self.endpoint.id.clone(),
                message: "null content and no tool calls".to_string(),
                status: None,
            });
        }

        Ok(GenerationResult {
            content,
            structured_calls,
            usage: completion.usage.map(|u| Usage {
                prompt_units: u.prompt_tokens,
                completion_units: u.completion_tokens,
                total_units: u.total_tokens,
            }),
            backend: self.endpoint.id.clone(),
            model: completion.model.unwrap_or(model),
        })
    }
}
