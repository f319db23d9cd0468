use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::backend::http::HttpClient;
use crate::backend::{
    ApiFormat, Backend, BackendCapabilities, Endpoint, GenerationOptions, GenerationResult, Role,
    ToolCall, Usage,
};
use crate::error::CascadeError;

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_OUTPUT: u32 = 2048;

/// Gemini `generateContent`. `base_url` is the models collection; the
/// request goes to `{base_url}/{model}:generateContent`.
pub struct GeminiAdapter {
    endpoint: Endpoint,
    http: HttpClient,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default, deserialize_with = "crate::backend::null_as_default")]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default, deserialize_with = "crate::backend::null_as_default")]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl GeminiAdapter {
    pub fn new(endpoint: Endpoint, http: HttpClient) -> Self {
        Self { endpoint, http }
    }

    pub fn url_for(&self, model: &str) -> String {
        format!(
            "{}/{model}:generateContent",
            self.endpoint.base_url.trim_end_matches('/')
        )
    }

    fn build_body(
        &self,
        prompt: &str,
        system_instructions: &str,
        options: &GenerationOptions,
    ) -> Value {
        let mut contents: Vec<Value> = options
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Model => "model",
                };
                json!({"role": role, "parts": [{"text": turn.content}]})
            })
            .collect();

        let mut parts = vec![json!({"text": prompt})];
        for media in &options.media {
            parts.push(json!({"inlineData": {"mimeType": media.mime_type, "data": media.data}}));
        }
        contents.push(json!({"role": "user", "parts": parts}));

        let mut generation_config = json!({
            "temperature": options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "maxOutputTokens": options.max_output_units.unwrap_or(DEFAULT_MAX_OUTPUT),
        });
        if options.json_mode {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !system_instructions.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system_instructions}]});
        }
        if !options.tools.is_empty() {
            let declarations: Vec<Value> = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }
        body
    }
}

#[async_trait]
impl Backend for GeminiAdapter {
    fn id(&self) -> &str {
        &self.endpoint.id
    }

    fn api_format(&self) -> ApiFormat {
        ApiFormat::Gemini
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
        let body = self.build_body(prompt, system_instructions, &options);

        let headers = [("x-goog-api-key", api_key.to_string())];

        let response: GenerateContentResponse = self
            .http
            .post_json(
                &self.endpoint.id,
                &self.url_for(&model),
                &headers,
                &body,
                options.timeout,
            )
            .await?;

        let parts = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();

        let mut content = String::new();
        let mut structured_calls = Vec::new();
        for part in parts {
            if let Some(text) = part.text {
                content.push_str(&text);
            }
            if let Some(call) = part.function_call {
                structured_calls.push(ToolCall {
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        if content.is_empty() && structured_calls.is_empty() {
            // Safety-blocked or truncated candidates come back without parts.
            return Err(CascadeError::Upstream {
                backend: self.endpoint.id.clone(),
                message: "no candidate content".to_string(),
                status: None,
            });
        }

        Ok(GenerationResult {
            content,
            structured_calls,
            usage: response.usage_metadata.map(|u| Usage {
                prompt_units: u.prompt_token_count,
                completion_units: u.candidates_token_count,
                total_units: u.total_token_count,
            }),
            backend: self.endpoint.id.clone(),
            model: response.model_version.unwrap_or(model),
        })
    }
}
