use schemars::JsonSchema;
use serde::Deserialize;

use crate::backend::{
    ChatTurn, CustomBackend, GenerationOptions, GenerationRequest, IntelligenceClass,
};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateRequest {
    /// The prompt to send.
    pub prompt: String,
    /// System prompt (defaults to a generic assistant persona).
    pub system_prompt: Option<String>,
    /// Sampling temperature: 0.0 = deterministic, 2.0 = most diverse.
    pub temperature: Option<f64>,
    /// Maximum tokens to generate. Structured replies default to 16384.
    pub max_tokens: Option<u32>,
    /// Admission lane: "fast" (default) or "reasoning". `json: true` implies "reasoning".
    pub intelligence: Option<IntelligenceClass>,
    /// Ask for a JSON reply; it is extracted, repaired if needed, and returned re-serialized.
    pub json: Option<bool>,
    /// Prior conversation turns, oldest first. Roles: "user" or "model".
    pub history: Option<Vec<ChatTurn>>,
    /// An OpenAI-compatible endpoint to try first (id, base_url, api_key, models).
    pub custom_backend: Option<CustomBackend>,
    /// Per-call ceiling in seconds for each remote request.
    pub timeout_secs: Option<u64>,
}

impl GenerateRequest {
    pub fn wants_json(&self) -> bool {
        self.json.unwrap_or(false)
    }

    pub fn into_generation_request(self) -> GenerationRequest {
        let json_mode = self.wants_json();
        GenerationRequest::new(
            self.prompt,
            self.system_prompt
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        )
        .with_options(GenerationOptions {
            temperature: self.temperature,
            max_output_units: self.max_tokens,
            json_mode,
            history: self.history.unwrap_or_default(),
            custom_backend: self.custom_backend,
            intelligence: self.intelligence,
            timeout: self.timeout_secs.map(std::time::Duration::from_secs),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_and_defaults_deserialize() {
        let req: GenerateRequest = serde_json::from_value(serde_json::json!({
            "prompt": "hi",
            "intelligence": "logic",
            "history": [{"role": "assistant", "content": "earlier"}]
        }))
        .unwrap();
        let request = req.into_generation_request();
        assert_eq!(request.system_instructions, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(
            request.options.intelligence_class(),
            IntelligenceClass::Reasoning
        );
        assert_eq!(request.options.history, vec![ChatTurn::model("earlier")]);
        assert!(!request.options.json_mode);
    }
}
