use serde::Serialize;

use crate::backend::Backend;
use crate::breaker::CircuitBreaker;

#[derive(Debug, Serialize)]
pub struct BackendInfo {
    pub id: String,
    pub protocol: String,
    pub available: bool,
    pub blackballed: bool,
    /// Seconds left on the exclusion, when blackballed.
    pub blackball_remaining_secs: Option<u64>,
    pub multimodal: bool,
    pub tool_calls: bool,
    pub structured_output: bool,
    pub max_context_units: u32,
}

impl BackendInfo {
    pub fn describe(backend: &dyn Backend, breaker: &CircuitBreaker) -> Self {
        let caps = backend.capabilities();
        let blackballed = breaker.is_blackballed(backend.id());
        Self {
            id: backend.id().to_string(),
            protocol: backend.api_format().as_str().to_string(),
            available: backend.is_available(),
            blackballed,
            blackball_remaining_secs: if blackballed {
                breaker.remaining(backend.id()).map(|d| d.as_secs())
            } else {
                None
            },
            multimodal: caps.supports_multimodal_input,
            tool_calls: caps.supports_tool_calls,
            structured_output: caps.supports_structured_output,
            max_context_units: caps.max_context_units,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListBackendsResponse {
    pub backends: Vec<BackendInfo>,
}

impl ListBackendsResponse {
    pub fn to_markdown(&self) -> String {
        let mut out = String::from(
            "| backend | protocol | available | blackballed | multimodal | context |\n\
             |---|---|---|---|---|---|\n",
        );
        for b in &self.backends {
            let blackballed = match (b.blackballed, b.blackball_remaining_secs) {
                (true, Some(secs)) => format!("yes ({secs}s)"),
                (true, None) => "yes".to_string(),
                (false, _) => "no".to_string(),
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                b.id,
                b.protocol,
                if b.available { "yes" } else { "no" },
                blackballed,
                if b.multimodal { "yes" } else { "no" },
                b.max_context_units,
            ));
        }
        out
    }
}
