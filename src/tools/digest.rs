use schemars::JsonSchema;
use serde::Deserialize;

use crate::knowledge::Material;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MaterialInput {
    /// Stable id for the source (used for per-batch caching).
    pub id: String,
    /// Display name shown in source headers.
    pub name: Option<String>,
    /// Full text of the source.
    pub content: String,
}

impl From<MaterialInput> for Material {
    fn from(m: MaterialInput) -> Self {
        let name = m.name.unwrap_or_else(|| m.id.clone());
        Material::new(m.id, name, m.content)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DigestRequest {
    /// Source documents to reduce.
    pub materials: Vec<MaterialInput>,
    /// Topic the synthesis should focus on. Part of the cache key.
    pub topic: String,
    /// What the synthesis is for (e.g. "prepare a lesson plan").
    pub intent: Option<String>,
}

impl DigestRequest {
    pub fn intent_or_default(&self) -> String {
        self.intent
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Build a factual knowledge base about {}", self.topic))
    }
}
