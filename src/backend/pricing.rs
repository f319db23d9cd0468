//! Model pricing table used by `Backend::cost_estimate`.
//!
//! Rates are USD per million units. Lookup is by substring of the model name,
//! first match wins, so more specific names must precede their prefixes.

use crate::backend::Usage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    const fn new(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
        }
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_units as f64 * self.input_per_million
            + usage.completion_units as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Fallback for models missing from the table.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(1.00, 3.00);

const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    // Google
    ("gemini-2.5-pro", ModelPricing::new(1.25, 10.00)),
    ("gemini-2.5-flash-lite", ModelPricing::new(0.10, 0.40)),
    ("gemini-2.5-flash", ModelPricing::new(0.30, 2.50)),
    ("gemini-2.0-flash", ModelPricing::new(0.10, 0.40)),
    // Anthropic
    ("claude-opus", ModelPricing::new(15.00, 75.00)),
    ("claude-sonnet", ModelPricing::new(3.00, 15.00)),
    ("claude-3-5-haiku", ModelPricing::new(0.80, 4.00)),
    ("claude-haiku", ModelPricing::new(1.00, 5.00)),
    // OpenAI
    ("gpt-4o-mini", ModelPricing::new(0.15, 0.60)),
    ("gpt-4o", ModelPricing::new(2.50, 10.00)),
    ("gpt-4.1-mini", ModelPricing::new(0.40, 1.60)),
    ("gpt-4.1", ModelPricing::new(2.00, 8.00)),
    ("o4-mini", ModelPricing::new(1.10, 4.40)),
    // Others
    ("deepseek-reasoner", ModelPricing::new(0.55, 2.19)),
    ("deepseek", ModelPricing::new(0.27, 1.10)),
    ("llama-3.3-70b", ModelPricing::new(0.59, 0.79)),
    ("llama-3.1-8b", ModelPricing::new(0.05, 0.08)),
    ("mistral-large", ModelPricing::new(2.00, 6.00)),
    ("mistral-small", ModelPricing::new(0.10, 0.30)),
    ("kimi", ModelPricing::new(0.60, 2.50)),
    ("moonshot", ModelPricing::new(0.60, 2.50)),
    ("command-r-plus", ModelPricing::new(2.50, 10.00)),
    ("command-r", ModelPricing::new(0.15, 0.60)),
];

pub fn pricing_for(model: &str) -> ModelPricing {
    let lower = model.to_ascii_lowercase();
    PRICING_TABLE
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, p)| *p)
        .unwrap_or(DEFAULT_PRICING)
}

/// Estimated USD cost of one call. Pure function of the table.
pub fn cost_estimate(model: &str, usage: &Usage) -> f64 {
    pricing_for(model).cost(usage)
}
