pub mod digest;
pub mod generate;
pub mod listbackends;

/// Upper bound on a single `generate` prompt. Larger inputs belong in `digest`.
pub const MAX_PROMPT_CHARS: usize = 1_000_000;

/// Validate prompt is non-empty and within `MAX_PROMPT_CHARS`.
pub fn validate_prompt(prompt: &str) -> Result<(), String> {
    if prompt.trim().is_empty() {
        return Err("prompt must not be empty".to_string());
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(format!(
            "prompt is {chars} chars, limit is {MAX_PROMPT_CHARS}; use digest for large material"
        ));
    }
    Ok(())
}

/// Validate temperature is finite and within [0.0, 2.0].
pub fn validate_temperature(temp: Option<f64>) -> Result<(), String> {
    if let Some(t) = temp
        && (t.is_nan() || t.is_infinite() || !(0.0..=2.0).contains(&t))
    {
        return Err(format!("temperature must be between 0.0 and 2.0, got {t}"));
    }
    Ok(())
}
