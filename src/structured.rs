//! JSON extraction from model replies, with one best-effort repair pass.

use serde::de::DeserializeOwned;

use crate::error::CascadeError;

/// Parse `text` as `T`. Looks for the last fenced JSON block, then the raw
/// `{...}`/`[...]` span. Near-valid JSON is repaired once; a reply that stops
/// before its closing bracket is reported as truncated rather than patched.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, CascadeError> {
    let candidate = extract_json(text).unwrap_or_else(|| text.trim());
    if candidate.is_empty() {
        return Err(CascadeError::StructuredOutput(
            "backend returned no JSON payload".to_string(),
        ));
    }

    let first_error = match serde_json::from_str::<T>(candidate) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    if !candidate.trim_end().ends_with(['}', ']']) {
        tracing::warn!(len = candidate.len(), "structured reply ends mid-document");
        return Err(CascadeError::StructuredOutput(
            "response was truncated before the JSON document closed".to_string(),
        ));
    }

    tracing::debug!(error = %first_error, "repairing structured reply");
    let repaired = repair_json(candidate);
    serde_json::from_str::<T>(&repaired).map_err(|e| {
        CascadeError::StructuredOutput(format!("unparseable JSON after repair: {e}"))
    })
}

/// The JSON payload inside `text`, if one can be located.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(block) = fenced_blocks(text)
        .into_iter()
        .rev()
        .map(str::trim)
        .find(|b| b.starts_with(['{', '[']))
    {
        return Some(block);
    }

    let start = text.find(['{', '['])?;
    let span = &text[start..];
    match span.rfind(['}', ']']) {
        Some(end) => Some(&span[..=end]),
        None => Some(span.trim_end()),
    }
}

/// Bodies of ``` fences tagged `json` or untagged. An unterminated fence
/// yields everything after it.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map_or(after.len(), |n| n + 1);
        let tag = after[..body_start].trim();
        let wanted = tag.is_empty() || tag.eq_ignore_ascii_case("json");
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                if wanted {
                    blocks.push(&body[..close]);
                }
                rest = &body[close + 3..];
            }
            None => {
                if wanted {
                    blocks.push(body);
                }
                break;
            }
        }
    }
    blocks
}

/// Rewrite common near-JSON mistakes: single-quoted strings, unquoted keys,
/// Python literals, trailing commas, raw newlines in strings, and unbalanced
/// brackets.
pub fn repair_json(raw: &str) -> String {
    let chars: Vec<char> = raw.trim().chars().collect();
    let mut out = String::with_capacity(raw.len() + 16);
    let mut closers: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
                continue;
            }
            '{' => {
                closers.push('}');
                out.push(c);
            }
            '[' => {
                closers.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if closers.last() == Some(&c) {
                    strip_trailing_comma(&mut out);
                    closers.pop();
                    out.push(c);
                }
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
                while i < chars.len() && is_ident(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_key = closers.last() == Some(&'}')
                    && chars[i..].iter().find(|c| !c.is_whitespace()) == Some(&':');
                if is_key {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(match word.as_str() {
                        "True" => "true",
                        "False" => "false",
                        "None" | "undefined" | "NaN" => "null",
                        other => other,
                    });
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    strip_trailing_comma(&mut out);
    while let Some(close) = closers.pop() {
        out.push(close);
    }
    out
}

/// Copy the string literal starting at `chars[start]` as a double-quoted JSON
/// string. Returns the index just past its closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut j = start + 1;
    while j < chars.len() {
        let ch = chars[j];
        match ch {
            '\\' => match chars.get(j + 1) {
                Some('\'') => {
                    out.push('\'');
                    j += 2;
                    continue;
                }
                Some(next) => {
                    out.push('\\');
                    out.push(*next);
                    j += 2;
                    continue;
                }
                None => {
                    out.push_str("\\\\");
                }
            },
            c if c == quote => {
                out.push('"');
                return j + 1;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
        j += 1;
    }
    out.push('"');
    j
}

fn strip_trailing_comma(out: &mut String) {
    let end = out.trim_end().len();
    if out[..end].ends_with(',') {
        out.truncate(end - 1);
    }
}
