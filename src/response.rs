use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

/// Uniform tool response. Every tool returns `Content::text(json_string)` of
/// this shape, success or failure.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub status: &'static str,
    pub content: String,
    pub content_type: &'static str,
    pub metadata: ToolMetadata,
}

#[derive(Debug, Serialize)]
pub struct ToolMetadata {
    pub tool_name: String,
    pub backend_used: String,
    #[serde(serialize_with = "serialize_finite_f64")]
    pub duration_seconds: f64,
}

impl ToolMetadata {
    pub fn new(tool_name: &str, backend_used: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            backend_used: backend_used.into(),
            duration_seconds,
        }
    }
}

/// Serialize f64, clamping non-finite values (NaN, Inf) to 0.0.
fn serialize_finite_f64<S: serde::Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(if v.is_finite() { *v } else { 0.0 })
}

impl ToolResponse {
    pub fn success(content: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "success",
            content,
            content_type: "text",
            metadata,
        }
    }

    /// Success whose content is a JSON document.
    pub fn json(content: String, metadata: ToolMetadata) -> Self {
        Self {
            content_type: "json",
            ..Self::success(content, metadata)
        }
    }

    pub fn error(message: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "error",
            content: message,
            content_type: "text",
            metadata,
        }
    }

    /// Always a success at the MCP transport level so one failed call does not
    /// abort sibling calls in the client. Failure is reported in `status`.
    pub fn into_call_tool_result(self) -> CallToolResult {
        match serde_json::to_string(&self) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => {
                let escaped = e.to_string().replace('\\', "\\\\").replace('"', "\\\"");
                CallToolResult::success(vec![Content::text(format!(
                    r#"{{"status":"error","content":"serialization failed: {escaped}","content_type":"text","metadata":{{}}}}"#
                ))])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_duration_serializes_as_zero() {
        let resp = ToolResponse::success(
            "ok".to_string(),
            ToolMetadata::new("generate", "gemini", f64::NAN),
        );
        let v: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["metadata"]["duration_seconds"], 0.0);
        assert_eq!(v["metadata"]["backend_used"], "gemini");
    }

    #[test]
    fn json_content_type_is_marked() {
        let resp = ToolResponse::json("{}".to_string(), ToolMetadata::new("generate", "x", 1.0));
        assert_eq!(resp.content_type, "json");
        assert_eq!(resp.status, "success");
    }
}
