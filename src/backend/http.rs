use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::CascadeError;

/// Max response body size (2MB). Larger bodies are refused, not parsed.
pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

/// Default per-call ceiling when the caller supplies none.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Shared HTTP transport for every adapter. Cloning shares the pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, CascadeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self { client })
    }

    /// POST a JSON body and decode a JSON reply, mapping every failure onto
    /// the typed error set.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        backend: &str,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, CascadeError> {
        let timeout = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CascadeError::Timeout {
                    backend: backend.to_string(),
                    ms: timeout.as_millis() as u64,
                }
            } else {
                CascadeError::Request(e)
            }
        })?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > MAX_RESPONSE_BYTES
        {
            return Err(CascadeError::Upstream {
                backend: backend.to_string(),
                message: format!("response too large: {len} bytes (max {MAX_RESPONSE_BYTES})"),
                status: None,
            });
        }

        let bytes = response.bytes().await.map_err(|e| CascadeError::Upstream {
            backend: backend.to_string(),
            message: format!("failed to read response body: {e}"),
            status: if status.is_success() {
                None
            } else {
                Some(status.as_u16())
            },
        })?;

        if !status.is_success() {
            let truncated = &bytes[..bytes.len().min(MAX_RESPONSE_BYTES)];
            return Err(classify_status(
                backend,
                status,
                &String::from_utf8_lossy(truncated),
            ));
        }

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(CascadeError::Upstream {
                backend: backend.to_string(),
                message: format!(
                    "response too large: {} bytes (max {MAX_RESPONSE_BYTES})",
                    bytes.len()
                ),
                status: None,
            });
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| CascadeError::SchemaParse(format!("{backend}: {e}")))
    }
}

/// Map a non-success HTTP status (and its body) onto the error taxonomy.
///
/// Some backends report quota exhaustion as a 400/403 with a descriptive
/// body, so the body is consulted for those before falling back to status.
pub fn classify_status(backend: &str, status: StatusCode, body: &str) -> CascadeError {
    let backend = backend.to_string();

    if status == StatusCode::TOO_MANY_REQUESTS || body_signals_quota(body) {
        return CascadeError::RateLimited { backend };
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CascadeError::AuthFailed {
            backend,
            message: status.to_string(),
        },
        StatusCode::NOT_FOUND => CascadeError::NotFound {
            backend,
            message: status.to_string(),
        },
        _ => CascadeError::Upstream {
            backend,
            message: format!("{status}: {body}"),
            status: Some(status.as_u16()),
        },
    }
}

fn body_signals_quota(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("resource_exhausted")
        || lower.contains("rate_limit")
        || lower.contains("rate limit")
        || lower.contains("quota exceeded")
        || lower.contains("insufficient_quota")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn too_many_requests_is_rate_limit() {
        let err = classify_status("gemini", StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }

    #[test]
    fn quota_body_on_bad_request_is_rate_limit() {
        let body = r#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded"}}"#;
        let err = classify_status("gemini", StatusCode::BAD_REQUEST, body);
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }

    #[test]
    fn server_errors_are_transient() {
        let err = classify_status("groq", StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        assert_eq!(err.kind(), ErrorKind::Transient);
        let err = classify_status("groq", StatusCode::BAD_GATEWAY, "");
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn client_errors_are_fatal() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::PAYLOAD_TOO_LARGE,
        ] {
            let err = classify_status("openai", status, "nope");
            assert_eq!(err.kind(), ErrorKind::Fatal, "{status} should be fatal");
        }
    }
}
