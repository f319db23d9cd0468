use thiserror::Error;

/// Closed classification of backend failures. The orchestrator branches on
/// this, never on backend identity or error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend signalled a rate limit or exhausted quota.
    RateLimit,
    /// 5xx, connectivity, timeouts. Worth retrying the same backend.
    Transient,
    /// Anything else. Abandon this backend.
    Fatal,
}

/// One backend's last failure, as reported in the aggregate error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: String,
    pub reason: String,
    pub rate_limited: bool,
}

impl BackendFailure {
    pub fn new(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            reason: reason.into(),
            rate_limited: false,
        }
    }

    pub fn rate_limited(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            reason: reason.into(),
            rate_limited: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown backend: {id}")]
    UnknownBackend { id: String },

    #[error("rate limited by {backend}")]
    RateLimited { backend: String },

    #[error("upstream error from {backend}: {message}")]
    Upstream {
        backend: String,
        message: String,
        status: Option<u16>,
    },

    #[error("auth failed for {backend}: {message}")]
    AuthFailed { backend: String, message: String },

    #[error("model or endpoint not found on {backend}: {message}")]
    NotFound { backend: String, message: String },

    #[error("{backend} timed out after {ms}ms")]
    Timeout { backend: String, ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("structured output error: {0}")]
    StructuredOutput(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("{}", render_exhausted(.failures))]
    Exhausted { failures: Vec<BackendFailure> },
}

const EXHAUSTED_HEADER: &str = "all backends exhausted";
const EXHAUSTED_TIP: &str =
    "TIP: configure a backup backend (e.g. groq or huggingface) to ride out rate limits.";

fn render_exhausted(failures: &[BackendFailure]) -> String {
    let mut out = String::from(EXHAUSTED_HEADER);
    out.push('\n');
    for f in failures {
        out.push_str(&format!("{}: {}\n", f.backend, f.reason));
    }
    out.push('\n');
    out.push_str(EXHAUSTED_TIP);
    out
}

impl CascadeError {
    /// Backend id for variants that carry one.
    pub fn backend(&self) -> Option<&str> {
        match self {
            Self::RateLimited { backend } => Some(backend),
            Self::Upstream { backend, .. } => Some(backend),
            Self::AuthFailed { backend, .. } => Some(backend),
            Self::NotFound { backend, .. } => Some(backend),
            Self::Timeout { backend, .. } => Some(backend),
            Self::UnknownBackend { id } => Some(id),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Timeout { .. } => ErrorKind::Transient,
            // status: None means the failure was not an HTTP status (empty
            // choices, oversized body). Those do not get better on retry.
            Self::Upstream { status, .. } => match status {
                Some(s) if *s >= 500 => ErrorKind::Transient,
                _ => ErrorKind::Fatal,
            },
            Self::Request(e) if e.is_decode() || e.is_builder() => ErrorKind::Fatal,
            Self::Request(_) => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind() == ErrorKind::RateLimit
    }

    /// Sanitized message safe to hand to tool clients. No URLs, no upstream bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => format!("configuration error: {msg}"),
            Self::UnknownBackend { id } => format!("unknown backend: {id}"),
            Self::RateLimited { backend } => {
                format!("rate limited by {backend}, try again shortly")
            }
            Self::Upstream {
                backend, status, ..
            } => match status {
                Some(s) => format!("upstream error from {backend} (HTTP {s})"),
                None => format!("upstream error from {backend}"),
            },
            Self::AuthFailed { backend, .. } => format!("authentication failed for {backend}"),
            Self::NotFound { backend, .. } => format!("model not found on {backend}"),
            Self::Timeout { backend, ms } => format!("{backend} timed out after {ms}ms"),
            Self::Cancelled => "cancelled".to_string(),
            Self::SchemaParse(_) => "failed to parse backend response".to_string(),
            Self::StructuredOutput(msg) => msg.clone(),
            Self::Request(_) => "request to backend failed".to_string(),
            Self::Store(_) => "cache store unavailable".to_string(),
            Self::Exhausted { failures } => render_exhausted(failures),
        }
    }

    /// Short reason recorded in the aggregate failure list.
    pub fn reason(&self) -> String {
        match self {
            Self::RateLimited { .. } => "rate limit".to_string(),
            Self::Upstream {
                status: Some(s),
                message,
                ..
            } => format!("HTTP {s}: {}", truncate_chars(message, 200)),
            other => truncate_chars(&other.to_string(), 200),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(status: Option<u16>) -> CascadeError {
        CascadeError::Upstream {
            backend: "b".to_string(),
            message: "boom".to_string(),
            status,
        }
    }

    #[test]
    fn kinds_follow_status_class() {
        assert_eq!(upstream(Some(503)).kind(), ErrorKind::Transient);
        assert_eq!(upstream(Some(400)).kind(), ErrorKind::Fatal);
        assert_eq!(upstream(None).kind(), ErrorKind::Fatal);
        assert!(
            CascadeError::RateLimited {
                backend: "b".to_string()
            }
            .is_rate_limit()
        );
        let timeout = CascadeError::Timeout {
            backend: "b".to_string(),
            ms: 10,
        };
        assert_eq!(timeout.kind(), ErrorKind::Transient);
        assert_eq!(CascadeError::Cancelled.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn reason_is_short_and_carries_status() {
        assert_eq!(upstream(Some(502)).reason(), "HTTP 502: boom");
        let long = CascadeError::Configuration("x".repeat(500));
        assert!(long.reason().ends_with("..."));
        assert!(long.reason().chars().count() <= 203);
    }

    #[test]
    fn user_message_hides_upstream_body() {
        let err = CascadeError::Upstream {
            backend: "b".to_string(),
            message: "secret detail at https://internal".to_string(),
            status: Some(500),
        };
        let msg = err.user_message();
        assert!(!msg.contains("https://"));
        assert!(msg.contains("HTTP 500"));
    }

    #[test]
    fn exhausted_lists_failures_in_order_with_tip() {
        let err = CascadeError::Exhausted {
            failures: vec![
                BackendFailure::rate_limited("gemini", "rate limit"),
                BackendFailure::new("openai", "HTTP 500: down"),
            ],
        };
        let text = err.to_string();
        let g = text.find("gemini: rate limit").unwrap();
        let o = text.find("openai: HTTP 500: down").unwrap();
        assert!(g < o);
        assert!(text.starts_with(EXHAUSTED_HEADER));
        assert!(text.ends_with(EXHAUSTED_TIP));
    }
}
