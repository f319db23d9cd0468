use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default exclusion after a rate-limit signal.
pub const DEFAULT_BLACKBALL: Duration = Duration::from_secs(60);

/// Backends temporarily excluded after signalling a rate limit.
///
/// Pure state holder: no retry logic lives here. Entries expire lazily, on
/// the first read past their deadline.
#[derive(Default)]
pub struct CircuitBreaker {
    entries: Mutex<HashMap<String, Instant>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude `backend` until now + `duration`. A later call replaces the deadline.
    pub fn blackball(&self, backend: &str, duration: Duration) {
        tracing::warn!(
            backend = %backend,
            duration_ms = duration.as_millis() as u64,
            "blackballing backend"
        );
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(backend.to_string(), Instant::now() + duration);
        }
    }

    pub fn is_blackballed(&self, backend: &str) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        match entries.get(backend) {
            Some(expiry) if Instant::now() <= *expiry => true,
            Some(_) => {
                entries.remove(backend);
                false
            }
            None => false,
        }
    }

    /// Time left on `backend`'s exclusion, if any. Does not clean up.
    pub fn remaining(&self, backend: &str) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(backend)
            .and_then(|expiry| expiry.checked_duration_since(Instant::now()))
    }

    /// Ids with a stored entry, expired or not.
    pub fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_lazily() {
        let breaker = CircuitBreaker::new();
        breaker.blackball("groq", Duration::from_millis(20));
        assert!(breaker.is_blackballed("groq"));
        assert!(breaker.remaining("groq").is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(breaker.tracked(), vec!["groq".to_string()]);
        assert!(!breaker.is_blackballed("groq"));
        assert!(breaker.tracked().is_empty());
    }

    #[test]
    fn later_blackball_replaces_deadline() {
        let breaker = CircuitBreaker::new();
        breaker.blackball("gemini", Duration::from_secs(60));
        breaker.blackball("gemini", Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!breaker.is_blackballed("gemini"));
    }
}
