//! Cascade orchestrator: tries candidate backends in order until one answers.
//!
//! Per backend the attempt moves `trying -> {succeeded | retrying | switching
//! | exhausted}`. Rate limits on the designated primary are waited out a few
//! times before it is blackballed; on any other non-last backend they switch
//! immediately; on the last backend they are waited out with growing backoff.
//! If the whole list is exhausted and a rate limit was seen anywhere, one
//! rescue attempt goes back to the first candidate with the original request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::admission::{AdmissionController, Lane, WaitProgress, cancellable};
use crate::backend::{
    Backend, BackendCapabilities, GenerationRequest, GenerationResult, IntelligenceClass,
};
use crate::breaker::{CircuitBreaker, DEFAULT_BLACKBALL};
use crate::catalog::Catalog;
use crate::config::{Config, ExpertDefaults};
use crate::error::{BackendFailure, CascadeError, ErrorKind};
use crate::structured;

/// Output ceiling for structured requests that do not set one.
pub const JSON_MAX_OUTPUT_UNITS: u32 = 16_384;

/// Rough characters per backend unit, used to size pruning against context windows.
const CHARS_PER_UNIT: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct CascadePolicy {
    pub blackball_duration: Duration,
    /// Rate-limit waits the primary gets before it is blackballed.
    pub sticky_retries: u32,
    /// Sticky wait is `(retries + 1) * sticky_backoff_step`.
    pub sticky_backoff_step: Duration,
    /// Last-candidate wait is `(retries + 1) * last_resort_backoff_step`.
    pub last_resort_backoff_step: Duration,
    /// Retry budget for a candidate that has a successor.
    pub max_retries: u32,
    /// Retry budget for the last candidate.
    pub last_max_retries: u32,
    /// Transient backoff is `transient_base * 2^retries` plus jitter.
    pub transient_base: Duration,
    pub jitter_max: Duration,
    /// Pause before the rescue pass.
    pub rescue_wait: Duration,
    /// Prompt+history size above which non-primary requests are pruned.
    pub prune_threshold_chars: usize,
    /// History turns kept when pruning.
    pub keep_recent_turns: usize,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self {
            blackball_duration: DEFAULT_BLACKBALL,
            sticky_retries: 2,
            sticky_backoff_step: Duration::from_secs(15),
            last_resort_backoff_step: Duration::from_secs(20),
            max_retries: 2,
            last_max_retries: 5,
            transient_base: Duration::from_secs(1),
            jitter_max: Duration::from_millis(500),
            rescue_wait: Duration::from_secs(15),
            prune_threshold_chars: 100_000,
            keep_recent_turns: 4,
        }
    }
}

/// Progress events for callers that surface cascade state to a user.
#[derive(Debug, Clone, PartialEq)]
pub enum CascadeStatus {
    Generating { backend: String },
    /// Emitted at least once per second during any backoff or admission wait.
    Waiting { message: String, remaining: Duration },
    Switching { from: String, to: String },
}

pub type StatusCallback = Arc<dyn Fn(CascadeStatus) + Send + Sync>;

/// Per-call cancellation and status reporting. Both optional.
#[derive(Clone, Default)]
pub struct CallContext {
    pub cancel: Option<CancellationToken>,
    pub on_status: Option<StatusCallback>,
}

impl CallContext {
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_status(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }

    fn emit(&self, status: CascadeStatus) {
        if let Some(cb) = &self.on_status {
            cb(status);
        }
    }
}

/// A parsed structured reply plus the raw result it came from.
#[derive(Debug, Clone)]
pub struct Structured<T> {
    pub value: T,
    pub result: GenerationResult,
}

pub struct Orchestrator {
    catalog: Arc<Catalog>,
    admission: Arc<AdmissionController>,
    breaker: Arc<CircuitBreaker>,
    policy: CascadePolicy,
    expert: HashMap<IntelligenceClass, ExpertDefaults>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<Catalog>,
        admission: Arc<AdmissionController>,
        breaker: Arc<CircuitBreaker>,
        policy: CascadePolicy,
    ) -> Self {
        Self {
            catalog,
            admission,
            breaker,
            policy,
            expert: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, CascadeError> {
        let catalog = Arc::new(Catalog::from_config(config)?);
        let admission = Arc::new(AdmissionController::new(config.admission.clone()));
        Ok(Self::new(
            catalog,
            admission,
            Arc::new(CircuitBreaker::new()),
            config.cascade.clone(),
        )
        .with_expert_defaults(config.expert.clone()))
    }

    pub fn with_expert_defaults(
        mut self,
        expert: HashMap<IntelligenceClass, ExpertDefaults>,
    ) -> Self {
        self.expert = expert;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &CascadePolicy {
        &self.policy
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, CascadeError> {
        self.generate_with(request, &CallContext::default()).await
    }

    /// Structured variant: forces JSON mode, extracts and parses the payload,
    /// repairing near-valid JSON once before giving up.
    pub async fn generate_json<T: DeserializeOwned>(
        &self,
        mut request: GenerationRequest,
        ctx: &CallContext,
    ) -> Result<Structured<T>, CascadeError> {
        request.options.json_mode = true;
        request
            .options
            .max_output_units
            .get_or_insert(JSON_MAX_OUTPUT_UNITS);
        request
            .options
            .intelligence
            .get_or_insert(IntelligenceClass::Reasoning);

        let result = self.generate_with(request, ctx).await?;
        let value = structured::parse_structured(&result.content)?;
        Ok(Structured { value, result })
    }

    pub async fn generate_with(
        &self,
        request: GenerationRequest,
        ctx: &CallContext,
    ) -> Result<GenerationResult, CascadeError> {
        let request = self.merge_expert_defaults(request);
        let active = self.active_candidates(&request)?;
        let lane = Lane::from(request.options.intelligence_class());
        let total = active.len();

        tracing::info!(
            candidates = %active.iter().map(|b| b.id()).collect::<Vec<_>>().join(","),
            lane = ?lane,
            "starting cascade"
        );

        let mut failures: Vec<BackendFailure> = Vec::new();

        for (idx, backend) in active.iter().enumerate() {
            let id = backend.id().to_string();
            let is_last = idx + 1 == total;
            let max_retries = if is_last {
                self.policy.last_max_retries
            } else {
                self.policy.max_retries
            };
            let attempt_request = self.sanitize(&request, backend.as_ref(), idx);
            let mut retries: u32 = 0;

            while retries <= max_retries {
                ctx.emit(CascadeStatus::Generating {
                    backend: id.clone(),
                });

                let err = match self.attempt(lane, backend, &attempt_request, ctx).await {
                    Ok(result) => return Ok(self.finish(backend.as_ref(), result)),
                    Err(err) => err,
                };

                match err.kind() {
                    _ if matches!(err, CascadeError::Cancelled) => return Err(err),
                    ErrorKind::RateLimit => {
                        self.admission.signal_rate_limit();

                        if id == self.catalog.primary() && retries < self.policy.sticky_retries {
                            let wait = self.policy.sticky_backoff_step * (retries + 1);
                            tracing::warn!(
                                backend = %id,
                                attempt = retries + 1,
                                wait_ms = wait.as_millis() as u64,
                                "primary rate limited, holding on"
                            );
                            self.countdown(wait, &format!("{id} is busy, retrying"), ctx)
                                .await?;
                            retries += 1;
                            continue;
                        }

                        self.breaker.blackball(&id, self.policy.blackball_duration);

                        if !is_last {
                            let to = self.next_healthy(&active, idx);
                            tracing::warn!(
                                backend = %id,
                                next = to.unwrap_or("none"),
                                "rate limited, switching"
                            );
                            ctx.emit(CascadeStatus::Switching {
                                from: id.clone(),
                                to: to.unwrap_or("next").to_string(),
                            });
                            failures.push(BackendFailure::rate_limited(
                                &id,
                                "rate limit (switched to backup)",
                            ));
                            break;
                        }

                        if self.next_healthy(&active, idx).is_some() {
                            tracing::info!(backend = %id, "last candidate limited, healthy backup exists");
                            failures.push(BackendFailure::rate_limited(&id, "rate limit"));
                            break;
                        }

                        if retries >= max_retries {
                            failures.push(BackendFailure::rate_limited(
                                &id,
                                format!("rate limit exhausted after {retries} waits"),
                            ));
                            break;
                        }

                        let wait = self.policy.last_resort_backoff_step * (retries + 1);
                        tracing::warn!(
                            backend = %id,
                            wait_ms = wait.as_millis() as u64,
                            "last candidate rate limited, waiting it out"
                        );
                        self.countdown(wait, &format!("{id} is at its limit, waiting"), ctx)
                            .await?;
                        retries += 1;
                    }
                    ErrorKind::Transient if retries < max_retries => {
                        retries += 1;
                        let backoff = self.transient_backoff(retries);
                        tracing::info!(
                            backend = %id,
                            error = %err,
                            wait_ms = backoff.as_millis() as u64,
                            "transient failure, retrying"
                        );
                        self.countdown(backoff, &format!("{id} unavailable, retrying"), ctx)
                            .await?;
                    }
                    ErrorKind::Transient | ErrorKind::Fatal => {
                        tracing::warn!(backend = %id, error = %err, "backend failed, moving on");
                        failures.push(BackendFailure::new(&id, err.reason()));
                        break;
                    }
                }
            }
        }

        if failures.iter().any(|f| f.rate_limited)
            && let Some(first) = active.first()
        {
            let first_id = first.id().to_string();
            tracing::info!(
                backend = %first_id,
                wait_ms = self.policy.rescue_wait.as_millis() as u64,
                "all candidates exhausted by rate limits, attempting rescue"
            );
            self.countdown(self.policy.rescue_wait, "final recovery attempt", ctx)
                .await?;
            ctx.emit(CascadeStatus::Generating {
                backend: first_id.clone(),
            });
            match self.attempt(lane, first, &request, ctx).await {
                Ok(result) => return Ok(self.finish(first.as_ref(), result)),
                Err(CascadeError::Cancelled) => return Err(CascadeError::Cancelled),
                Err(err) => failures.push(BackendFailure::new(
                    format!("global rescue ({first_id})"),
                    err.reason(),
                )),
            }
        }

        tracing::error!(failures = failures.len(), "all backends exhausted");
        Err(CascadeError::Exhausted { failures })
    }

    /// Capabilities of the backend a request would try first, if any is usable.
    pub fn lead_capabilities(&self, request: &GenerationRequest) -> Option<BackendCapabilities> {
        self.active_candidates(request)
            .ok()?
            .first()
            .map(|b| b.capabilities())
    }

    fn merge_expert_defaults(&self, mut request: GenerationRequest) -> GenerationRequest {
        let class = request.options.intelligence_class();
        if let Some(defaults) = self.expert.get(&class) {
            let opts = &mut request.options;
            opts.temperature = opts.temperature.or(defaults.temperature);
            opts.max_output_units = opts.max_output_units.or(defaults.max_output_units);
        }
        request
    }

    /// Ordered candidates, filtered by media capability, credentials, and the breaker.
    fn active_candidates(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<Arc<dyn Backend>>, CascadeError> {
        let options = &request.options;
        let scoped = match &options.custom_backend {
            Some(custom) => self.catalog.request_scoped(custom)?,
            None => None,
        };

        let mut candidates: Vec<Arc<dyn Backend>> = scoped.into_iter().collect();
        for id in self.catalog.candidate_ids(options) {
            if candidates.iter().any(|c| c.id() == id) {
                continue;
            }
            match self.catalog.resolve(&id) {
                Ok(b) => candidates.push(b),
                Err(e) => {
                    tracing::warn!(backend = %id, error = %e, "skipping unresolvable candidate");
                }
            }
        }

        let needs_media = options.has_media();
        let mut active = Vec::new();
        for backend in candidates {
            let id = backend.id().to_string();
            if needs_media && !backend.capabilities().supports_multimodal_input {
                continue;
            }
            if !backend.is_available() {
                continue;
            }
            if self.breaker.is_blackballed(&id) {
                tracing::debug!(backend = %id, "skipping blackballed candidate");
                continue;
            }
            active.push(backend);
        }

        if active.is_empty() {
            return Err(CascadeError::Configuration(
                "no backend is available: add an API key or a custom backend".to_string(),
            ));
        }
        Ok(active)
    }

    /// Request copy shaped for `backend`. Unsupported fields are always
    /// stripped; oversize payloads are pruned for everything after the first.
    fn sanitize(
        &self,
        request: &GenerationRequest,
        backend: &dyn Backend,
        position: usize,
    ) -> GenerationRequest {
        let caps = backend.capabilities();
        let mut out = request.clone();
        out.options = request.options.supported_by(&caps);
        if position == 0 {
            return out;
        }

        let limit = self
            .policy
            .prune_threshold_chars
            .min((caps.max_context_units as usize).saturating_mul(CHARS_PER_UNIT));
        prune_to_limit(&mut out, limit, self.policy.keep_recent_turns);
        out
    }

    async fn attempt(
        &self,
        lane: Lane,
        backend: &Arc<dyn Backend>,
        request: &GenerationRequest,
        ctx: &CallContext,
    ) -> Result<GenerationResult, CascadeError> {
        let progress: Option<WaitProgress> = ctx.on_status.clone().map(|cb| {
            Arc::new(move |remaining| {
                cb(CascadeStatus::Waiting {
                    message: "pacing backend calls".to_string(),
                    remaining,
                })
            }) as WaitProgress
        });
        self.admission
            .schedule(
                lane,
                ctx.cancel.as_ref(),
                progress.as_ref(),
                backend.generate(
                    &request.prompt,
                    &request.system_instructions,
                    &request.options,
                ),
            )
            .await
    }

    fn finish(&self, backend: &dyn Backend, result: GenerationResult) -> GenerationResult {
        match &result.usage {
            Some(usage) => tracing::info!(
                backend = %backend.id(),
                model = %result.model,
                total_units = usage.total_units,
                cost_usd = backend.cost_estimate(&result.model, usage),
                "generation succeeded"
            ),
            None => tracing::info!(backend = %backend.id(), model = %result.model, "generation succeeded"),
        }
        result
    }

    fn next_healthy<'a>(&self, active: &'a [Arc<dyn Backend>], idx: usize) -> Option<&'a str> {
        active
            .iter()
            .skip(idx + 1)
            .map(|b| b.id())
            .find(|id| !self.breaker.is_blackballed(id))
    }

    fn transient_backoff(&self, retries: u32) -> Duration {
        let base = self
            .policy
            .transient_base
            .saturating_mul(2u32.saturating_pow(retries));
        let jitter_ms = self.policy.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        base + Duration::from_millis(jitter)
    }

    /// Sleep `total`, reporting the remaining time at least once per second.
    async fn countdown(
        &self,
        total: Duration,
        message: &str,
        ctx: &CallContext,
    ) -> Result<(), CascadeError> {
        let deadline = tokio::time::Instant::now() + total;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let remaining = deadline - now;
            ctx.emit(CascadeStatus::Waiting {
                message: message.to_string(),
                remaining,
            });
            cancellable(
                ctx.cancel.as_ref(),
                tokio::time::sleep(remaining.min(Duration::from_secs(1))),
            )
            .await?;
        }
    }
}

/// Shrink prompt+history under `limit` chars: keep only the most recent
/// turns, then cut the prompt down to its tail.
fn prune_to_limit(request: &mut GenerationRequest, limit: usize, keep_turns: usize) {
    let size = |r: &GenerationRequest| {
        r.prompt.chars().count()
            + r.options
                .history
                .iter()
                .map(|t| t.content.chars().count())
                .sum::<usize>()
    };
    if size(request) <= limit {
        return;
    }

    let history = &mut request.options.history;
    if history.len() > keep_turns {
        let drop = history.len() - keep_turns;
        history.drain(..drop);
        tracing::debug!(dropped_turns = drop, "pruned conversation history");
    }

    let history_chars: usize = request
        .options
        .history
        .iter()
        .map(|t| t.content.chars().count())
        .sum();
    let prompt_budget = limit.saturating_sub(history_chars);
    let prompt_chars = request.prompt.chars().count();
    if prompt_chars > prompt_budget {
        request.prompt = tail_chars(&request.prompt, prompt_budget);
        tracing::debug!(
            from = prompt_chars,
            to = prompt_budget,
            "truncated prompt to its tail"
        );
    }
}

fn tail_chars(s: &str, keep: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(keep)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatTurn, GenerationOptions};

    #[test]
    fn prune_keeps_recent_turns_and_prompt_tail() {
        let mut request = GenerationRequest::new("x".repeat(50) + "TAIL", "sys").with_options(
            GenerationOptions {
                history: (0..6).map(|i| ChatTurn::user(format!("turn-{i}"))).collect(),
                ..Default::default()
            },
        );
        prune_to_limit(&mut request, 30, 2);
        assert_eq!(request.options.history.len(), 2);
        assert_eq!(request.options.history[0].content, "turn-4");
        assert!(request.prompt.ends_with("TAIL"));
        assert_eq!(request.prompt.chars().count(), 30 - 12);
    }

    #[test]
    fn prune_leaves_small_requests_alone() {
        let mut request = GenerationRequest::new("short", "sys");
        prune_to_limit(&mut request, 100, 2);
        assert_eq!(request.prompt, "short");
    }

    #[test]
    fn transient_backoff_doubles() {
        let (catalog, admission, breaker) = (
            Arc::new(Catalog::new(
                crate::backend::http::HttpClient::new().unwrap(),
            )),
            Arc::new(AdmissionController::default()),
            Arc::new(CircuitBreaker::new()),
        );
        let policy = CascadePolicy {
            transient_base: Duration::from_millis(100),
            jitter_max: Duration::ZERO,
            ..Default::default()
        };
        let orch = Orchestrator::new(catalog, admission, breaker, policy);
        assert_eq!(orch.transient_backoff(1), Duration::from_millis(200));
        assert_eq!(orch.transient_backoff(3), Duration::from_millis(800));
    }
}
