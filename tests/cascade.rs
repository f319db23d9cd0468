//! Cascade behaviour against scripted in-process backends.
//! Timings are shrunk to milliseconds so every path runs quickly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cascade::admission::{AdmissionConfig, AdmissionController};
use cascade::backend::http::HttpClient;
use cascade::backend::{
    ApiFormat, Backend, BackendCapabilities, GenerationOptions, GenerationRequest,
    GenerationResult, IntelligenceClass, MediaPart, ToolDefinition,
};
use cascade::breaker::CircuitBreaker;
use cascade::cascade::{CallContext, CascadePolicy, CascadeStatus, Orchestrator};
use cascade::catalog::Catalog;
use cascade::config::ExpertDefaults;
use cascade::error::{CascadeError, ErrorKind};

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Ok,
    RateLimit,
    Transient,
    Fatal,
    Hang,
}

struct ScriptedBackend {
    id: String,
    caps: BackendCapabilities,
    available: bool,
    reply: String,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, GenerationOptions)>>,
}

impl ScriptedBackend {
    fn new(id: &str, fallback: Outcome) -> Self {
        Self {
            id: id.to_string(),
            caps: BackendCapabilities::text_only(128_000),
            available: true,
            reply: format!("reply from {id}"),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Outcomes consumed in order before falling back.
    fn script(self, outcomes: &[Outcome]) -> Self {
        *self.script.lock().unwrap() = outcomes.iter().copied().collect();
        self
    }

    fn caps(mut self, caps: BackendCapabilities) -> Self {
        self.caps = caps;
        self
    }

    fn reply(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompts(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    fn last_options(&self) -> GenerationOptions {
        self.seen.lock().unwrap().last().unwrap().1.clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn api_format(&self) -> ApiFormat {
        ApiFormat::OpenAi
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.caps
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(
        &self,
        prompt: &str,
        _system_instructions: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResult, CascadeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((prompt.to_string(), options.clone()));
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match outcome {
            Outcome::Ok => Ok(GenerationResult {
                content: self.reply.clone(),
                structured_calls: vec![],
                usage: None,
                backend: self.id.clone(),
                model: format!("{}-model", self.id),
            }),
            Outcome::RateLimit => Err(CascadeError::RateLimited {
                backend: self.id.clone(),
            }),
            Outcome::Transient => Err(CascadeError::Upstream {
                backend: self.id.clone(),
                message: "service unavailable".to_string(),
                status: Some(503),
            }),
            Outcome::Fatal => Err(CascadeError::AuthFailed {
                backend: self.id.clone(),
                message: "invalid key".to_string(),
            }),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(CascadeError::Upstream {
                    backend: self.id.clone(),
                    message: "hung".to_string(),
                    status: None,
                })
            }
        }
    }
}

fn fast_policy() -> CascadePolicy {
    CascadePolicy {
        blackball_duration: Duration::from_secs(60),
        sticky_retries: 2,
        sticky_backoff_step: Duration::from_millis(5),
        last_resort_backoff_step: Duration::from_millis(5),
        max_retries: 2,
        last_max_retries: 5,
        transient_base: Duration::from_millis(2),
        jitter_max: Duration::ZERO,
        rescue_wait: Duration::from_millis(5),
        ..Default::default()
    }
}

fn open_admission() -> AdmissionConfig {
    AdmissionConfig {
        max_concurrent: 4,
        fast_base_gap: Duration::ZERO,
        heavy_base_gap: Duration::ZERO,
        throttled_gap: Duration::ZERO,
        cooldown: Duration::from_secs(60),
    }
}

fn orchestrator(
    primary: &str,
    backends: &[&Arc<ScriptedBackend>],
    policy: CascadePolicy,
) -> Orchestrator {
    let order = backends.iter().map(|b| b.id.clone()).collect();
    let catalog = Catalog::new(HttpClient::new().unwrap())
        .with_preference(order)
        .with_primary(primary);
    for backend in backends {
        catalog.register((*backend).clone());
    }
    Orchestrator::new(
        Arc::new(catalog),
        Arc::new(AdmissionController::new(open_admission())),
        Arc::new(CircuitBreaker::new()),
        policy,
    )
}

fn recorder() -> (CallContext, Arc<Mutex<Vec<CascadeStatus>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let ctx = CallContext::default().with_status(Arc::new(move |status: CascadeStatus| {
        sink.lock().unwrap().push(status);
    }));
    (ctx, events)
}

/// Remaining time reported at the start of each wait, in order.
fn waits(events: &Mutex<Vec<CascadeStatus>>) -> Vec<Duration> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            CascadeStatus::Waiting { remaining, .. } => Some(*remaining),
            _ => None,
        })
        .collect()
}

fn failures_of(err: CascadeError) -> Vec<cascade::error::BackendFailure> {
    match err {
        CascadeError::Exhausted { failures } => failures,
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Ordering: the first healthy candidate answers, nothing else is touched.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_candidate_success_invokes_no_other() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let c = Arc::new(ScriptedBackend::new("c", Outcome::Ok));
    let orch = orchestrator("a", &[&a, &b, &c], fast_policy());

    let result = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap();

    assert_eq!(result.backend, "a");
    assert_eq!(result.content, "reply from a");
    assert_eq!((a.calls(), b.calls(), c.calls()), (1, 0, 0));
    assert!(orch.breaker().tracked().is_empty());
}

#[tokio::test]
async fn blackballed_and_unavailable_candidates_are_skipped() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok).unavailable());
    let c = Arc::new(ScriptedBackend::new("c", Outcome::Ok));
    let orch = orchestrator("a", &[&a, &b, &c], fast_policy());
    orch.breaker().blackball("a", Duration::from_secs(30));

    let result = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap();

    assert_eq!(result.backend, "c");
    assert_eq!((a.calls(), b.calls(), c.calls()), (0, 0, 1));
}

#[tokio::test]
async fn no_usable_candidate_is_a_configuration_error() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok).unavailable());
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let orch = orchestrator("a", &[&a, &b], fast_policy());
    orch.breaker().blackball("b", Duration::from_secs(30));

    let err = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Configuration(_)), "got {err:?}");
    assert_eq!(a.calls() + b.calls(), 0);
}

// ---------------------------------------------------------------------------
// Rate limits: sticky primary, immediate switch elsewhere, blackballing.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn primary_rate_limited_twice_then_backup_answers() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::RateLimit));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let c = Arc::new(ScriptedBackend::new("c", Outcome::Ok));
    let policy = CascadePolicy {
        sticky_retries: 1,
        ..fast_policy()
    };
    let orch = orchestrator("a", &[&a, &b, &c], policy);
    let (ctx, events) = recorder();

    let result = orch
        .generate_with(GenerationRequest::new("hello", "sys"), &ctx)
        .await
        .unwrap();

    assert_eq!(result.backend, "b");
    assert_eq!((a.calls(), b.calls(), c.calls()), (2, 1, 0));
    assert!(orch.breaker().is_blackballed("a"));
    assert!(!orch.breaker().is_blackballed("b"));
    assert!(orch.admission().is_throttled());

    let events = events.lock().unwrap();
    assert!(events.contains(&CascadeStatus::Switching {
        from: "a".to_string(),
        to: "b".to_string(),
    }));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, CascadeStatus::Waiting { .. })),
        "sticky wait should report progress"
    );
}

#[tokio::test]
async fn default_sticky_budget_then_backup_answers() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::RateLimit));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let c = Arc::new(ScriptedBackend::new("c", Outcome::Ok));
    let defaults = CascadePolicy::default();
    let policy = CascadePolicy {
        sticky_retries: defaults.sticky_retries,
        max_retries: defaults.max_retries,
        ..fast_policy()
    };
    assert_eq!(policy.sticky_retries, 2);
    let orch = orchestrator("a", &[&a, &b, &c], policy);

    let result = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap();

    assert_eq!(result.backend, "b");
    assert_eq!((a.calls(), b.calls(), c.calls()), (3, 1, 0));
    assert!(orch.breaker().is_blackballed("a"));
    assert!(orch.breaker().remaining("a").unwrap() > Duration::from_secs(59));
}

#[tokio::test]
async fn non_primary_rate_limit_switches_immediately() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::RateLimit));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let orch = orchestrator("elsewhere", &[&a, &b], fast_policy());

    let result = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap();

    assert_eq!(result.backend, "b");
    assert_eq!(a.calls(), 1);
    assert!(orch.breaker().is_blackballed("a"));
    assert!(orch.breaker().remaining("a").unwrap() > Duration::from_secs(50));
}

#[tokio::test]
async fn blackballed_backend_is_skipped_by_the_next_call() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok).script(&[Outcome::RateLimit]));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let orch = orchestrator("elsewhere", &[&a, &b], fast_policy());

    orch.generate(GenerationRequest::new("one", "sys"))
        .await
        .unwrap();
    let second = orch
        .generate(GenerationRequest::new("two", "sys"))
        .await
        .unwrap();

    assert_eq!(second.backend, "b");
    assert_eq!(a.calls(), 1, "a must not be tried while blackballed");
    assert_eq!(b.calls(), 2);
}

#[tokio::test]
async fn lone_rate_limited_backend_exhausts_with_tip() {
    let solo = Arc::new(ScriptedBackend::new("solo", Outcome::RateLimit));
    let orch = orchestrator("solo", &[&solo], fast_policy());

    let err = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap_err();

    let text = err.to_string();
    assert!(text.starts_with("all backends exhausted"));
    assert!(text.contains("solo"));
    assert!(text.contains("TIP:"));
    assert_eq!(err.kind(), ErrorKind::Fatal);

    // 3 sticky attempts, 3 more last-resort attempts, 1 rescue.
    assert_eq!(solo.calls(), 7);

    let failures = failures_of(err);
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].backend, "solo");
    assert!(failures[0].reason.contains("exhausted after 5 waits"));
    assert_eq!(failures[1].backend, "global rescue (solo)");
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_grow_linearly_per_phase() {
    let solo = Arc::new(ScriptedBackend::new("solo", Outcome::RateLimit));
    let policy = CascadePolicy {
        sticky_backoff_step: Duration::from_millis(100),
        last_resort_backoff_step: Duration::from_millis(150),
        rescue_wait: Duration::from_millis(70),
        ..fast_policy()
    };
    let orch = orchestrator("solo", &[&solo], policy);
    let (ctx, events) = recorder();

    orch.generate_with(GenerationRequest::new("hello", "sys"), &ctx)
        .await
        .unwrap_err();

    let ms = |n: u64| Duration::from_millis(n);
    assert_eq!(
        waits(&events),
        vec![ms(100), ms(200), ms(450), ms(600), ms(750), ms(70)],
        "sticky 1x 2x, last resort 3x 4x 5x, then the rescue pause"
    );
}

#[tokio::test(start_paused = true)]
async fn transient_backoff_doubles_per_retry() {
    let solo = Arc::new(ScriptedBackend::new("solo", Outcome::Transient));
    let policy = CascadePolicy {
        transient_base: Duration::from_millis(10),
        last_max_retries: 3,
        ..fast_policy()
    };
    let orch = orchestrator("solo", &[&solo], policy);
    let (ctx, events) = recorder();

    orch.generate_with(GenerationRequest::new("hello", "sys"), &ctx)
        .await
        .unwrap_err();

    let ms = |n: u64| Duration::from_millis(n);
    assert_eq!(waits(&events), vec![ms(20), ms(40), ms(80)]);
    assert_eq!(solo.calls(), 4);
}

#[tokio::test]
async fn rescue_pass_retries_first_candidate() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok).script(&[Outcome::RateLimit]));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Fatal));
    let orch = orchestrator("elsewhere", &[&a, &b], fast_policy());

    let result = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap();

    assert_eq!(result.backend, "a");
    assert_eq!((a.calls(), b.calls()), (2, 1));
}

// ---------------------------------------------------------------------------
// Transient and fatal failures.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_retry_same_backend() {
    let a = Arc::new(
        ScriptedBackend::new("a", Outcome::Ok).script(&[Outcome::Transient, Outcome::Transient]),
    );
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let orch = orchestrator("a", &[&a, &b], fast_policy());

    let result = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap();

    assert_eq!(result.backend, "a");
    assert_eq!((a.calls(), b.calls()), (3, 0));
    assert!(!orch.breaker().is_blackballed("a"));
}

#[tokio::test]
async fn transient_budget_spent_moves_on_without_rescue() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Transient));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Fatal));
    let orch = orchestrator("a", &[&a, &b], fast_policy());

    let err = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap_err();

    assert_eq!((a.calls(), b.calls()), (3, 1));
    let failures = failures_of(err);
    let backends: Vec<&str> = failures.iter().map(|f| f.backend.as_str()).collect();
    assert_eq!(backends, vec!["a", "b"]);
    assert!(failures[0].reason.contains("503"));
    assert!(failures.iter().all(|f| !f.rate_limited));
}

#[tokio::test]
async fn fatal_failure_switches_without_retry() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Fatal));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let orch = orchestrator("a", &[&a, &b], fast_policy());

    let result = orch
        .generate(GenerationRequest::new("hello", "sys"))
        .await
        .unwrap();

    assert_eq!(result.backend, "b");
    assert_eq!(a.calls(), 1);
    assert!(!orch.breaker().is_blackballed("a"));
}

// ---------------------------------------------------------------------------
// Request shaping per candidate.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn media_requests_skip_text_only_backends() {
    let multimodal = BackendCapabilities {
        supports_multimodal_input: true,
        ..BackendCapabilities::text_only(128_000)
    };
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok).caps(multimodal));
    let orch = orchestrator("a", &[&a, &b], fast_policy());

    let request = GenerationRequest::new("describe this", "sys").with_options(GenerationOptions {
        media: vec![MediaPart {
            mime_type: "image/png".to_string(),
            data: "aGVsbG8=".to_string(),
        }],
        ..Default::default()
    });
    let result = orch.generate(request).await.unwrap();

    assert_eq!(result.backend, "b");
    assert_eq!(a.calls(), 0);
    assert_eq!(b.last_options().media.len(), 1);
}

#[tokio::test]
async fn unsupported_tools_are_stripped_before_dispatch() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok));
    let orch = orchestrator("a", &[&a], fast_policy());

    let request = GenerationRequest::new("call a tool", "sys").with_options(GenerationOptions {
        tools: vec![ToolDefinition {
            name: "lookup".to_string(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object"}),
        }],
        ..Default::default()
    });
    orch.generate(request).await.unwrap();

    assert!(a.last_options().tools.is_empty());
}

#[tokio::test]
async fn oversize_prompt_is_pruned_for_backups_only() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Fatal));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let policy = CascadePolicy {
        prune_threshold_chars: 40,
        ..fast_policy()
    };
    let orch = orchestrator("a", &[&a, &b], policy);

    let prompt = "x".repeat(100) + "END";
    orch.generate(GenerationRequest::new(prompt.clone(), "sys"))
        .await
        .unwrap();

    assert_eq!(a.prompts(), vec![prompt]);
    let pruned = &b.prompts()[0];
    assert_eq!(pruned.chars().count(), 40);
    assert!(pruned.ends_with("END"));
}

#[tokio::test]
async fn expert_defaults_fill_unset_options() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok));
    let expert = HashMap::from([(
        IntelligenceClass::Fast,
        ExpertDefaults {
            temperature: Some(0.2),
            max_output_units: Some(512),
        },
    )]);
    let orch = orchestrator("a", &[&a], fast_policy()).with_expert_defaults(expert);

    let request = GenerationRequest::new("hi", "sys").with_options(GenerationOptions {
        temperature: Some(0.9),
        ..Default::default()
    });
    orch.generate(request).await.unwrap();

    let seen = a.last_options();
    assert_eq!(seen.temperature, Some(0.9), "caller value wins");
    assert_eq!(seen.max_output_units, Some(512));
}

// ---------------------------------------------------------------------------
// Cancellation.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_before_dispatch_never_calls_backend() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok));
    let orch = orchestrator("a", &[&a], fast_policy());
    let token = CancellationToken::new();
    token.cancel();

    let err = orch
        .generate_with(
            GenerationRequest::new("hi", "sys"),
            &CallContext::default().with_cancel(token),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Cancelled));
    assert_eq!(a.calls(), 0);
}

#[tokio::test]
async fn cancel_during_backoff_returns_promptly() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::RateLimit));
    let b = Arc::new(ScriptedBackend::new("b", Outcome::Ok));
    let policy = CascadePolicy {
        sticky_backoff_step: Duration::from_secs(30),
        ..fast_policy()
    };
    let orch = orchestrator("a", &[&a, &b], policy);
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = orch
        .generate_with(
            GenerationRequest::new("hi", "sys"),
            &CallContext::default().with_cancel(token),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn cancel_in_flight_abandons_the_call() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Hang));
    let orch = orchestrator("a", &[&a], fast_policy());
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = orch
        .generate_with(
            GenerationRequest::new("hi", "sys"),
            &CallContext::default().with_cancel(token),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(
        orch.admission()
            .in_flight(cascade::admission::Lane::Fast),
        0
    );
}

// ---------------------------------------------------------------------------
// Structured output.
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_json_repairs_and_forces_json_mode() {
    let a = Arc::new(
        ScriptedBackend::new("a", Outcome::Ok)
            .reply("Here you go:\n```json\n{\"answer\": 42, \"tags\": ['x',],}\n```"),
    );
    let orch = orchestrator("a", &[&a], fast_policy());

    let structured = orch
        .generate_json::<serde_json::Value>(
            GenerationRequest::new("give json", "sys"),
            &CallContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(structured.value["answer"], 42);
    assert_eq!(structured.value["tags"][0], "x");
    assert_eq!(structured.result.backend, "a");

    let seen = a.last_options();
    assert!(seen.json_mode);
    assert_eq!(seen.max_output_units, Some(16_384));
    assert_eq!(seen.intelligence, Some(IntelligenceClass::Reasoning));
}

#[tokio::test]
async fn generate_json_without_payload_fails_cleanly() {
    let a = Arc::new(ScriptedBackend::new("a", Outcome::Ok).reply("I cannot help with that"));
    let orch = orchestrator("a", &[&a], fast_policy());

    let err = orch
        .generate_json::<serde_json::Value>(
            GenerationRequest::new("give json", "sys"),
            &CallContext::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CascadeError::StructuredOutput(_)), "got {err:?}");
}
