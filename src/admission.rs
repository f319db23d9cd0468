//! Process-wide admission control for backend calls.
//!
//! Two lanes ("fast" and "heavy") each bound the number of outstanding calls
//! and enforce a minimum gap between successive dispatch *starts*. The gap is
//! adaptive: any `signal_rate_limit()` switches every lane to the throttled
//! gap until a cooldown passes, after which the next scheduling attempt
//! reverts to the lane's base gap.
//!
//! Starts within a lane are totally ordered: the lane's dispatch clock is a
//! FIFO async mutex held across the spacing wait, so a waiter that arrives
//! later can never start before one that arrived earlier.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::IntelligenceClass;
use crate::error::CascadeError;

/// Receives the remaining spacing wait, at least once per second while waiting.
pub type WaitProgress = Arc<dyn Fn(Duration) + Send + Sync>;

/// Longest interval between two progress reports.
const PROGRESS_TICK: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    Fast,
    Heavy,
}

impl From<IntelligenceClass> for Lane {
    fn from(class: IntelligenceClass) -> Self {
        match class {
            IntelligenceClass::Fast => Lane::Fast,
            IntelligenceClass::Reasoning => Lane::Heavy,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AdmissionConfig {
    /// Simultaneous calls per lane.
    pub max_concurrent: usize,
    /// 15 RPM.
    pub fast_base_gap: Duration,
    /// 10 RPM.
    pub heavy_base_gap: Duration,
    /// Gap applied to every lane after a rate-limit signal.
    pub throttled_gap: Duration,
    /// How long the throttled gap holds after the latest signal.
    pub cooldown: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            fast_base_gap: Duration::from_millis(4_000),
            heavy_base_gap: Duration::from_millis(6_000),
            throttled_gap: Duration::from_millis(15_000),
            cooldown: Duration::from_secs(300),
        }
    }
}

struct LaneState {
    slots: Semaphore,
    /// Start time of the most recent dispatch.
    last_dispatch: tokio::sync::Mutex<Option<Instant>>,
    base_gap: Duration,
}

impl LaneState {
    fn new(max_concurrent: usize, base_gap: Duration) -> Self {
        Self {
            slots: Semaphore::new(max_concurrent),
            last_dispatch: tokio::sync::Mutex::new(None),
            base_gap,
        }
    }
}

pub struct AdmissionController {
    fast: LaneState,
    heavy: LaneState,
    max_concurrent: usize,
    throttled_gap: Duration,
    cooldown: Duration,
    /// Set by `signal_rate_limit`; cleared lazily once passed.
    throttled_until: Mutex<Option<Instant>>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            fast: LaneState::new(max_concurrent, config.fast_base_gap),
            heavy: LaneState::new(max_concurrent, config.heavy_base_gap),
            max_concurrent,
            throttled_gap: config.throttled_gap,
            cooldown: config.cooldown,
            throttled_until: Mutex::new(None),
        }
    }

    fn lane(&self, lane: Lane) -> &LaneState {
        match lane {
            Lane::Fast => &self.fast,
            Lane::Heavy => &self.heavy,
        }
    }

    /// Throttle every lane. Called from anywhere a backend reports a rate limit.
    pub fn signal_rate_limit(&self) {
        let until = Instant::now() + self.cooldown;
        if let Ok(mut guard) = self.throttled_until.lock() {
            *guard = Some(until);
        }
        tracing::warn!(
            gap_ms = self.throttled_gap.as_millis() as u64,
            cooldown_secs = self.cooldown.as_secs(),
            "rate limit signalled, admission throttled"
        );
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled_until
            .lock()
            .map(|g| g.is_some_and(|until| Instant::now() < until))
            .unwrap_or(false)
    }

    /// The gap the lane's next dispatch must respect. Does not mutate state.
    pub fn current_gap(&self, lane: Lane) -> Duration {
        let base = self.lane(lane).base_gap;
        if self.is_throttled() {
            self.throttled_gap.max(base)
        } else {
            base
        }
    }

    /// Like `current_gap`, but reverts an expired throttle.
    fn effective_gap(&self, lane: Lane) -> Duration {
        let base = self.lane(lane).base_gap;
        let Ok(mut guard) = self.throttled_until.lock() else {
            return base;
        };
        match *guard {
            Some(until) if Instant::now() < until => self.throttled_gap.max(base),
            Some(_) => {
                *guard = None;
                tracing::info!("admission cooldown elapsed, gap back to base");
                base
            }
            None => base,
        }
    }

    /// Calls currently holding a slot in `lane`.
    pub fn in_flight(&self, lane: Lane) -> usize {
        self.max_concurrent - self.lane(lane).slots.available_permits()
    }

    /// Run `call` once a slot in `lane` is free and the spacing gap since the
    /// previous dispatch start has elapsed.
    ///
    /// Cancellation while queued means the call never dispatches; while in
    /// flight it drops the call future and frees the slot immediately.
    pub async fn schedule<F, T>(
        &self,
        lane: Lane,
        cancel: Option<&CancellationToken>,
        progress: Option<&WaitProgress>,
        call: F,
    ) -> Result<T, CascadeError>
    where
        F: Future<Output = Result<T, CascadeError>>,
    {
        let state = self.lane(lane);

        let _permit = cancellable(cancel, state.slots.acquire())
            .await?
            .map_err(|_| CascadeError::Configuration("admission lane closed".to_string()))?;

        {
            let mut last = cancellable(cancel, state.last_dispatch.lock()).await?;
            if let Some(prev) = *last {
                loop {
                    // Re-read every tick: a rate-limit signal mid-wait widens the gap.
                    let ready_at = prev + self.effective_gap(lane);
                    let now = Instant::now();
                    if now >= ready_at {
                        break;
                    }
                    let remaining = ready_at - now;
                    if let Some(report) = progress {
                        report(remaining);
                    }
                    cancellable(cancel, tokio::time::sleep(remaining.min(PROGRESS_TICK))).await?;
                }
            } else {
                // First dispatch in this lane still settles an expired throttle.
                self.effective_gap(lane);
            }
            *last = Some(Instant::now());
        }

        tracing::debug!(lane = ?lane, in_flight = self.in_flight(lane), "dispatching");
        cancellable(cancel, call).await?
    }
}

/// Await `fut`, or fail with `Cancelled` as soon as `cancel` fires.
pub(crate) async fn cancellable<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Result<F::Output, CascadeError> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(CascadeError::Cancelled),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}
