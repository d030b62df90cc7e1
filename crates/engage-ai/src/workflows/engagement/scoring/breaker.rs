use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Breaker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub const fn label(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Thresholds and timing for one model's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures (since the last success) that open the breaker.
    pub failure_threshold: u32,
    /// Successes required in half-open state before closing again.
    pub success_threshold: u32,
    /// How long an open breaker rejects calls before allowing a probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Fast-fail error returned while the breaker is open.
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker for model '{model_id}' is open; retry in {retry_after:?}")]
pub struct BreakerOpenError {
    pub model_id: String,
    pub retry_after: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
    last_transition_at: Instant,
}

/// Per-model failure-rate protection.
///
/// One instance per model, shared by every concurrent scoring task for that
/// model; constructed once with the scorer and only reset through the
/// administrative [`CircuitBreaker::reset`].
pub struct CircuitBreaker {
    model_id: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(model_id: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            model_id: model_id.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure_at: None,
                last_transition_at: Instant::now(),
            }),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Gate a call. Open breakers reject until the reset timeout elapses, at
    /// which point the next caller moves the breaker to half-open and probes.
    pub fn try_acquire(&self) -> Result<(), BreakerOpenError> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");

        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let since_transition = inner.last_transition_at.elapsed();
                if since_transition >= self.config.reset_timeout {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    Ok(())
                } else {
                    Err(BreakerOpenError {
                        model_id: self.model_id.clone(),
                        retry_after: self.config.reset_timeout - since_transition,
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");

        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => self.transition(&mut inner, BreakerState::Open),
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    /// When the wrapped model last failed, if it ever has.
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.inner
            .lock()
            .expect("breaker mutex poisoned")
            .last_failure_at
    }

    /// Administrative reset to closed with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.transition(&mut inner, BreakerState::Closed);
    }

    fn transition(&self, inner: &mut BreakerInner, next: BreakerState) {
        debug!(
            model_id = %self.model_id,
            from = inner.state.label(),
            to = next.label(),
            "circuit breaker transition"
        );
        inner.state = next;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.last_transition_at = Instant::now();
    }
}
