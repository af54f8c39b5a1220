//! Request admission: a concurrency-bounded load shedder with priority
//! bypass and adaptive latency tracking, plus a failure-gated circuit
//! breaker guarding the ingest path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const LATENCY_WINDOW: usize = 100;
const MIN_QUEUE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct ShedderConfig {
    pub enabled: bool,
    pub max_concurrent: usize,
    pub queue_size: usize,
    pub queue_timeout: Duration,
    pub retry_after_seconds: u64,
    /// Setting a target enables adaptive mode: when the moving average of
    /// request latency exceeds 1.5x the target, queued requests evict
    /// faster.
    pub target_latency: Option<Duration>,
    pub priority_endpoints: Vec<String>,
}

impl Default for ShedderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 64,
            queue_size: 128,
            queue_timeout: Duration::from_secs(2),
            retry_after_seconds: 5,
            target_latency: None,
            priority_endpoints: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

/// Outcome of one admission decision.
pub enum Admission {
    /// Priority endpoint or disabled shedder: admitted without accounting.
    Bypass,
    /// Admitted; the permit returns the slot on drop.
    Admitted(OwnedSemaphorePermit),
    Shed,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ShedStats {
    pub in_flight: usize,
    pub queue_length: usize,
    pub total_shed: u64,
    pub last_shed_time: Option<DateTime<Utc>>,
    pub enabled: bool,
}

pub struct LoadShedder {
    config: ShedderConfig,
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    total_shed: AtomicU64,
    last_shed_unix_ms: AtomicI64,
    latencies: Mutex<VecDeque<Duration>>,
}

impl LoadShedder {
    pub fn new(config: ShedderConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: AtomicUsize::new(0),
            total_shed: AtomicU64::new(0),
            last_shed_unix_ms: AtomicI64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            config,
        }
    }

    pub fn retry_after_seconds(&self) -> u64 {
        self.config.retry_after_seconds
    }

    /// Admit, queue, or shed one request.
    pub async fn admit(&self, path: &str) -> Admission {
        if !self.config.enabled || self.is_priority(path) {
            return Admission::Bypass;
        }

        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Admission::Admitted(permit);
        }

        // No free slot: take a bounded queue position and wait for one.
        if self.queued.fetch_add(1, Ordering::AcqRel) >= self.config.queue_size {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return self.shed();
        }
        metrics::gauge!("ckbd_admission_queue_depth").increment(1.0);

        let waited = tokio::time::timeout(
            self.current_queue_timeout(),
            self.semaphore.clone().acquire_owned(),
        )
        .await;

        self.queued.fetch_sub(1, Ordering::AcqRel);
        metrics::gauge!("ckbd_admission_queue_depth").decrement(1.0);

        match waited {
            Ok(Ok(permit)) => Admission::Admitted(permit),
            // Closed semaphores don't happen here; treat like a timeout.
            Ok(Err(_)) | Err(_) => self.shed(),
        }
    }

    fn shed(&self) -> Admission {
        self.total_shed.fetch_add(1, Ordering::AcqRel);
        self.last_shed_unix_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        metrics::counter!("ckbd_requests_shed_total").increment(1);
        Admission::Shed
    }

    fn is_priority(&self, path: &str) -> bool {
        self.config
            .priority_endpoints
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Record the latency of a completed, admitted request.
    pub fn record_latency(&self, latency: Duration) {
        let mut window = self.latencies.lock().unwrap();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency);
    }

    /// Adaptive mode: shed-biased once the moving average exceeds 1.5x the
    /// target latency.
    pub fn should_shed(&self) -> bool {
        let Some(target) = self.config.target_latency else {
            return false;
        };
        let window = self.latencies.lock().unwrap();
        if window.is_empty() {
            return false;
        }
        let total: Duration = window.iter().sum();
        let average = total / window.len() as u32;
        average.as_secs_f64() > target.as_secs_f64() * 1.5
    }

    fn current_queue_timeout(&self) -> Duration {
        if self.should_shed() {
            (self.config.queue_timeout / 2).max(MIN_QUEUE_TIMEOUT)
        } else {
            self.config.queue_timeout
        }
    }

    pub fn stats(&self) -> ShedStats {
        let last_shed_ms = self.last_shed_unix_ms.load(Ordering::Acquire);
        ShedStats {
            in_flight: self
                .config
                .max_concurrent
                .saturating_sub(self.semaphore.available_permits()),
            queue_length: self.queued.load(Ordering::Acquire),
            total_shed: self.total_shed.load(Ordering::Acquire),
            last_shed_time: (last_shed_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_shed_ms))
                .flatten(),
            enabled: self.config.enabled,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    last_state_change: Instant,
}

/// A failure-counting gate over a downstream dependency. `Closed` admits
/// everything; `failure_threshold` consecutive failures open it; after
/// `timeout` a single probe is admitted half-open, and `success_threshold`
/// consecutive successes close it again.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
                last_state_change: Instant::now(),
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() > self.config.timeout)
                    .unwrap_or(true);
                if elapsed {
                    transition(&mut inner, BreakerState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.consecutive_failures = 0;
                    transition(&mut inner, BreakerState::Closed);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => transition(&mut inner, BreakerState::Open),
            BreakerState::Open => {}
        }
    }
}

fn transition(inner: &mut BreakerInner, to: BreakerState) {
    tracing::info!(from = ?inner.state, ?to, "circuit breaker state change");
    inner.state = to;
    inner.last_state_change = Instant::now();
    inner.consecutive_successes = 0;
    metrics::gauge!("ckbd_breaker_state").set(match to {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    });
}
