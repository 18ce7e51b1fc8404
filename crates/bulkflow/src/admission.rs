//! Admission control for in-flight executions
//!
//! A process-wide pair of throttles shared by every subscription: a bounded
//! permit pool capping how many executions are in flight at once, and a
//! token-bucket rate limiter capping how many new executions are issued per
//! second. The rate limiter is consulted strictly before a permit is taken,
//! so it bounds the offered rate of new requests, not merely their
//! concurrency.
//!
//! The controller is an explicit injected resource: construct one per engine
//! and hand it by `Arc` to every subscription. No global state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::debug;

/// Throttle configuration, fixed at controller construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum concurrent in-flight executions (0 = unlimited)
    pub max_in_flight: usize,
    /// Maximum new executions per second (0 = unlimited)
    pub max_per_second: u64,
    /// Extra tokens allowed above the steady rate, absorbing short spikes
    pub burst_capacity: u64,
}

impl AdmissionConfig {
    /// Create a config with a default burst capacity of 10% of the rate
    /// (minimum 10)
    pub fn new(max_in_flight: usize, max_per_second: u64) -> Self {
        let burst_capacity = if max_per_second == 0 {
            0
        } else {
            (max_per_second / 10).max(10)
        };
        Self {
            max_in_flight,
            max_per_second,
            burst_capacity,
        }
    }

    /// No throttling at all
    pub fn unlimited() -> Self {
        Self {
            max_in_flight: 0,
            max_per_second: 0,
            burst_capacity: 0,
        }
    }

    /// Override the burst capacity
    pub fn with_burst(mut self, burst_capacity: u64) -> Self {
        self.burst_capacity = burst_capacity;
        self
    }

    /// Whether a request rate limit is in force
    pub fn is_rate_limited(&self) -> bool {
        self.max_per_second > 0
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Token bucket limiting how many executions may be newly issued per second
///
/// Tokens refill at the configured rate up to `rate + burst`; acquiring
/// suspends the caller until a token is available. Consumption is a CAS
/// loop, so concurrent acquirers never over-consume.
pub(crate) struct RequestRateLimiter {
    tokens: AtomicU64,
    capacity: u64,
    refill_rate: u64,
    last_refill: RwLock<Instant>,
    throttled: AtomicU64,
    total_wait_ns: AtomicU64,
    enabled: bool,
}

impl RequestRateLimiter {
    pub(crate) fn new(config: &AdmissionConfig) -> Self {
        let capacity = if config.is_rate_limited() {
            config.max_per_second + config.burst_capacity
        } else {
            u64::MAX
        };
        Self {
            tokens: AtomicU64::new(capacity),
            capacity,
            refill_rate: config.max_per_second,
            last_refill: RwLock::new(Instant::now()),
            throttled: AtomicU64::new(0),
            total_wait_ns: AtomicU64::new(0),
            enabled: config.is_rate_limited(),
        }
    }

    /// Take one token, suspending until the bucket can supply it. Returns
    /// the time spent waiting.
    pub(crate) async fn acquire(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }

        let start = Instant::now();
        let mut total_wait = Duration::ZERO;

        loop {
            self.refill().await;

            let current = self.tokens.load(Ordering::Acquire);
            if current >= 1 {
                if self
                    .tokens
                    .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    if !total_wait.is_zero() {
                        self.throttled.fetch_add(1, Ordering::Relaxed);
                        self.total_wait_ns
                            .fetch_add(total_wait.as_nanos() as u64, Ordering::Relaxed);
                        debug!(waited = ?total_wait, "rate limiter delayed admission");
                    }
                    return total_wait;
                }
                // CAS lost, retry
                continue;
            }

            // Empty bucket: sleep roughly one token's worth of refill
            let wait = if self.refill_rate > 0 {
                Duration::from_secs_f64((1.0 / self.refill_rate as f64).min(1.0))
            } else {
                Duration::from_millis(10)
            };
            tokio::time::sleep(wait).await;
            total_wait = start.elapsed();
        }
    }

    async fn refill(&self) {
        if self.refill_rate == 0 {
            return;
        }

        let mut last = self.last_refill.write().await;
        let elapsed = last.elapsed();
        if elapsed.as_millis() < 1 {
            return;
        }

        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate as f64) as u64;
        if tokens_to_add > 0 {
            let current = self.tokens.load(Ordering::Relaxed);
            let refilled = current.saturating_add(tokens_to_add).min(self.capacity);
            self.tokens.store(refilled, Ordering::Release);
            *last = Instant::now();
        }
    }

    fn throttled(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }

    fn total_wait_ms(&self) -> u64 {
        self.total_wait_ns.load(Ordering::Relaxed) / 1_000_000
    }
}

/// Point-in-time view of the controller's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Permits acquired since construction
    pub acquired: u64,
    /// Permits released since construction
    pub released: u64,
    /// Executions currently in flight
    pub in_flight: u64,
    /// Highest in-flight count observed
    pub peak_in_flight: u64,
    /// Admissions delayed by the rate limiter
    pub throttled: u64,
    /// Total time admissions spent waiting on the rate limiter
    pub total_throttle_wait_ms: u64,
}

#[derive(Debug, Default)]
struct AtomicAdmissionStats {
    acquired: AtomicU64,
    released: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl AtomicAdmissionStats {
    fn record_acquire(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    fn record_release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        // Saturating decrement so a stray double-release cannot underflow
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Shared concurrency and rate throttles for statement executions
pub struct AdmissionController {
    permits: Arc<Semaphore>,
    rate: RequestRateLimiter,
    stats: Arc<AtomicAdmissionStats>,
    config: AdmissionConfig,
}

impl AdmissionController {
    /// Create a controller with the given limits
    pub fn new(config: AdmissionConfig) -> Self {
        let permits = if config.max_in_flight == 0 {
            Semaphore::MAX_PERMITS
        } else {
            config.max_in_flight
        };
        Self {
            permits: Arc::new(Semaphore::new(permits)),
            rate: RequestRateLimiter::new(&config),
            stats: Arc::new(AtomicAdmissionStats::default()),
            config,
        }
    }

    /// The limits this controller enforces
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Acquire the right to issue one execution
    ///
    /// Suspends on the rate limiter first, then on the permit pool. The
    /// returned permit must be held for the duration of exactly one
    /// asynchronous execution and is released on drop.
    pub async fn admit(&self) -> AdmissionPermit {
        self.rate.acquire().await;
        // acquire_owned only fails if the semaphore is closed, which never
        // happens: the controller owns it and never closes it.
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore closed unexpectedly");
        self.stats.record_acquire();
        AdmissionPermit {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        }
    }

    /// Executions currently in flight
    pub fn in_flight(&self) -> u64 {
        self.stats.in_flight.load(Ordering::Acquire)
    }

    /// Snapshot the controller's counters
    pub fn snapshot(&self) -> AdmissionStats {
        AdmissionStats {
            acquired: self.stats.acquired.load(Ordering::Relaxed),
            released: self.stats.released.load(Ordering::Relaxed),
            in_flight: self.stats.in_flight.load(Ordering::Acquire),
            peak_in_flight: self.stats.peak_in_flight.load(Ordering::Relaxed),
            throttled: self.rate.throttled(),
            total_throttle_wait_ms: self.rate.total_wait_ms(),
        }
    }
}

/// The right to have one execution in flight
///
/// Released exactly once, on drop. Moving the permit into the execution's
/// scope makes leak and double-release impossible by construction.
pub struct AdmissionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    stats: Arc<AtomicAdmissionStats>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.stats.record_release();
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit").finish()
    }
}
