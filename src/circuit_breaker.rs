//! Three-state circuit breaker over the primary provider, built on the same
//! lock-free atomics pattern used elsewhere in this crate: state lives in a
//! handful of atomics and transitions race via compare-exchange loops rather
//! than a mutex.
//!
//! The breaker exposes `allow_request`/`record_success`/`record_failure`
//! directly instead of wrapping an operation closure: the pipeline consults
//! it *before* dispatch on the streaming path and *after* dispatch on the
//! buffered path, and fallback calls never touch it at all.

use crate::clock::{Clock, SystemClock};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_in_flight: AtomicU8,
}

/// Process-wide breaker for a single primary provider.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(STATE_CLOSED),
                consecutive_failures: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
                half_open_in_flight: AtomicU8::new(0),
            }),
            config,
            clock,
        }
    }

    /// `Closed` ⇒ true. `Open` ⇒ if cooldown elapsed, flip to `HalfOpen` and
    /// allow exactly the caller that won the race; else false. `HalfOpen` ⇒
    /// allow iff no probe is currently in flight.
    pub fn allow_request(&self) -> bool {
        loop {
            match self.inner.state.load(Ordering::Acquire) {
                STATE_CLOSED => return true,
                STATE_OPEN => {
                    let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                    if elapsed < self.config.cooldown.as_millis() as u64 {
                        return false;
                    }
                    match self.inner.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.inner.half_open_in_flight.store(1, Ordering::Release);
                            tracing::info!("circuit breaker: open -> half_open, probe admitted");
                            return true;
                        }
                        Err(_) => continue,
                    }
                }
                STATE_HALF_OPEN => {
                    return self
                        .inner
                        .half_open_in_flight
                        .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                }
                _ => unreachable!("invalid circuit breaker state"),
            }
        }
    }

    pub fn record_success(&self) {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                self.inner.consecutive_failures.store(0, Ordering::Release);
                self.inner.half_open_in_flight.store(0, Ordering::Release);
                self.inner.state.store(STATE_CLOSED, Ordering::Release);
                tracing::info!("circuit breaker: half_open -> closed");
            }
            STATE_CLOSED => {
                self.inner.consecutive_failures.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    pub fn record_failure(&self) {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                self.inner.half_open_in_flight.store(0, Ordering::Release);
                self.inner
                    .opened_at_millis
                    .store(self.clock.now_millis(), Ordering::Release);
                self.inner.state.store(STATE_OPEN, Ordering::Release);
                tracing::warn!("circuit breaker: half_open -> open (probe failed)");
            }
            STATE_CLOSED => {
                let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.inner
                        .opened_at_millis
                        .store(self.clock.now_millis(), Ordering::Release);
                    self.inner.state.store(STATE_OPEN, Ordering::Release);
                    tracing::warn!(failures, "circuit breaker: closed -> open");
                }
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state"),
        }
    }

    pub fn consecutive_failures(&self) -> usize {
        self.inner.consecutive_failures.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn clock() -> crate::clock::ManualClock {
        crate::clock::ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap())
    }

    #[test]
    fn closed_allows_and_resets_on_success() {
        let clock = clock();
        let cb = CircuitBreaker::with_clock(
            CircuitBreakerConfig { failure_threshold: 3, cooldown: Duration::from_secs(1) },
            Arc::new(clock),
        );
        assert!(cb.allow_request());
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn trips_after_threshold_and_blocks_until_cooldown() {
        let clock = clock();
        let cb = CircuitBreaker::with_clock(
            CircuitBreakerConfig { failure_threshold: 3, cooldown: Duration::from_secs(1) },
            Arc::new(clock.clone()),
        );
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());

        clock.advance_millis(1_000);
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_allows_at_most_one_probe() {
        let clock = clock();
        let cb = CircuitBreaker::with_clock(
            CircuitBreakerConfig { failure_threshold: 1, cooldown: Duration::from_millis(100) },
            Arc::new(clock.clone()),
        );
        cb.record_failure();
        clock.advance_millis(100);
        assert!(cb.allow_request());
        assert!(!cb.allow_request());
    }

    #[test]
    fn half_open_failure_retrips_immediately() {
        let clock = clock();
        let cb = CircuitBreaker::with_clock(
            CircuitBreakerConfig { failure_threshold: 1, cooldown: Duration::from_millis(50) },
            Arc::new(clock.clone()),
        );
        cb.record_failure();
        clock.advance_millis(50);
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }
}
