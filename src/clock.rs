//! Time sources for every time-dependent component (bucket, breaker, retry, session).
//!
//! Production code uses [`SystemClock`]; tests use [`ManualClock`] so that
//! refill math, breaker cooldowns, and retry backoff are deterministic.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Monotonic millis for interval math, plus a wall-clock UTC view for
/// calendar-day bucketing (quota ledger day boundaries).
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
    fn now_utc(&self) -> DateTime<Utc>;

    fn today_utc(&self) -> NaiveDate {
        self.now_utc().date_naive()
    }
}

#[derive(Clone)]
pub struct SystemClock {
    started_at: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock driven explicitly by tests. `advance_millis` moves both the
/// monotonic and wall-clock views together so day-boundary tests stay
/// consistent with backoff/cooldown tests on the same clock.
#[derive(Clone)]
pub struct ManualClock {
    millis: Arc<Mutex<u64>>,
    wall: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start_wall: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(Mutex::new(0)),
            wall: Arc::new(Mutex::new(start_wall)),
        }
    }

    pub fn advance_millis(&self, delta: u64) {
        *self.millis.lock().unwrap() += delta;
        let mut wall = self.wall.lock().unwrap();
        *wall += chrono::Duration::milliseconds(delta as i64);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        *self.millis.lock().unwrap()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.wall.lock().unwrap()
    }
}

pub fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_monotonic_and_wall_together() {
        let start = "2024-01-01T00:00:00Z".parse().unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now_millis(), 0);
        clock.advance_millis(1_500);
        assert_eq!(clock.now_millis(), 1_500);
        assert_eq!(clock.now_utc(), start + chrono::Duration::milliseconds(1_500));
    }

    #[test]
    fn today_utc_rolls_over_at_midnight() {
        let start = "2024-01-01T23:59:59Z".parse().unwrap();
        let clock = ManualClock::new(start);
        let day_one = clock.today_utc();
        clock.advance_millis(2_000);
        assert_ne!(clock.today_utc(), day_one);
    }
}
