//! Global + per-client counters and a latency histogram with a Prometheus
//! text exporter. Counters and the histogram are individually monotonic;
//! snapshots may observe different counters at slightly different instants
//! (eventual consistency across a snapshot is acceptable).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Upper bounds in ms, inclusive; the last bucket is open (catches overflow).
pub const HISTOGRAM_BUCKETS_MS: [u64; 5] = [5, 10, 25, 50, 100];

struct Histogram {
    buckets: [AtomicU64; HISTOGRAM_BUCKETS_MS.len() + 1],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    fn observe(&self, sample_ms: u64) {
        let idx = HISTOGRAM_BUCKETS_MS
            .iter()
            .position(|&bound| sample_ms <= bound)
            .unwrap_or(HISTOGRAM_BUCKETS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(sample_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect(),
            sum_ms: self.sum_ms.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// One entry per bound in `HISTOGRAM_BUCKETS_MS`, plus one open bucket.
    pub buckets: Vec<u64>,
    pub sum_ms: u64,
    pub count: u64,
}

#[derive(Default)]
struct Counters {
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    fallback_hits: AtomicU64,
    retry_attempts: AtomicU64,
    histogram: Histogram,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CountersSnapshot {
    pub requests_total: u64,
    pub errors_total: u64,
    pub fallback_hits: u64,
    pub retry_attempts: u64,
    pub avg_latency_ms: f64,
    pub histogram: Vec<u64>,
}

/// Process-wide metrics registry, initialized once at startup.
#[derive(Default)]
pub struct MetricsRegistry {
    global: Counters,
    per_client: Mutex<HashMap<String, Counters>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, client_hash: &str, latency_ms: u64, is_error: bool) {
        self.global.requests_total.fetch_add(1, Ordering::Relaxed);
        self.global.histogram.observe(latency_ms);
        if is_error {
            self.global.errors_total.fetch_add(1, Ordering::Relaxed);
        }

        let mut per_client = self.per_client.lock().unwrap();
        let counters = per_client.entry(client_hash.to_string()).or_default();
        counters.requests_total.fetch_add(1, Ordering::Relaxed);
        counters.histogram.observe(latency_ms);
        if is_error {
            counters.errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_fallback_hit(&self) {
        self.global.fallback_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_attempt(&self) {
        self.global.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_global(&self) -> CountersSnapshot {
        snapshot_of(&self.global)
    }

    pub fn snapshot_client(&self, client_hash: &str) -> Option<CountersSnapshot> {
        let per_client = self.per_client.lock().unwrap();
        per_client.get(client_hash).map(snapshot_of)
    }

    /// Line-oriented `name{labels} value` format with cumulative histogram
    /// buckets, `text/plain` Prometheus exposition style.
    pub fn export_prometheus(&self) -> String {
        let global = self.snapshot_global();
        let mut out = String::new();
        out.push_str(&format!("circuit_requests_total {}\n", global.requests_total));
        out.push_str(&format!("circuit_errors_total {}\n", global.errors_total));
        out.push_str(&format!("circuit_fallback_hits_total {}\n", global.fallback_hits));
        out.push_str(&format!("circuit_retry_attempts_total {}\n", global.retry_attempts));

        let mut cumulative = 0u64;
        for (i, bound) in HISTOGRAM_BUCKETS_MS.iter().enumerate() {
            cumulative += global.histogram[i];
            out.push_str(&format!(
                "circuit_latency_ms_bucket{{le=\"{}\"}} {}\n",
                bound, cumulative
            ));
        }
        cumulative += global.histogram[HISTOGRAM_BUCKETS_MS.len()];
        out.push_str(&format!("circuit_latency_ms_bucket{{le=\"+Inf\"}} {}\n", cumulative));
        out
    }
}

fn snapshot_of(counters: &Counters) -> CountersSnapshot {
    let histogram = counters.histogram.snapshot();
    let avg_latency_ms = if histogram.count > 0 {
        histogram.sum_ms as f64 / histogram.count as f64
    } else {
        0.0
    };
    CountersSnapshot {
        requests_total: counters.requests_total.load(Ordering::Relaxed),
        errors_total: counters.errors_total.load(Ordering::Relaxed),
        fallback_hits: counters.fallback_hits.load(Ordering::Relaxed),
        retry_attempts: counters.retry_attempts.load(Ordering::Relaxed),
        avg_latency_ms,
        histogram: histogram.buckets,
    }
}
