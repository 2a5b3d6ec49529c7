//! Process-global counters, gauges, and histograms for operational
//! visibility. All of it is atomic and lock-free on the hot paths; the two
//! label maps take a short parking_lot lock. None of it affects behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Fixed-bucket histogram. `bounds[i]` is the inclusive upper edge of
/// bucket `i`; one overflow bucket catches the rest.
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: &'static [f64]) -> Self {
        let mut buckets = Vec::with_capacity(bounds.len() + 1);
        for _ in 0..=bounds.len() {
            buckets.push(AtomicU64::new(0));
        }
        Self {
            bounds,
            buckets,
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }
}

/// Millisecond latency edges shared by the duration histograms.
const DURATION_BOUNDS_MS: &[f64] = &[
    10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0,
];

/// Score edges: 0..100 by 10.
const SCORE_BOUNDS: &[f64] = &[
    10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0,
];

pub struct Metrics {
    // --- counters ---
    pub listings_ingested: AtomicU64,
    pub ingestion_errors: AtomicU64,
    pub extraction_failures: AtomicU64,
    pub alerts_fired: AtomicU64,
    pub notification_failures: AtomicU64,
    pub cold_start_scorings: AtomicU64,
    pub warm_baseline_scorings: AtomicU64,
    pub marketplace_api_calls: AtomicU64,
    pub daily_limit_hits: AtomicU64,

    // --- gauges ---
    pub watches_total: AtomicU64,
    pub watches_enabled: AtomicU64,
    pub listings_total: AtomicU64,
    pub listings_unextracted: AtomicU64,
    pub listings_unscored: AtomicU64,
    pub alerts_pending: AtomicU64,
    pub baselines_cold: AtomicU64,
    pub baselines_warm: AtomicU64,
    pub baselines_total: AtomicU64,
    pub product_keys_without_baseline: AtomicU64,
    pub extraction_queue_depth: AtomicU64,
    pub rate_limit: AtomicU64,
    pub rate_remaining: AtomicU64,
    pub rate_reset_ms: AtomicU64,
    pub last_ingestion_success_ms: AtomicU64,
    pub last_baseline_refresh_ms: AtomicU64,
    pub last_notification_success_ms: AtomicU64,
    pub last_notification_failure_ms: AtomicU64,

    // --- histograms ---
    pub ingestion_duration_ms: Histogram,
    pub extraction_duration_ms: Histogram,
    pub score_distribution: Histogram,
    pub notification_duration_ms: Histogram,

    // --- labelled ---
    alerts_fired_by_watch: Mutex<HashMap<String, u64>>,
    incomplete_by_type: Mutex<HashMap<String, u64>>,
    next_run_ms: Mutex<HashMap<&'static str, u64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            listings_ingested: AtomicU64::new(0),
            ingestion_errors: AtomicU64::new(0),
            extraction_failures: AtomicU64::new(0),
            alerts_fired: AtomicU64::new(0),
            notification_failures: AtomicU64::new(0),
            cold_start_scorings: AtomicU64::new(0),
            warm_baseline_scorings: AtomicU64::new(0),
            marketplace_api_calls: AtomicU64::new(0),
            daily_limit_hits: AtomicU64::new(0),

            watches_total: AtomicU64::new(0),
            watches_enabled: AtomicU64::new(0),
            listings_total: AtomicU64::new(0),
            listings_unextracted: AtomicU64::new(0),
            listings_unscored: AtomicU64::new(0),
            alerts_pending: AtomicU64::new(0),
            baselines_cold: AtomicU64::new(0),
            baselines_warm: AtomicU64::new(0),
            baselines_total: AtomicU64::new(0),
            product_keys_without_baseline: AtomicU64::new(0),
            extraction_queue_depth: AtomicU64::new(0),
            rate_limit: AtomicU64::new(0),
            rate_remaining: AtomicU64::new(0),
            rate_reset_ms: AtomicU64::new(0),
            last_ingestion_success_ms: AtomicU64::new(0),
            last_baseline_refresh_ms: AtomicU64::new(0),
            last_notification_success_ms: AtomicU64::new(0),
            last_notification_failure_ms: AtomicU64::new(0),

            ingestion_duration_ms: Histogram::new(DURATION_BOUNDS_MS),
            extraction_duration_ms: Histogram::new(DURATION_BOUNDS_MS),
            score_distribution: Histogram::new(SCORE_BOUNDS),
            notification_duration_ms: Histogram::new(DURATION_BOUNDS_MS),

            alerts_fired_by_watch: Mutex::new(HashMap::new()),
            incomplete_by_type: Mutex::new(HashMap::new()),
            next_run_ms: Mutex::new(HashMap::new()),
        }
    }
}

impl Metrics {
    pub fn inc_alerts_fired(&self, watch_name: &str, n: u64) {
        self.alerts_fired.fetch_add(n, Ordering::Relaxed);
        let mut map = self.alerts_fired_by_watch.lock();
        *map.entry(watch_name.to_string()).or_insert(0) += n;
    }

    pub fn alerts_fired_for(&self, watch_name: &str) -> u64 {
        self.alerts_fired_by_watch
            .lock()
            .get(watch_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_incomplete_by_type(&self, counts: &[(String, u64)]) {
        let mut map = self.incomplete_by_type.lock();
        map.clear();
        for (ct, n) in counts {
            map.insert(ct.clone(), *n);
        }
    }

    pub fn incomplete_for_type(&self, component_type: &str) -> u64 {
        self.incomplete_by_type
            .lock()
            .get(component_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_next_run(&self, job_name: &'static str, at_ms: u64) {
        self.next_run_ms.lock().insert(job_name, at_ms);
    }

    pub fn next_run_for(&self, job_name: &str) -> u64 {
        self.next_run_ms.lock().get(job_name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_by_upper_edge() {
        let h = Histogram::new(SCORE_BOUNDS);
        h.observe(0.0);
        h.observe(10.0);
        h.observe(11.0);
        h.observe(100.0);
        h.observe(250.0); // overflow

        let snap = h.snapshot();
        assert_eq!(snap[0], 2); // 0.0 and 10.0
        assert_eq!(snap[1], 1); // 11.0
        assert_eq!(snap[9], 1); // 100.0
        assert_eq!(snap[10], 1); // overflow
        assert_eq!(h.count(), 5);
    }

    #[test]
    fn per_watch_counter_tracks_global() {
        let m = Metrics::default();
        m.inc_alerts_fired("cheap ram", 2);
        m.inc_alerts_fired("cheap ram", 1);
        m.inc_alerts_fired("epyc deals", 5);

        assert_eq!(m.alerts_fired.load(Ordering::Relaxed), 8);
        assert_eq!(m.alerts_fired_for("cheap ram"), 3);
        assert_eq!(m.alerts_fired_for("epyc deals"), 5);
        assert_eq!(m.alerts_fired_for("nope"), 0);
    }
}
