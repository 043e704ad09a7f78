// Process metrics
//
// Counters, gauges and latency histograms for:
// - Probe outcomes (run, positive, failed, timed out) and skipped groups
// - Fast verdict and diagnostic report latency
// - Violation events by category, observations and terminations
// - Object detector degradation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::Category;

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // saturate at zero
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram bucket for latency tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency/duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for probe latency: a few ms up to several tool timeouts
    pub fn new_latency() -> Self {
        let buckets = [
            0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]
        .into_iter()
        .map(|le| HistogramBucket {
            le,
            count: AtomicU64::new(0),
        })
        .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, name: &str, help: &str, output: &mut String) {
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));
        for bucket in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            name,
            self.get_count()
        ));
        output.push_str(&format!(
            "{}_sum {}\n",
            name,
            self.get_sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!("{}_count {}\n", name, self.get_count()));
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Probe outcomes
    pub probes_run: Counter,
    pub probes_positive: Counter,
    pub probes_failed: Counter,
    pub probes_timed_out: Counter,
    pub probe_groups_skipped: Counter,

    // Verdicts
    pub fast_verdicts: Counter,
    pub fast_verdicts_compromised: Counter,
    pub diagnostic_reports: Counter,

    // Violation scoring, indexed by Category::ALL position
    events_by_category: Vec<Counter>,
    pub observations_processed: Counter,
    pub observations_rejected: Counter,
    pub sessions_terminated: Counter,
    pub active_sessions: Gauge,

    // Degradation
    pub detector_unavailable: Counter,
    pub store_failures: Counter,

    // Latency histograms
    pub fast_verdict_latency: Histogram,
    pub diagnostic_latency: Histogram,
    pub detector_latency: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            probes_run: Counter::new(),
            probes_positive: Counter::new(),
            probes_failed: Counter::new(),
            probes_timed_out: Counter::new(),
            probe_groups_skipped: Counter::new(),

            fast_verdicts: Counter::new(),
            fast_verdicts_compromised: Counter::new(),
            diagnostic_reports: Counter::new(),

            events_by_category: Category::ALL.iter().map(|_| Counter::new()).collect(),
            observations_processed: Counter::new(),
            observations_rejected: Counter::new(),
            sessions_terminated: Counter::new(),
            active_sessions: Gauge::new(),

            detector_unavailable: Counter::new(),
            store_failures: Counter::new(),

            fast_verdict_latency: Histogram::new_latency(),
            diagnostic_latency: Histogram::new_latency(),
            detector_latency: Histogram::new_latency(),
        }
    }

    /// Record one appended violation event
    pub fn record_event(&self, category: Category) {
        if let Some(counter) = Category::ALL
            .iter()
            .position(|c| *c == category)
            .and_then(|i| self.events_by_category.get(i))
        {
            counter.inc();
        }
    }

    pub fn events_for(&self, category: Category) -> u64 {
        Category::ALL
            .iter()
            .position(|c| *c == category)
            .and_then(|i| self.events_by_category.get(i))
            .map(Counter::get)
            .unwrap_or(0)
    }

    /// Record a finished fast verdict
    pub fn record_fast_verdict(&self, compromised: bool, skipped_groups: usize, elapsed: Duration) {
        self.fast_verdicts.inc();
        if compromised {
            self.fast_verdicts_compromised.inc();
        }
        self.probe_groups_skipped.add(skipped_groups as u64);
        self.fast_verdict_latency.observe(elapsed);
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP examguard_probes_total Probe evaluations by outcome\n");
        output.push_str("# TYPE examguard_probes_total counter\n");
        for (outcome, counter) in [
            ("run", &self.probes_run),
            ("positive", &self.probes_positive),
            ("failed", &self.probes_failed),
            ("timeout", &self.probes_timed_out),
        ] {
            output.push_str(&format!(
                "examguard_probes_total{{outcome=\"{}\"}} {}\n",
                outcome,
                counter.get()
            ));
        }

        output.push_str("# HELP examguard_probe_groups_skipped_total Groups cancelled before starting\n");
        output.push_str("# TYPE examguard_probe_groups_skipped_total counter\n");
        output.push_str(&format!(
            "examguard_probe_groups_skipped_total {}\n",
            self.probe_groups_skipped.get()
        ));

        output.push_str("# HELP examguard_fast_verdicts_total Fast verdicts by result\n");
        output.push_str("# TYPE examguard_fast_verdicts_total counter\n");
        output.push_str(&format!(
            "examguard_fast_verdicts_total{{result=\"compromised\"}} {}\n",
            self.fast_verdicts_compromised.get()
        ));
        output.push_str(&format!(
            "examguard_fast_verdicts_total{{result=\"clean\"}} {}\n",
            self.fast_verdicts
                .get()
                .saturating_sub(self.fast_verdicts_compromised.get())
        ));

        output.push_str("# HELP examguard_diagnostic_reports_total Exhaustive reports produced\n");
        output.push_str("# TYPE examguard_diagnostic_reports_total counter\n");
        output.push_str(&format!(
            "examguard_diagnostic_reports_total {}\n",
            self.diagnostic_reports.get()
        ));

        output.push_str("# HELP examguard_violation_events_total Appended violation events by category\n");
        output.push_str("# TYPE examguard_violation_events_total counter\n");
        for category in Category::ALL {
            output.push_str(&format!(
                "examguard_violation_events_total{{category=\"{}\"}} {}\n",
                category.as_str(),
                self.events_for(*category)
            ));
        }

        output.push_str("# HELP examguard_observations_total Observations by outcome\n");
        output.push_str("# TYPE examguard_observations_total counter\n");
        output.push_str(&format!(
            "examguard_observations_total{{outcome=\"processed\"}} {}\n",
            self.observations_processed.get()
        ));
        output.push_str(&format!(
            "examguard_observations_total{{outcome=\"rejected\"}} {}\n",
            self.observations_rejected.get()
        ));

        output.push_str("# HELP examguard_sessions_terminated_total Sessions that crossed the threshold\n");
        output.push_str("# TYPE examguard_sessions_terminated_total counter\n");
        output.push_str(&format!(
            "examguard_sessions_terminated_total {}\n",
            self.sessions_terminated.get()
        ));

        output.push_str("# HELP examguard_active_sessions Sessions with an open ledger\n");
        output.push_str("# TYPE examguard_active_sessions gauge\n");
        output.push_str(&format!(
            "examguard_active_sessions {}\n",
            self.active_sessions.get()
        ));

        output.push_str("# HELP examguard_degraded_total Degraded operations by cause\n");
        output.push_str("# TYPE examguard_degraded_total counter\n");
        output.push_str(&format!(
            "examguard_degraded_total{{cause=\"detector\"}} {}\n",
            self.detector_unavailable.get()
        ));
        output.push_str(&format!(
            "examguard_degraded_total{{cause=\"store\"}} {}\n",
            self.store_failures.get()
        ));

        self.fast_verdict_latency.export(
            "examguard_fast_verdict_seconds",
            "Fast verdict latency",
            &mut output,
        );
        self.diagnostic_latency.export(
            "examguard_diagnostic_report_seconds",
            "Exhaustive report latency",
            &mut output,
        );
        self.detector_latency.export(
            "examguard_detector_seconds",
            "Object detector call latency",
            &mut output,
        );

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_gauge_saturates_at_zero() {
        let gauge = Gauge::new();
        gauge.dec();
        assert_eq!(gauge.get(), 0);

        gauge.set(2);
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 2);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new_latency();

        histogram.observe(Duration::from_millis(3));
        histogram.observe(Duration::from_millis(200));
        histogram.observe(Duration::from_secs(3));

        assert_eq!(histogram.get_count(), 3);
        assert_eq!(histogram.get_bucket_count(0.005), 1);
        assert_eq!(histogram.get_bucket_count(0.25), 2);
        assert_eq!(histogram.get_bucket_count(5.0), 3);
    }

    #[test]
    fn test_events_by_category() {
        let metrics = MetricsRegistry::new();

        metrics.record_event(Category::Phone);
        metrics.record_event(Category::Phone);
        metrics.record_event(Category::Window);

        assert_eq!(metrics.events_for(Category::Phone), 2);
        assert_eq!(metrics.events_for(Category::Window), 1);
        assert_eq!(metrics.events_for(Category::NoFace), 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();

        metrics.record_fast_verdict(true, 1, Duration::from_millis(40));
        metrics.record_fast_verdict(false, 0, Duration::from_millis(900));
        metrics.record_event(Category::Audio);

        let output = metrics.export_prometheus();

        assert!(output.contains("examguard_fast_verdicts_total{result=\"compromised\"} 1"));
        assert!(output.contains("examguard_fast_verdicts_total{result=\"clean\"} 1"));
        assert!(output.contains("examguard_probe_groups_skipped_total 1"));
        assert!(output.contains("examguard_violation_events_total{category=\"audio\"} 1"));
        assert!(output.contains("examguard_fast_verdict_seconds_count 2"));
    }

    #[test]
    fn test_global_metrics() {
        let metrics1 = get_metrics();
        let metrics2 = get_metrics();
        assert!(Arc::ptr_eq(&metrics1, &metrics2));
    }
}
