//! Dedup Phase Metrics
//!
//! Fingerprint grouping and history store activity.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct DedupMetrics;

impl DedupMetrics {
    pub fn record_stage(
        groups: usize,
        same_run_merges: usize,
        previously_seen: usize,
        history_failures: usize,
        duration_secs: f64,
    ) {
        ::metrics::counter!(phase_metric!(counter, "dedup", "groups")).increment(groups as u64);
        ::metrics::counter!(phase_metric!(counter, "dedup", "same_run_merges"))
            .increment(same_run_merges as u64);
        ::metrics::counter!(phase_metric!(counter, "dedup", "previously_seen"))
            .increment(previously_seen as u64);
        ::metrics::counter!(phase_metric!(counter, "dedup", "history_failures"))
            .increment(history_failures as u64);
        ::metrics::histogram!(phase_metric!(histogram, "dedup", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn set_history_size(entries: u64) {
        ::metrics::gauge!(phase_metric!(gauge, "dedup", "history_size")).set(entries as f64);
    }
}

impl PhaseMetrics for DedupMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "dedup", "groups"));
        let _ = counter!(phase_metric!(counter, "dedup", "same_run_merges"));
        let _ = counter!(phase_metric!(counter, "dedup", "previously_seen"));
        let _ = counter!(phase_metric!(counter, "dedup", "history_failures"));
        let _ = gauge!(phase_metric!(gauge, "dedup", "history_size"));
        let _ = histogram!(phase_metric!(histogram, "dedup", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "dedup"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "dedup", "groups"),
                metric_type: MetricType::Counter,
                help: "Distinct fingerprints seen in a run",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "dedup", "same_run_merges"),
                metric_type: MetricType::Counter,
                help: "Leads folded into an earlier lead of the same run",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "dedup", "previously_seen"),
                metric_type: MetricType::Counter,
                help: "Fingerprints already present in history",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "dedup", "history_failures"),
                metric_type: MetricType::Counter,
                help: "Groups dropped because the history store failed",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(gauge, "dedup", "history_size"),
                metric_type: MetricType::Gauge,
                help: "Fingerprints in the history ledger after the run",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "dedup", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of the dedup stage",
                labels: vec![],
            },
        ]
    }
}
