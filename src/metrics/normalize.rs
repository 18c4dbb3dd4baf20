//! Normalize Phase Metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct NormalizeMetrics;

impl NormalizeMetrics {
    pub fn record_batch(records_in: usize, normalized: usize, failed: usize, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "normalize", "records_in"))
            .increment(records_in as u64);
        ::metrics::counter!(phase_metric!(counter, "normalize", "records_normalized"))
            .increment(normalized as u64);
        ::metrics::counter!(phase_metric!(counter, "normalize", "failures"))
            .increment(failed as u64);
        ::metrics::histogram!(phase_metric!(histogram, "normalize", "duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_degraded_date() {
        ::metrics::counter!(phase_metric!(counter, "normalize", "degraded_dates")).increment(1);
    }

    pub fn record_failure(field: &'static str) {
        ::metrics::counter!(phase_metric!(counter, "normalize", "field_failures"), "field" => field)
            .increment(1);
    }
}

impl PhaseMetrics for NormalizeMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "normalize", "records_in"));
        let _ = counter!(phase_metric!(counter, "normalize", "records_normalized"));
        let _ = counter!(phase_metric!(counter, "normalize", "failures"));
        let _ = counter!(phase_metric!(counter, "normalize", "degraded_dates"));
        let _ = histogram!(phase_metric!(histogram, "normalize", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "normalize"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "normalize", "records_in"),
                metric_type: MetricType::Counter,
                help: "Raw records handed to the normalizer",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "normalize", "records_normalized"),
                metric_type: MetricType::Counter,
                help: "Records that produced a normalized lead",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "normalize", "failures"),
                metric_type: MetricType::Counter,
                help: "Records dropped by normalization",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "normalize", "field_failures"),
                metric_type: MetricType::Counter,
                help: "Normalization failures by canonical field",
                labels: vec!["field"],
            },
            MetricDoc {
                name: phase_metric!(counter, "normalize", "degraded_dates"),
                metric_type: MetricType::Counter,
                help: "Leads whose date fell back to the run date",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "normalize", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of the normalization stage",
                labels: vec![],
            },
        ]
    }
}
