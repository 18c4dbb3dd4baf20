//! Run-level metrics: collection outcomes, emitted leads and wall time.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct RunMetrics;

impl RunMetrics {
    pub fn record_collection(records: usize, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "run", "records_collected"))
            .increment(records as u64);
        ::metrics::histogram!(phase_metric!(histogram, "run", "collect_duration_seconds"))
            .record(duration_secs);
    }

    pub fn record_collection_failure() {
        ::metrics::counter!(phase_metric!(counter, "run", "collection_failures")).increment(1);
    }

    pub fn record_scoring_failure() {
        ::metrics::counter!(phase_metric!(counter, "run", "scoring_failures")).increment(1);
    }

    pub fn record_finished(leads_emitted: usize, new_leads: usize, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "run", "runs")).increment(1);
        ::metrics::counter!(phase_metric!(counter, "run", "leads_emitted"))
            .increment(leads_emitted as u64);
        ::metrics::counter!(phase_metric!(counter, "run", "new_leads"))
            .increment(new_leads as u64);
        ::metrics::histogram!(phase_metric!(histogram, "run", "duration_seconds"))
            .record(duration_secs);
        ::metrics::gauge!(phase_metric!(gauge, "run", "last_success_timestamp"))
            .set(chrono::Utc::now().timestamp() as f64);
    }

    pub fn record_failed() {
        ::metrics::counter!(phase_metric!(counter, "run", "failed_runs")).increment(1);
    }
}

impl PhaseMetrics for RunMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "run", "records_collected"));
        let _ = counter!(phase_metric!(counter, "run", "collection_failures"));
        let _ = counter!(phase_metric!(counter, "run", "scoring_failures"));
        let _ = counter!(phase_metric!(counter, "run", "runs"));
        let _ = counter!(phase_metric!(counter, "run", "failed_runs"));
        let _ = counter!(phase_metric!(counter, "run", "leads_emitted"));
        let _ = counter!(phase_metric!(counter, "run", "new_leads"));
        let _ = gauge!(phase_metric!(gauge, "run", "last_success_timestamp"));
        let _ = histogram!(phase_metric!(histogram, "run", "duration_seconds"));
        let _ = histogram!(phase_metric!(histogram, "run", "collect_duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "run"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "run", "records_collected"),
                metric_type: MetricType::Counter,
                help: "Raw records returned by collectors",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "run", "collection_failures"),
                metric_type: MetricType::Counter,
                help: "Collectors that failed, panicked or timed out",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "run", "scoring_failures"),
                metric_type: MetricType::Counter,
                help: "Leads excluded because scoring failed",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "run", "runs"),
                metric_type: MetricType::Counter,
                help: "Runs that reached Finalized",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "run", "failed_runs"),
                metric_type: MetricType::Counter,
                help: "Runs that ended in Failed",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "run", "leads_emitted"),
                metric_type: MetricType::Counter,
                help: "Leads written to the daily set",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "run", "new_leads"),
                metric_type: MetricType::Counter,
                help: "Emitted leads never seen in an earlier run",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(gauge, "run", "last_success_timestamp"),
                metric_type: MetricType::Gauge,
                help: "Unix time of the last finalized run",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "run", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "End-to-end run wall time",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "run", "collect_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of the collection stage",
                labels: vec![],
            },
        ]
    }
}
