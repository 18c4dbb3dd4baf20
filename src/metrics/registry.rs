//! Metrics registry for coordinating phase-specific metrics
//!
//! Registers every phase's metrics, attaches their help text to the recorder
//! so the Prometheus snapshot carries `# HELP` lines, and detects naming
//! conflicts early.

use crate::metrics::{MetricDoc, MetricType, PhaseMetrics};
use std::collections::HashMap;
use tracing::{info, warn};

/// Register and describe all metrics from all phases
pub fn register_all_metrics() {
    let all_metrics = collect_all_metrics();
    for doc in all_metrics.values() {
        describe(doc);
    }

    info!(
        "Registered {} total metrics across all phases",
        all_metrics.len()
    );
}

fn collect_all_metrics() -> HashMap<String, MetricDoc> {
    let mut all_metrics = HashMap::new();
    register_phase_metrics::<super::normalize::NormalizeMetrics>(&mut all_metrics);
    register_phase_metrics::<super::dedup::DedupMetrics>(&mut all_metrics);
    register_phase_metrics::<super::run::RunMetrics>(&mut all_metrics);
    all_metrics
}

/// Register metrics for a specific phase and detect conflicts
fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<String, MetricDoc>) {
    T::register_metrics();
    let phase_docs = T::metrics_documentation();
    let phase_name = T::phase_name();

    info!(
        "Registering {} metrics for phase '{}'",
        phase_docs.len(),
        phase_name
    );

    for doc in phase_docs {
        if let Some(existing) = all_metrics.get(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' is defined twice ({} / phase '{}')",
                doc.name, existing.help, phase_name
            );
        } else {
            all_metrics.insert(doc.name.to_string(), doc);
        }
    }
}

/// Help text as exported, with the label set appended when there is one
fn help_text(doc: &MetricDoc) -> String {
    if doc.labels.is_empty() {
        doc.help.to_string()
    } else {
        format!("{} (by {})", doc.help, doc.labels.join(", "))
    }
}

fn describe(doc: &MetricDoc) {
    let help = help_text(doc);
    match doc.metric_type {
        MetricType::Counter => {
            ::metrics::describe_counter!(doc.name, help);
        }
        MetricType::Histogram => {
            ::metrics::describe_histogram!(doc.name, help);
        }
        MetricType::Gauge => {
            ::metrics::describe_gauge!(doc.name, help);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_metric_names_do_not_collide() {
        let all = collect_all_metrics();
        let documented = super::super::NormalizeMetrics::metrics_documentation().len()
            + super::super::DedupMetrics::metrics_documentation().len()
            + super::super::RunMetrics::metrics_documentation().len();
        assert_eq!(all.len(), documented);
        assert!(all.keys().all(|name| name.starts_with("leads_")));
    }

    #[test]
    fn labelled_metrics_name_their_labels_in_help() {
        let all = collect_all_metrics();
        let failures = &all["leads_normalize_field_failures_total"];
        assert_eq!(
            help_text(failures),
            format!("{} (by field)", failures.help)
        );
        let groups = &all["leads_dedup_groups_total"];
        assert_eq!(help_text(groups), groups.help);
    }
}
