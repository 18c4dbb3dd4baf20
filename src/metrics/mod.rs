//! Centralized metrics for the lead pipeline
//!
//! Each pipeline phase defines its own metrics in a dedicated submodule, so
//! names stay owned by one phase and conflicts surface at registration.

pub mod dedup;
pub mod normalize;
pub mod registry;
pub mod run;

pub use dedup::DedupMetrics;
pub use normalize::NormalizeMetrics;
pub use run::RunMetrics;

use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Initialize the global metrics infrastructure
///
/// Idempotent. Installs an in-process Prometheus recorder (no HTTP listener;
/// a batch run is too short-lived to be scraped) and registers every phase's
/// metrics. The handle is kept for `render`.
pub fn init_metrics() {
    INIT.call_once(|| {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        match builder.install_recorder() {
            Ok(handle) => {
                if HANDLE.set(handle).is_err() {
                    warn!("metrics handle was already set");
                }
                registry::register_all_metrics();
                info!("Prometheus recorder installed");
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
            }
        }
    });
}

/// Prometheus text snapshot of everything recorded so far
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Trait for phase-specific metrics collections
///
/// Each phase implements this to provide:
/// - Metric registration at startup
/// - Consistent naming
/// - Documentation of what each metric measures
pub trait PhaseMetrics {
    /// Register all metrics for this phase
    fn register_metrics();

    /// Phase name used as the metric prefix
    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    /// Label keys the metric is split by
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Build a phase-prefixed metric name:
/// leads_{phase}_{metric_name}[_total]
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("leads_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("leads_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("leads_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;
