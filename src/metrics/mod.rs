//! Metrics infrastructure for the pipeline
//!
//! Each pipeline phase declares its metrics in a dedicated submodule. Batch runs are
//! short-lived, so instead of an HTTP listener the recorder handle is kept in-process
//! and rendered to a Prometheus text snapshot at the end of the run.

pub mod pipeline;
pub mod registry;

pub use pipeline::PipelineMetrics;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Idempotent.
pub fn init_metrics() {
    INIT.call_once(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_err() {
                warn!("Metrics handle already set");
            }
            registry::register_all_metrics();
            info!("Prometheus recorder installed");
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
        }
    });
}

/// Prometheus text exposition of every metric recorded so far
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Trait for phase-specific metrics collections
pub trait PhaseMetrics {
    /// Register all metrics for this phase
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Metric names follow igac_{name}[_total]
macro_rules! igac_metric {
    (counter, $name:literal) => {
        concat!("igac_", $name, "_total")
    };
    (histogram, $name:literal) => {
        concat!("igac_", $name)
    };
    (gauge, $name:literal) => {
        concat!("igac_", $name)
    };
}

pub(crate) use igac_metric;
