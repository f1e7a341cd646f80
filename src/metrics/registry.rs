//! Metrics registry for coordinating phase-specific metrics
//!
//! Registers every phase's metrics up front so a snapshot rendered after a
//! partial run still lists each series, and detects name conflicts early.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Register all metrics from all phases
pub fn register_all_metrics() {
    let mut all_metrics = BTreeMap::new();

    register_phase_metrics::<super::pipeline::PipelineMetrics>(&mut all_metrics);

    info!(
        "Registered {} total metrics across all phases",
        all_metrics.len()
    );

    if std::env::var("IGAC_METRICS_DEBUG").is_ok() {
        log_metrics_summary(&all_metrics);
    }
}

/// Register metrics for a specific phase and detect conflicts
fn register_phase_metrics<T: PhaseMetrics>(
    all_metrics: &mut BTreeMap<&'static str, (&'static str, MetricDoc)>,
) {
    T::register_metrics();
    let phase_name = T::phase_name();

    for doc in T::metrics_documentation() {
        if let Some((owner, _)) = all_metrics.get(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' is defined in both '{}' and '{}'",
                doc.name, owner, phase_name
            );
        } else {
            all_metrics.insert(doc.name, (phase_name, doc));
        }
    }
}

fn log_metrics_summary(all_metrics: &BTreeMap<&'static str, (&'static str, MetricDoc)>) {
    for (name, (phase, doc)) in all_metrics {
        debug!(
            "[{}] {} ({:?}) labels={:?}: {}",
            phase, name, doc.metric_type, doc.labels, doc.help
        );
    }
}
