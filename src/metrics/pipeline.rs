//! Batch run metrics: record flow, rejects, flags and phase timings.

use crate::metrics::{igac_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct PipelineMetrics;

impl PipelineMetrics {
    pub fn record_loaded(count: u64) {
        ::metrics::counter!(igac_metric!(counter, "records_loaded")).increment(count);
    }

    pub fn record_rejected(reason: &'static str) {
        ::metrics::counter!(igac_metric!(counter, "records_rejected"), "reason" => reason)
            .increment(1);
    }

    pub fn record_duplicates(count: u64) {
        ::metrics::counter!(igac_metric!(counter, "duplicates")).increment(count);
    }

    pub fn record_flags(kind: &'static str, count: u64) {
        ::metrics::counter!(igac_metric!(counter, "flags"), "kind" => kind).increment(count);
    }

    pub fn record_degenerate_groups(count: u64) {
        ::metrics::counter!(igac_metric!(counter, "degenerate_groups")).increment(count);
    }

    pub fn record_phase_duration(phase: &'static str, duration_secs: f64) {
        ::metrics::histogram!(igac_metric!(histogram, "phase_duration_seconds"), "phase" => phase)
            .record(duration_secs);
    }

    pub fn record_scored(count: u64) {
        ::metrics::gauge!(igac_metric!(gauge, "records_scored")).set(count as f64);
    }
}

impl PhaseMetrics for PipelineMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(igac_metric!(counter, "records_loaded"));
        let _ = counter!(igac_metric!(counter, "records_rejected"));
        let _ = counter!(igac_metric!(counter, "duplicates"));
        let _ = counter!(igac_metric!(counter, "flags"));
        let _ = counter!(igac_metric!(counter, "degenerate_groups"));
        let _ = histogram!(igac_metric!(histogram, "phase_duration_seconds"));
        let _ = gauge!(igac_metric!(gauge, "records_scored"));
    }

    fn phase_name() -> &'static str {
        "pipeline"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: igac_metric!(counter, "records_loaded"),
                metric_type: MetricType::Counter,
                help: "Rows read from the input file",
                labels: vec![],
            },
            MetricDoc {
                name: igac_metric!(counter, "records_rejected"),
                metric_type: MetricType::Counter,
                help: "Records routed to the rejects sink",
                labels: vec!["reason"],
            },
            MetricDoc {
                name: igac_metric!(counter, "duplicates"),
                metric_type: MetricType::Counter,
                help: "Duplicate primary keys dropped during cleaning",
                labels: vec![],
            },
            MetricDoc {
                name: igac_metric!(counter, "flags"),
                metric_type: MetricType::Counter,
                help: "Anomaly flags emitted",
                labels: vec!["kind"],
            },
            MetricDoc {
                name: igac_metric!(counter, "degenerate_groups"),
                metric_type: MetricType::Counter,
                help: "Geographic groups excluded from Z-score flagging",
                labels: vec![],
            },
            MetricDoc {
                name: igac_metric!(histogram, "phase_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall-clock duration of each pipeline phase",
                labels: vec!["phase"],
            },
            MetricDoc {
                name: igac_metric!(gauge, "records_scored"),
                metric_type: MetricType::Gauge,
                help: "Records scored in the last run",
                labels: vec![],
            },
        ]
    }
}
