//! Two-phase batch run.
//!
//! Phase 1 loads, cleans and standardizes every record, then fits all read-only
//! aggregates. Phase 2 scores records in parallel against those aggregates.
//! Output files are written only once scoring has completed, so a fatal error in
//! either phase leaves the output directory untouched.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::{
    AnomalyFlag, FlagKind, FlagSet, FlagSource, RejectedRecord, StandardizedRecord,
    TransactionRecord,
};
use crate::error::{DegenerateStatisticsError, PipelineError, Result};
use crate::metrics::{self, PipelineMetrics};
use crate::pipeline::detection::{
    select_outliers, FeatureEncoder, FeatureMatrix, IsolationForest, MunicipalityProfile,
    ResaleHistory, RiskClassifier, RuleEngine, StatisticalScorer, TermLift, TextMiner,
};
use crate::pipeline::ingestion::CsvLoader;
use crate::pipeline::processing::{
    Cleaner, Deduplicator, QualityAccumulator, QualityGateConfig, QualityReport,
    StandardizeOutcome, Standardizer,
};
use crate::pipeline::storage::{write_transactions, JsonlSink, RecordSink, ScoredRecord};

pub const TRANSACTIONS_FILE: &str = "transactions.parquet";
pub const FLAGS_FILE: &str = "flags.jsonl";
pub const REJECTS_FILE: &str = "rejects.jsonl";
pub const SUMMARY_FILE: &str = "run_summary.json";
pub const METRICS_FILE: &str = "metrics.prom";

/// Record counts of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunCounts {
    pub rows_read: u64,
    /// Rows that survived cleaning and deduplication
    pub records_loaded: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub rejected_by_kind: BTreeMap<String, u64>,
    pub standardized: u64,
    pub model_rows: u64,
    pub flagged_records: u64,
    pub flags_by_kind: BTreeMap<String, usize>,
}

/// Written to `run_summary.json` at the end of every successful run
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub input_path: String,
    pub input_sha256: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub phase_durations: BTreeMap<&'static str, f64>,
    pub counts: RunCounts,
    pub quality: QualityReport,
    pub profiles: Vec<MunicipalityProfile>,
    pub degenerate_groups: Vec<DegenerateStatisticsError>,
    pub corpus_terms: Vec<TermLift>,
    pub outputs: BTreeMap<&'static str, String>,
}

/// Result of the load/clean/dedup pass
struct CleanPass {
    rows_read: u64,
    records_loaded: u64,
    duplicates: u64,
    rejects: Vec<RejectedRecord>,
    quality: QualityReport,
}

/// Everything phase 1 hands to phase 2
struct Prepared {
    records: Vec<StandardizedRecord>,
    flags: FlagSet,
    pass: CleanPass,
}

/// Read-only aggregates shared by every phase-2 worker
struct Aggregates {
    history: ResaleHistory,
    scorer: StatisticalScorer,
    matrix: FeatureMatrix,
    /// `None` when no record is eligible for the model
    forest: Option<IsolationForest>,
    miner: TextMiner,
}

struct Scored {
    rows: Vec<ScoredRecord>,
    flags: FlagSet,
    corpus_terms: Vec<TermLift>,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full batch and publish its artifacts into `output_dir`
    #[instrument(skip_all, fields(input = %input.display(), output = %output_dir.display()))]
    pub fn run(&self, input: &Path, output_dir: &Path) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let t_run = Instant::now();
        let mut phase_durations = BTreeMap::new();
        info!(%run_id, "Starting batch run");

        let input_sha256 = fingerprint(input)?;
        let pool = self.thread_pool()?;

        // Phase 1: records and aggregates
        let t_phase = Instant::now();
        let prepared = self.prepare(input)?;
        Self::finish_phase(&mut phase_durations, "load", t_phase);

        let t_phase = Instant::now();
        let aggregates = pool.install(|| self.build_aggregates(&prepared.records))?;
        Self::finish_phase(&mut phase_durations, "aggregate", t_phase);

        // Phase 2: parallel scoring
        let t_phase = Instant::now();
        let Prepared {
            records,
            flags,
            pass,
        } = prepared;
        let standardized = records.len() as u64;
        let model_rows = aggregates.matrix.len() as u64;
        let scored = self.score(&pool, records, flags, &aggregates);
        Self::finish_phase(&mut phase_durations, "score", t_phase);

        // Publish
        let t_phase = Instant::now();
        let mut outputs = self.write_outputs(output_dir, &scored, &pass.rejects)?;
        let counts = Self::record_counts(&pass, &scored, standardized, model_rows, &aggregates);
        Self::finish_phase(&mut phase_durations, "write", t_phase);

        if let Some(snapshot) = metrics::render() {
            let path = output_dir.join(METRICS_FILE);
            fs::write(&path, snapshot)?;
            outputs.insert("metrics", path.display().to_string());
        }

        let summary_path = output_dir.join(SUMMARY_FILE);
        outputs.insert("summary", summary_path.display().to_string());
        let summary = RunSummary {
            run_id,
            input_path: input.display().to_string(),
            input_sha256,
            started_at,
            finished_at: Utc::now(),
            duration_secs: t_run.elapsed().as_secs_f64(),
            phase_durations,
            counts,
            quality: pass.quality,
            profiles: aggregates.scorer.profiles().into_iter().cloned().collect(),
            degenerate_groups: aggregates.scorer.degenerate_groups().to_vec(),
            corpus_terms: scored.corpus_terms,
            outputs,
        };
        let mut writer = BufWriter::new(File::create(&summary_path)?);
        serde_json::to_writer_pretty(&mut writer, &summary)?;
        writer.flush()?;

        info!(
            %run_id,
            records = summary.counts.standardized,
            flagged = summary.counts.flagged_records,
            rejected = summary.counts.rejected,
            duration_secs = summary.duration_secs,
            "Batch run finished"
        );
        Ok(summary)
    }

    /// Load, clean and deduplicate only, returning the data quality report
    #[instrument(skip_all, fields(input = %input.display()))]
    pub fn quality_report(&self, input: &Path) -> Result<QualityReport> {
        let pass = clean_pass(input, &self.config, |_| {})?;
        info!(
            rows = pass.rows_read,
            loaded = pass.records_loaded,
            rejected = pass.rejects.len(),
            "Quality pass finished"
        );
        Ok(pass.quality)
    }

    fn thread_pool(&self) -> Result<ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.pipeline.threads)
            .thread_name(|i| format!("igac-score-{}", i))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build thread pool: {}", e)))
    }

    fn finish_phase(
        durations: &mut BTreeMap<&'static str, f64>,
        phase: &'static str,
        start: Instant,
    ) {
        let secs = start.elapsed().as_secs_f64();
        PipelineMetrics::record_phase_duration(phase, secs);
        durations.insert(phase, secs);
        debug!(phase, secs, "Phase finished");
    }

    /// Load, clean, deduplicate and standardize every record
    #[instrument(skip_all)]
    fn prepare(&self, input: &Path) -> Result<Prepared> {
        let standardizer = Standardizer::from_config(&self.config)?;
        let mut records = Vec::new();
        let mut flags = FlagSet::new();
        let mut late_rejects = Vec::new();

        let mut pass = clean_pass(input, &self.config, |record| {
            match standardizer.standardize(record) {
                StandardizeOutcome::Standardized(r) => records.push(r),
                StandardizeOutcome::Flagged(r, flag) => {
                    flags.insert(flag);
                    records.push(r);
                }
                StandardizeOutcome::Rejected(reject) => {
                    warn!(line = reject.line, kind = reject.kind.as_str(), "{}", reject.message);
                    late_rejects.push(reject);
                }
            }
        })?;

        pass.rejects.extend(late_rejects);
        pass.rejects.sort_by_key(|r| r.line);

        info!(
            rows = pass.rows_read,
            standardized = records.len(),
            rejected = pass.rejects.len(),
            duplicates = pass.duplicates,
            "Phase 1 records ready"
        );
        Ok(Prepared {
            records,
            flags,
            pass,
        })
    }

    #[instrument(skip_all, fields(records = records.len()))]
    fn build_aggregates(&self, records: &[StandardizedRecord]) -> Result<Aggregates> {
        let history = ResaleHistory::build(records);
        let scorer = StatisticalScorer::fit(records, &self.config.statistics);
        let encoder = FeatureEncoder::fit(records, self.config.model.max_category_cardinality)?;
        let matrix = FeatureMatrix::build(records, &encoder)?;
        let forest = if matrix.is_empty() {
            warn!("No record is eligible for the anomaly model, skipping it");
            None
        } else {
            Some(IsolationForest::fit(&matrix.rows, &self.config.model)?)
        };
        let miner = TextMiner::fit(
            records.iter().map(|r| r.record.documento.as_str()),
            &self.config.text,
        );

        info!(
            properties = history.properties(),
            groups = scorer.profiles().len(),
            degenerate = scorer.degenerate_groups().len(),
            model_rows = matrix.len(),
            documents = miner.documents(),
            "Phase 1 aggregates ready"
        );
        Ok(Aggregates {
            history,
            scorer,
            matrix,
            forest,
            miner,
        })
    }

    /// Per-record scoring against the read-only aggregates
    #[instrument(skip_all, fields(records = records.len()))]
    fn score(
        &self,
        pool: &ThreadPool,
        records: Vec<StandardizedRecord>,
        mut flags: FlagSet,
        agg: &Aggregates,
    ) -> Scored {
        let rules = RuleEngine::new(self.config.rules.clone());

        let per_record: Vec<(Vec<AnomalyFlag>, Option<f64>)> = pool.install(|| {
            records
                .par_iter()
                .map(|r| {
                    let mut found = rules.evaluate(r, &agg.history);
                    let (z, stat_flag) = agg.scorer.score(r);
                    found.extend(stat_flag);
                    (found, z)
                })
                .collect()
        });
        let model_scores: Vec<f64> = match &agg.forest {
            Some(forest) => {
                pool.install(|| agg.matrix.rows.par_iter().map(|x| forest.score(x)).collect())
            }
            None => Vec::new(),
        };

        let mut z_scores = Vec::with_capacity(records.len());
        for (found, z) in per_record {
            flags.extend(found);
            z_scores.push(z);
        }

        let outliers = select_outliers(&model_scores, self.config.model.threshold);
        let mut anomaly_scores = vec![None; records.len()];
        for (row, &score) in model_scores.iter().enumerate() {
            let i = agg.matrix.record_index[row];
            anomaly_scores[i] = Some(score);
            if outliers[row] {
                let flag = AnomalyFlag::new(
                    records[i].pk(),
                    FlagSource::Model,
                    FlagKind::ModelOutlier,
                    score,
                )
                .with_detail(format!("isolation score {:.4}", score));
                flags.insert(flag);
            }
        }

        // Typologies and terms only see the union of detection flags
        let classifier = RiskClassifier::new(self.config.classifier.clone());
        let typologies: Vec<AnomalyFlag> = pool.install(|| {
            records
                .par_iter()
                .flat_map_iter(|r| classifier.classify(r, &flags))
                .collect()
        });
        flags.extend(typologies);

        let top_terms: Vec<Vec<String>> = pool.install(|| {
            records
                .par_iter()
                .map(|r| {
                    if flags.is_flagged(r.pk()) {
                        agg.miner
                            .top_terms(&r.record.documento)
                            .into_iter()
                            .map(|t| t.term)
                            .collect()
                    } else {
                        Vec::new()
                    }
                })
                .collect()
        });
        let corpus_terms = agg.miner.corpus_lift(
            records
                .iter()
                .filter(|r| flags.is_flagged(r.pk()))
                .map(|r| r.record.documento.as_str()),
        );

        let rows: Vec<ScoredRecord> = records
            .into_iter()
            .zip(z_scores)
            .zip(anomaly_scores)
            .zip(top_terms)
            .map(|(((record, z_score), anomaly_score), top_terms)| ScoredRecord {
                record,
                z_score,
                anomaly_score,
                top_terms,
            })
            .collect();

        info!(
            flags = flags.len(),
            flagged = flags.flagged_pks().len(),
            "Phase 2 scoring finished"
        );
        Scored {
            rows,
            flags,
            corpus_terms,
        }
    }

    #[instrument(skip_all, fields(dir = %output_dir.display()))]
    fn write_outputs(
        &self,
        output_dir: &Path,
        scored: &Scored,
        rejects: &[RejectedRecord],
    ) -> Result<BTreeMap<&'static str, String>> {
        fs::create_dir_all(output_dir)?;
        let mut outputs = BTreeMap::new();

        let path = output_dir.join(TRANSACTIONS_FILE);
        write_transactions(&path, &scored.rows, &scored.flags)?;
        outputs.insert("transactions", path.display().to_string());

        let path = output_dir.join(FLAGS_FILE);
        let mut sink: JsonlSink<AnomalyFlag> = JsonlSink::create(&path)?;
        sink.write_all(scored.flags.iter())?;
        sink.flush()?;
        outputs.insert("flags", path.display().to_string());

        let path = output_dir.join(REJECTS_FILE);
        let mut sink: JsonlSink<RejectedRecord> = JsonlSink::create(&path)?;
        sink.write_all(rejects)?;
        sink.flush()?;
        outputs.insert("rejects", path.display().to_string());

        info!(
            rows = scored.rows.len(),
            flags = scored.flags.len(),
            rejects = rejects.len(),
            "Outputs written"
        );
        Ok(outputs)
    }

    fn record_counts(
        pass: &CleanPass,
        scored: &Scored,
        standardized: u64,
        model_rows: u64,
        agg: &Aggregates,
    ) -> RunCounts {
        let mut rejected_by_kind: BTreeMap<String, u64> = BTreeMap::new();
        for reject in &pass.rejects {
            *rejected_by_kind.entry(reject.kind.as_str().to_string()).or_insert(0) += 1;
            PipelineMetrics::record_rejected(reject.kind.as_str());
        }

        let mut by_kind: BTreeMap<FlagKind, u64> = BTreeMap::new();
        for flag in scored.flags.iter() {
            *by_kind.entry(flag.kind).or_insert(0) += 1;
        }
        for (kind, n) in &by_kind {
            PipelineMetrics::record_flags(kind.label(), *n);
        }

        PipelineMetrics::record_loaded(pass.rows_read);
        PipelineMetrics::record_duplicates(pass.duplicates);
        PipelineMetrics::record_degenerate_groups(agg.scorer.degenerate_groups().len() as u64);
        PipelineMetrics::record_scored(standardized);

        RunCounts {
            rows_read: pass.rows_read,
            records_loaded: pass.records_loaded,
            duplicates: pass.duplicates,
            rejected: pass.rejects.len() as u64,
            rejected_by_kind,
            standardized,
            model_rows,
            flagged_records: scored.flags.flagged_pks().len() as u64,
            flags_by_kind: scored.flags.count_by_kind(),
        }
    }
}

/// Stream the input through loading, cleaning and deduplication, handing each
/// surviving record to `accept`
fn clean_pass<F>(input: &Path, config: &PipelineConfig, mut accept: F) -> Result<CleanPass>
where
    F: FnMut(TransactionRecord),
{
    let stream = CsvLoader::new(input, config.input.delimiter).open()?;
    let mut quality = QualityAccumulator::new(stream.headers());
    let cleaner = Cleaner::new(&config.standardize);
    let mut dedup = Deduplicator::new();
    let mut rejects = Vec::new();
    let mut rows_read = 0u64;
    let mut records_loaded = 0u64;

    for row in stream {
        rows_read += 1;
        let raw = match row {
            Ok(raw) => raw,
            Err(reject) => {
                rejects.push(reject);
                continue;
            }
        };
        let record = match cleaner.clean(&raw) {
            Ok(record) => record,
            Err(reject) => {
                warn!(line = reject.line, "{}", reject.message);
                rejects.push(reject);
                continue;
            }
        };
        if !dedup.admit(&record.pk) {
            debug!(pk = %record.pk, line = raw.line, "Dropping duplicate PK");
            quality.record_duplicate();
            continue;
        }

        quality.observe_raw(&raw);
        quality.observe_clean(&record);
        records_loaded += 1;
        accept(record);
    }

    let duplicates = dedup.duplicates() as u64;
    info!(rows_read, records_loaded, duplicates, rejected = rejects.len(), "Input cleaned");
    Ok(CleanPass {
        rows_read,
        records_loaded,
        duplicates,
        rejects,
        quality: quality.finish(&QualityGateConfig::default()),
    })
}

/// SHA-256 of the input file, hex encoded
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
