use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use igac_pipeline::config::{MissingIndexPolicy, ModelThreshold, PipelineConfig};
use igac_pipeline::domain::{AnomalyFlag, FlagKind, RejectedRecord, Typology};
use igac_pipeline::error::{PipelineError, RejectKind};
use igac_pipeline::pipeline::orchestrator::{
    FLAGS_FILE, REJECTS_FILE, SUMMARY_FILE, TRANSACTIONS_FILE,
};
use igac_pipeline::pipeline::Pipeline;
use parquet::file::reader::{FileReader, SerializedFileReader};

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/resources/transactions_small.csv")
}

fn read_flags(dir: &Path) -> Vec<AnomalyFlag> {
    fs::read_to_string(dir.join(FLAGS_FILE))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn kinds_by_pk(flags: &[AnomalyFlag]) -> BTreeMap<String, Vec<FlagKind>> {
    let mut out: BTreeMap<String, Vec<FlagKind>> = BTreeMap::new();
    for f in flags {
        out.entry(f.pk.clone()).or_default().push(f.kind);
    }
    out
}

#[test]
fn full_run_publishes_every_artifact() {
    let out = tempfile::tempdir().unwrap();
    let summary = Pipeline::new(PipelineConfig::default())
        .run(&fixture(), out.path())
        .unwrap();

    assert_eq!(summary.counts.rows_read, 18);
    assert_eq!(summary.counts.duplicates, 1);
    assert_eq!(summary.counts.records_loaded, 15);
    assert_eq!(summary.counts.standardized, 14);
    assert_eq!(summary.counts.rejected, 3);
    assert_eq!(summary.counts.model_rows, 14);
    assert_eq!(summary.input_sha256.len(), 64);
    assert_eq!(summary.quality.duplicate_pks, 1);

    for file in [TRANSACTIONS_FILE, FLAGS_FILE, REJECTS_FILE, SUMMARY_FILE] {
        assert!(out.path().join(file).exists(), "missing {}", file);
    }

    let file = fs::File::open(out.path().join(TRANSACTIONS_FILE)).unwrap();
    let reader = SerializedFileReader::new(file).unwrap();
    assert_eq!(reader.metadata().file_metadata().num_rows(), 14);

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(written["run_id"], summary.run_id.to_string());
    assert_eq!(written["counts"]["standardized"], 14);
}

#[test]
fn detection_flags_and_typologies() {
    let out = tempfile::tempdir().unwrap();
    let summary = Pipeline::new(PipelineConfig::default())
        .run(&fixture(), out.path())
        .unwrap();
    let by_pk = kinds_by_pk(&read_flags(out.path()));

    assert!(by_pk["9"].contains(&FlagKind::Undervaluation));
    assert!(by_pk["12"].contains(&FlagKind::RapidResale));
    assert!(!by_pk.get("10").is_some_and(|k| k.contains(&FlagKind::RapidResale)));
    assert!(!by_pk.get("11").is_some_and(|k| k.contains(&FlagKind::RapidResale)));

    let laundering = &by_pk["13"];
    assert!(laundering.contains(&FlagKind::Undervaluation));
    assert!(laundering.contains(&FlagKind::Typology(Typology::PossibleLaundering)));
    assert!(laundering.contains(&FlagKind::Typology(Typology::LandFlipping)));

    assert_eq!(summary.counts.flags_by_kind.get("MODEL_OUTLIER"), Some(&1));
    assert!(!summary.corpus_terms.is_empty());
    assert!(summary
        .degenerate_groups
        .iter()
        .any(|g| g.geo_key.ends_with("_CALI")));
}

#[test]
fn rejects_are_written_in_input_order() {
    let out = tempfile::tempdir().unwrap();
    Pipeline::new(PipelineConfig::default())
        .run(&fixture(), out.path())
        .unwrap();

    let rejects: Vec<RejectedRecord> = fs::read_to_string(out.path().join(REJECTS_FILE))
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let kinds: Vec<RejectKind> = rejects.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RejectKind::InvalidDateError,
            RejectKind::ParseError,
            RejectKind::ParseError
        ]
    );
    assert_eq!(rejects[0].pk.as_deref(), Some("15"));
    assert_eq!(rejects[0].stage, "standardize");
    assert!(rejects.windows(2).all(|w| w[0].line <= w[1].line));
}

#[test]
fn runs_are_deterministic_under_a_fixed_seed() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(PipelineConfig::default());
    pipeline.run(&fixture(), first.path()).unwrap();
    pipeline.run(&fixture(), second.path()).unwrap();

    assert_eq!(
        fs::read_to_string(first.path().join(FLAGS_FILE)).unwrap(),
        fs::read_to_string(second.path().join(FLAGS_FILE)).unwrap()
    );
}

#[test]
fn missing_required_column_aborts_before_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("no_area.csv");
    fs::write(
        &input,
        "PK,MATRICULA,FECHA_RADICA_TEXTO,DEPARTAMENTO,MUNICIPIO,VALOR\n1,M1,01/01/2020,ANTIOQUIA,MEDELLIN,100\n",
    )
    .unwrap();
    let out = dir.path().join("out");

    let err = Pipeline::new(PipelineConfig::default())
        .run(&input, &out)
        .unwrap_err();
    match err {
        PipelineError::Schema { missing } => assert_eq!(missing, vec!["AREA".to_string()]),
        other => panic!("expected schema error, got {:?}", other),
    }
    assert!(!out.exists());
}

#[test]
fn model_fit_failure_publishes_nothing() {
    let mut config = PipelineConfig::default();
    config.model.max_category_cardinality = 1;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let err = Pipeline::new(config).run(&fixture(), &out).unwrap_err();
    assert!(matches!(err, PipelineError::ModelFit(_)));
    assert!(!out.exists());
}

#[test]
fn missing_price_index_honors_policy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("old.csv");
    fs::write(
        &input,
        "PK,MATRICULA,FECHA_RADICA_TEXTO,DEPARTAMENTO,MUNICIPIO,VALOR,AREA\n\
         1,M1,01/01/2014,ANTIOQUIA,MEDELLIN,100000000,80\n\
         2,M2,01/01/2020,ANTIOQUIA,MEDELLIN,120000000,80\n\
         3,M3,01/06/2021,ANTIOQUIA,MEDELLIN,110000000,90\n",
    )
    .unwrap();

    let rejecting = dir.path().join("reject");
    let summary = Pipeline::new(PipelineConfig::default())
        .run(&input, &rejecting)
        .unwrap();
    assert_eq!(summary.counts.standardized, 2);
    assert_eq!(summary.counts.rejected_by_kind.get("missing_index"), Some(&1));

    let mut config = PipelineConfig::default();
    config.standardize.missing_index_policy = MissingIndexPolicy::Flag;
    let flagging = dir.path().join("flag");
    let summary = Pipeline::new(config).run(&input, &flagging).unwrap();
    assert_eq!(summary.counts.standardized, 3);
    assert_eq!(summary.counts.rejected, 0);
    // Records without an adjusted value stay out of the model
    assert_eq!(summary.counts.model_rows, 2);
    let by_pk = kinds_by_pk(&read_flags(&flagging));
    assert!(by_pk["1"].contains(&FlagKind::MissingPriceIndex));
}

#[test]
fn score_threshold_mode_flags_nothing_above_one() {
    let mut config = PipelineConfig::default();
    config.model.threshold = ModelThreshold::Score { cutoff: 1.0 };
    let out = tempfile::tempdir().unwrap();
    let summary = Pipeline::new(config).run(&fixture(), out.path()).unwrap();
    assert_eq!(summary.counts.flags_by_kind.get("MODEL_OUTLIER"), None);
}

#[test]
fn metrics_snapshot_is_written_when_recorder_installed() {
    igac_pipeline::metrics::init_metrics();
    let out = tempfile::tempdir().unwrap();
    let summary = Pipeline::new(PipelineConfig::default())
        .run(&fixture(), out.path())
        .unwrap();

    let snapshot = fs::read_to_string(out.path().join("metrics.prom")).unwrap();
    assert!(snapshot.contains("igac_records_loaded_total"));
    assert!(summary.outputs.contains_key("metrics"));
}

#[test]
fn shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/pipeline.toml");
    let config = PipelineConfig::load(path).unwrap();
    let defaults = PipelineConfig::default();
    assert_eq!(config.standardize.base_year, defaults.standardize.base_year);
    assert_eq!(config.standardize.price_index, defaults.standardize.price_index);
    assert_eq!(config.model.threshold, defaults.model.threshold);
    assert_eq!(config.rules.resale_window_months, 6);
}

#[test]
fn all_rejected_input_still_publishes_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad_dates.csv");
    fs::write(
        &input,
        "PK,MATRICULA,FECHA_RADICA_TEXTO,DEPARTAMENTO,MUNICIPIO,VALOR,AREA\n\
         1,M1,not-a-date,ANTIOQUIA,MEDELLIN,100000000,80\n\
         2,M2,32/13/2020,ANTIOQUIA,MEDELLIN,120000000,80\n",
    )
    .unwrap();
    let out = dir.path().join("out");

    let summary = Pipeline::new(PipelineConfig::default())
        .run(&input, &out)
        .unwrap();
    assert_eq!(summary.counts.standardized, 0);
    assert_eq!(summary.counts.rejected, 2);
    assert_eq!(summary.counts.model_rows, 0);
    assert!(summary.counts.flags_by_kind.is_empty());

    let rejects = fs::read_to_string(out.join(REJECTS_FILE)).unwrap();
    assert_eq!(rejects.lines().count(), 2);
    let file = fs::File::open(out.join(TRANSACTIONS_FILE)).unwrap();
    let reader = SerializedFileReader::new(file).unwrap();
    assert_eq!(reader.metadata().file_metadata().num_rows(), 0);
}

#[test]
fn header_only_input_runs_without_model() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.csv");
    fs::write(
        &input,
        "PK,MATRICULA,FECHA_RADICA_TEXTO,DEPARTAMENTO,MUNICIPIO,VALOR,AREA\n",
    )
    .unwrap();
    let out = dir.path().join("out");

    let summary = Pipeline::new(PipelineConfig::default())
        .run(&input, &out)
        .unwrap();
    assert_eq!(summary.counts.rows_read, 0);
    assert!(out.join(REJECTS_FILE).exists());
    assert!(out.join(SUMMARY_FILE).exists());
}

#[test]
fn unindexed_years_under_flag_policy_skip_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("old.csv");
    fs::write(
        &input,
        "PK,MATRICULA,FECHA_RADICA_TEXTO,DEPARTAMENTO,MUNICIPIO,VALOR,AREA\n\
         1,M1,01/01/2014,ANTIOQUIA,MEDELLIN,100000000,80\n",
    )
    .unwrap();
    let mut config = PipelineConfig::default();
    config.standardize.missing_index_policy = MissingIndexPolicy::Flag;
    let out = dir.path().join("out");

    let summary = Pipeline::new(config).run(&input, &out).unwrap();
    assert_eq!(summary.counts.standardized, 1);
    assert_eq!(summary.counts.model_rows, 0);
    assert_eq!(summary.counts.flags_by_kind.get("MODEL_OUTLIER"), None);
    let by_pk = kinds_by_pk(&read_flags(&out));
    assert_eq!(by_pk["1"], vec![FlagKind::MissingPriceIndex]);
}

#[test]
fn missing_value_is_not_scored_as_zero() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("blank_valor.csv");
    let mut csv = String::from("PK,MATRICULA,FECHA_RADICA_TEXTO,DEPARTAMENTO,MUNICIPIO,VALOR,AREA\n");
    for i in 0..30 {
        csv.push_str(&format!(
            "{},M{},{:02}/03/2021,ANTIOQUIA,MEDELLIN,{},100\n",
            i + 1,
            i + 1,
            i % 28 + 1,
            100_000_000 + i * 1_000_000
        ));
    }
    csv.push_str("99,M99,15/03/2021,ANTIOQUIA,MEDELLIN,,100\n");
    fs::write(&input, csv).unwrap();
    let out = dir.path().join("out");

    let summary = Pipeline::new(PipelineConfig::default())
        .run(&input, &out)
        .unwrap();
    assert_eq!(summary.counts.standardized, 31);
    assert_eq!(summary.counts.model_rows, 30);

    let medellin = summary
        .profiles
        .iter()
        .find(|p| p.geo_key.ends_with("MEDELLÍN"))
        .unwrap();
    assert_eq!(medellin.observations, 30);

    let by_pk = kinds_by_pk(&read_flags(&out));
    assert!(by_pk.get("99").is_none(), "PK 99 flagged: {:?}", by_pk.get("99"));
}
