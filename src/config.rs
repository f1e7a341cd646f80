use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::constants;
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::delimiter_byte;
use crate::pipeline::processing::standardize::PriceIndex;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV_VAR: &str = "IGAC_PIPELINE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

/// Immutable configuration threaded through every pipeline component.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub standardize: StandardizeConfig,
    pub rules: RuleConfig,
    pub statistics: StatisticsConfig,
    pub model: ModelConfig,
    pub classifier: ClassifierConfig,
    pub text: TextConfig,
    pub pipeline: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Field delimiter of the input file
    pub delimiter: char,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { delimiter: ',' }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving the run artifacts
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
        }
    }
}

/// What to do with a record whose filing year has no price index entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingIndexPolicy {
    /// Route the record to the rejects sink
    #[default]
    Reject,
    /// Keep the record unadjusted and attach a MISSING_PRICE_INDEX flag
    Flag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardizeConfig {
    /// Year whose prices adjusted values are expressed in
    pub base_year: i32,
    /// Year -> consumer price index. Keys are strings because TOML table keys are.
    pub price_index: BTreeMap<String, f64>,
    /// Accent-folded municipality name -> canonical name
    pub municipality_mapping: BTreeMap<String, String>,
    pub missing_index_policy: MissingIndexPolicy,
}

impl Default for StandardizeConfig {
    fn default() -> Self {
        Self {
            base_year: 2024,
            price_index: constants::default_price_index()
                .into_iter()
                .map(|(year, ipc)| (year.to_string(), ipc))
                .collect(),
            municipality_mapping: constants::default_municipality_mapping()
                .into_iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            missing_index_policy: MissingIndexPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Flag UNDERVALUATION when value < ratio * cadastral appraisal
    pub undervaluation_ratio: f64,
    /// Length of the trailing resale window in calendar months
    pub resale_window_months: u32,
    /// Flag RAPID_RESALE when the window holds more transactions than this
    pub resale_max_transactions: usize,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            undervaluation_ratio: 0.10,
            resale_window_months: 6,
            resale_max_transactions: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Flag STAT_OUTLIER when |Z| exceeds this
    pub z_threshold: f64,
    /// Groups with fewer observations are degenerate
    pub min_observations: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            min_observations: 2,
        }
    }
}

/// How model scores become MODEL_OUTLIER flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ModelThreshold {
    /// Flag the top `contamination` fraction of records by score
    Percentile { contamination: f64 },
    /// Flag every record scoring at or above `cutoff`
    Score { cutoff: f64 },
}

impl Default for ModelThreshold {
    fn default() -> Self {
        ModelThreshold::Percentile { contamination: 0.01 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_trees: usize,
    /// Subsample size per tree (psi); capped at the number of rows
    pub sample_size: usize,
    pub seed: u64,
    /// Categorical features with more distinct values than this fail the fit
    pub max_category_cardinality: usize,
    pub threshold: ModelThreshold,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            sample_size: 256,
            seed: 42,
            max_category_cardinality: 50_000,
            threshold: ModelThreshold::default(),
        }
    }
}

/// Which monetary value the risk classifier compares against its thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueBasis {
    #[default]
    Nominal,
    Adjusted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// POSSIBLE_LAUNDERING above this value (COP)
    pub extreme_high: f64,
    /// POSSIBLE_EVASION below this value (COP)
    pub extreme_low: f64,
    /// LAND_FLIPPING above this annotation count
    pub annotation_threshold: u32,
    pub value_basis: ValueBasis,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            extreme_high: 10_000_000_000.0,
            extreme_low: 1_000_000.0,
            annotation_threshold: 20,
            value_basis: ValueBasis::Nominal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Terms surfaced per flagged record
    pub top_terms: usize,
    pub min_token_len: usize,
    /// Terms kept in the corpus-level lift ranking
    pub corpus_terms: usize,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            top_terms: 5,
            min_token_len: 3,
            corpus_terms: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker threads for phase 2; 0 lets rayon decide
    pub threads: usize,
}

impl PipelineConfig {
    /// Load configuration from `IGAC_PIPELINE_CONFIG`, then `config/pipeline.toml`,
    /// falling back to built-in defaults when neither exists.
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(path);
        }
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            return Self::load(DEFAULT_CONFIG_PATH);
        }
        info!("No configuration file found, using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the typed price index table from the `[standardize.price_index]` section
    pub fn price_index(&self) -> Result<PriceIndex> {
        let mut table = BTreeMap::new();
        for (year, ipc) in &self.standardize.price_index {
            let year: i32 = year.trim().parse().map_err(|_| {
                PipelineError::Config(format!("price_index key '{}' is not a year", year))
            })?;
            table.insert(year, *ipc);
        }
        PriceIndex::new(table, self.standardize.base_year)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.price_index()?;
        delimiter_byte(self.input.delimiter)?;

        let rules = &self.rules;
        if !(rules.undervaluation_ratio > 0.0 && rules.undervaluation_ratio.is_finite()) {
            return Err(PipelineError::Config(
                "rules.undervaluation_ratio must be a positive number".to_string(),
            ));
        }
        if rules.resale_window_months == 0 {
            return Err(PipelineError::Config(
                "rules.resale_window_months must be at least 1".to_string(),
            ));
        }
        if self.statistics.z_threshold <= 0.0 {
            return Err(PipelineError::Config(
                "statistics.z_threshold must be positive".to_string(),
            ));
        }
        if self.statistics.min_observations < 2 {
            return Err(PipelineError::Config(
                "statistics.min_observations must be at least 2 for a sample stddev".to_string(),
            ));
        }
        if self.model.n_trees == 0 || self.model.sample_size < 2 {
            return Err(PipelineError::Config(
                "model.n_trees must be >= 1 and model.sample_size >= 2".to_string(),
            ));
        }
        match self.model.threshold {
            ModelThreshold::Percentile { contamination }
                if !(0.0..=0.5).contains(&contamination) =>
            {
                return Err(PipelineError::Config(format!(
                    "model.threshold.contamination {} outside [0, 0.5]",
                    contamination
                )));
            }
            ModelThreshold::Score { cutoff } if !(0.0..=1.0).contains(&cutoff) => {
                return Err(PipelineError::Config(format!(
                    "model.threshold.cutoff {} outside [0, 1]",
                    cutoff
                )));
            }
            _ => {}
        }
        if self.classifier.extreme_low >= self.classifier.extreme_high {
            return Err(PipelineError::Config(
                "classifier.extreme_low must be below classifier.extreme_high".to_string(),
            ));
        }
        if self.text.top_terms == 0 {
            return Err(PipelineError::Config("text.top_terms must be at least 1".to_string()));
        }

        debug!("Configuration validated");
        Ok(())
    }
}
