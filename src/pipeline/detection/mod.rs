// Anomaly detection: rules, cohort statistics, the outlier model,
// risk typologies and text mining

pub mod classifier;
pub mod features;
pub mod isolation_forest;
pub mod rules;
pub mod statistics;
pub mod text_miner;

pub use classifier::RiskClassifier;
pub use features::{FeatureEncoder, FeatureMatrix, FeatureVector};
pub use isolation_forest::{select_outliers, IsolationForest};
pub use rules::{ResaleHistory, RuleEngine};
pub use statistics::{MunicipalityProfile, StatisticalScorer};
pub use text_miner::{TermLift, TextMiner, WeightedTerm};
