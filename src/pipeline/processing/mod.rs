// Pipeline processing: cleaning, standardization and data quality assessment

pub mod clean;
pub mod quality_gate;
pub mod standardize;

pub use clean::{Cleaner, Deduplicator};
pub use quality_gate::{QualityAccumulator, QualityDecision, QualityGateConfig, QualityReport};
pub use standardize::{PriceIndex, StandardizeOutcome, Standardizer};
