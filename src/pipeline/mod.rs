// Data processing pipeline: ingestion, processing, detection and storage

pub mod detection;
pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod storage;

// Re-export the run driver and its report types
pub use orchestrator::{Pipeline, RunCounts, RunSummary};
