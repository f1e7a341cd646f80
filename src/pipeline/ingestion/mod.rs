// Pipeline ingestion: schema validation and lazy row streaming

pub mod loader;

pub use loader::{dataset_info, delimiter_byte, CsvLoader, DatasetInfo, RecordStream};
