// Pipeline storage: record sinks and the Parquet artifact writer

pub mod jsonl;
pub mod parquet_out;

pub use jsonl::JsonlSink;
pub use parquet_out::{write_transactions, ScoredRecord};

use crate::error::Result;

/// Destination for a stream of serializable items (rejects, flags)
pub trait RecordSink<T>: Send {
    fn write(&mut self, item: &T) -> Result<()>;

    fn write_all<'a, I>(&mut self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let mut n = 0;
        for item in items {
            self.write(item)?;
            n += 1;
        }
        Ok(n)
    }

    /// Flush buffered output; the sink stays usable
    fn flush(&mut self) -> Result<()>;

    fn written(&self) -> usize;
}
