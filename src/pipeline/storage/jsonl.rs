use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

use super::RecordSink;
use crate::error::Result;

/// One JSON document per line
pub struct JsonlSink<T, W: Write = File> {
    writer: BufWriter<W>,
    written: usize,
    _item: PhantomData<fn(&T)>,
}

impl<T> JsonlSink<T, File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "Opening JSONL sink");
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl<T, W: Write> JsonlSink<T, W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
            _item: PhantomData,
        }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::error::PipelineError::Io(e.into_error()))
    }
}

impl<T: Serialize, W: Write + Send> RecordSink<T> for JsonlSink<T, W> {
    fn write(&mut self, item: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, item)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn written(&self) -> usize {
        self.written
    }
}
