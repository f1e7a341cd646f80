use csv::{ByteRecord, ReaderBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::constants::REQUIRED_COLUMNS;
use crate::domain::{RawRecord, RejectedRecord};
use crate::error::{PipelineError, RecordError, Result};

const STAGE: &str = "load";

/// Opens delimited transaction files and validates their header before any row is read
#[derive(Debug, Clone)]
pub struct CsvLoader {
    path: PathBuf,
    delimiter: char,
}

impl CsvLoader {
    pub fn new<P: AsRef<Path>>(path: P, delimiter: char) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter,
        }
    }

    /// Open the file and return a lazy stream of rows.
    /// Fails with `PipelineError::Schema` when a required column is missing.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn open(&self) -> Result<RecordStream<File>> {
        let file = File::open(&self.path)?;
        let stream = RecordStream::new(file, delimiter_byte(self.delimiter)?)?;
        info!(columns = stream.headers().len(), "Input schema validated");
        Ok(stream)
    }
}

/// Row iterator over a delimited source. Rows are decoded one at a time; nothing is buffered.
pub struct RecordStream<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    buffer: ByteRecord,
    done: bool,
}

impl<R: Read> RecordStream<R> {
    pub fn new(source: R, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(source);

        let headers: Vec<String> = reader
            .byte_headers()?
            .iter()
            .map(|h| clean_header(&decode_field(h)))
            .collect();

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|col| !headers.iter().any(|h| h == *col))
            .map(|col| col.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Schema { missing });
        }

        Ok(Self {
            reader,
            headers,
            buffer: ByteRecord::new(),
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn reject(line: u64, message: String) -> RejectedRecord {
        let error = RecordError::Parse(message);
        RejectedRecord {
            line,
            pk: None,
            stage: STAGE.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl<R: Read> Iterator for RecordStream<R> {
    type Item = std::result::Result<RawRecord, RejectedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.read_byte_record(&mut self.buffer) {
            Ok(false) => {
                self.done = true;
                None
            }
            Ok(true) => {
                let line = self.buffer.position().map(|p| p.line()).unwrap_or(0);
                if self.buffer.len() != self.headers.len() {
                    warn!(
                        line,
                        expected = self.headers.len(),
                        found = self.buffer.len(),
                        "Row has wrong field count"
                    );
                    return Some(Err(Self::reject(
                        line,
                        format!(
                            "expected {} fields, found {}",
                            self.headers.len(),
                            self.buffer.len()
                        ),
                    )));
                }

                let fields: HashMap<String, String> = self
                    .headers
                    .iter()
                    .zip(self.buffer.iter())
                    .map(|(h, v)| (h.clone(), decode_field(v)))
                    .collect();
                Some(Ok(RawRecord { line, fields }))
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                // An I/O failure leaves the reader in an unknown state; stop after reporting it.
                if e.is_io_error() {
                    self.done = true;
                }
                Some(Err(Self::reject(line, e.to_string())))
            }
        }
    }
}

/// Decode a raw field as UTF-8, falling back to Latin-1 for legacy exports
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn clean_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').replace('"', "").trim().to_string()
}

/// Basic facts about an input file, gathered without materializing records
#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    pub file_path: String,
    pub file_size_bytes: u64,
    pub file_size_gb: f64,
    pub num_columns: usize,
    pub columns: Vec<String>,
    pub rows: u64,
}

/// The csv reader splits on a single byte, so only ASCII delimiters are usable
pub fn delimiter_byte(delimiter: char) -> Result<u8> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(PipelineError::Config(format!(
            "input.delimiter {:?} is not an ASCII character",
            delimiter
        )))
    }
}

pub fn dataset_info<P: AsRef<Path>>(path: P, delimiter: char) -> Result<DatasetInfo> {
    let path = path.as_ref();
    let file_size_bytes = fs::metadata(path)?.len();

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter_byte(delimiter)?)
        .flexible(true)
        .from_path(path)?;
    let columns: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| clean_header(&decode_field(h)))
        .collect();

    let mut rows = 0u64;
    let mut record = ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        rows += 1;
    }
    debug!(rows, "Counted input rows");

    Ok(DatasetInfo {
        file_path: path.display().to_string(),
        file_size_bytes,
        file_size_gb: (file_size_bytes as f64 / 1024f64.powi(3) * 100.0).round() / 100.0,
        num_columns: columns.len(),
        columns,
        rows,
    })
}
