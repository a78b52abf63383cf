//! Multi-stream record store.
//!
//! The extractor and the metric stages talk to a [`RecordSink`]: named
//! streams of flat records, schema inferred from the first record written
//! to each stream. Two durable backends exist — row-streamed CSV for
//! debugging and a buffered column-major file for production — plus an
//! in-memory sink for inspection and tests.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

mod columnar;
mod csv_sink;
mod error;
mod memory;
mod reader;

pub use columnar::ColumnarMultiSink;
pub use csv_sink::CsvMultiSink;
pub use error::StoreError;
pub use memory::MemorySink;
pub use reader::read_rows;

/// Output format of the durable sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Row-oriented CSV, written record by record.
    Csv,
    /// Column-major JSON, buffered and written once at close.
    Columnar,
}

impl Format {
    /// Resolves the on-disk file for a stream's base path.
    pub fn stream_file(self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        match self {
            Format::Csv => path.set_extension("csv"),
            Format::Columnar => path.set_extension("columns.json"),
        };
        path
    }
}

/// A named-stream record sink.
///
/// `write` accepts any record for a declared stream, including the very
/// first one; `close` flushes everything and must be called before the
/// output is read. Implementations also flush from `drop` as a safety
/// net, but only `close` reports failures.
pub trait RecordSink {
    fn write(&mut self, stream: &str, record: Value) -> Result<(), StoreError>;
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Opens a durable sink of the given format over `(stream name, base path)`
/// pairs.
pub fn open_sink(
    format: Format,
    streams: Vec<(String, PathBuf)>,
) -> Result<Box<dyn RecordSink>, StoreError> {
    Ok(match format {
        Format::Csv => Box::new(CsvMultiSink::open(streams)?),
        Format::Columnar => Box::new(ColumnarMultiSink::open(streams)?),
    })
}

/// Serializes a row struct into the [`Value`] shape sinks accept.
pub fn to_record<T: Serialize>(row: &T) -> Result<Value, StoreError> {
    let value = serde_json::to_value(row).map_err(StoreError::Encode)?;
    match value {
        Value::Object(_) => Ok(value),
        _ => Err(StoreError::NotARecord),
    }
}

/// Deserializes buffered [`Value`] rows back into typed rows.
pub fn from_records<T: DeserializeOwned>(rows: &[Value]) -> Result<Vec<T>, StoreError> {
    rows.iter()
        .map(|row| serde_json::from_value(row.clone()).map_err(StoreError::Encode))
        .collect()
}

pub(crate) fn create_parent_dirs(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}
