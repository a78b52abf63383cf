use std::fs::File;
use std::path::PathBuf;

use indexmap::IndexMap;
use log::warn;
use serde_json::Value;

use crate::{create_parent_dirs, Format, RecordSink, StoreError};

/// Row-streaming CSV sink. Every record is written as soon as it arrives;
/// the header comes from the key set of the first record of the stream.
pub struct CsvMultiSink {
    streams: IndexMap<String, CsvStream>,
    closed: bool,
}

struct CsvStream {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    header: Vec<String>,
}

impl CsvMultiSink {
    pub fn open(streams: Vec<(String, PathBuf)>) -> Result<Self, StoreError> {
        let mut prepared = IndexMap::new();
        for (name, base) in streams {
            let path = Format::Csv.stream_file(&base);
            create_parent_dirs(&path)?;
            prepared.insert(
                name,
                CsvStream {
                    path,
                    writer: None,
                    header: Vec::new(),
                },
            );
        }
        Ok(Self {
            streams: prepared,
            closed: false,
        })
    }
}

impl RecordSink for CsvMultiSink {
    fn write(&mut self, stream: &str, record: Value) -> Result<(), StoreError> {
        let slot = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::UnknownStream(stream.to_owned()))?;
        let record = match record {
            Value::Object(map) => map,
            _ => return Err(StoreError::NotARecord),
        };

        if slot.writer.is_none() {
            slot.header = record.keys().cloned().collect();
            let mut writer =
                csv::Writer::from_path(&slot.path).map_err(|source| StoreError::Csv {
                    path: slot.path.clone(),
                    source,
                })?;
            writer
                .write_record(&slot.header)
                .map_err(|source| StoreError::Csv {
                    path: slot.path.clone(),
                    source,
                })?;
            slot.writer = Some(writer);
        }

        let cells: Vec<String> = slot
            .header
            .iter()
            .map(|key| cell(record.get(key)))
            .collect();
        slot.writer
            .as_mut()
            .expect("writer created above")
            .write_record(&cells)
            .map_err(|source| StoreError::Csv {
                path: slot.path.clone(),
                source,
            })
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        for slot in self.streams.values_mut() {
            if let Some(writer) = slot.writer.as_mut() {
                writer.flush().map_err(|source| StoreError::Io {
                    path: slot.path.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

impl Drop for CsvMultiSink {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(why) = self.close() {
                warn!("csv sink dropped without close: {why}");
            }
        }
    }
}

/// Renders one field. Nested values (the per-line maps of the metric
/// tables) become embedded JSON, mirroring how the tables are consumed.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(nested) => nested.to_string(),
    }
}
