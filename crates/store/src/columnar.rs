use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use indexmap::IndexMap;
use log::{debug, warn};
use serde_json::{Map, Value};

use crate::{create_parent_dirs, Format, RecordSink, StoreError};

/// Buffered column-major sink for production runs.
///
/// Records accumulate in memory and are transposed into one column array
/// per field at close. The file is written under a temporary name and
/// renamed into place, so a crash mid-write never leaves a truncated
/// file under the production filename.
pub struct ColumnarMultiSink {
    streams: IndexMap<String, ColumnarStream>,
    closed: bool,
}

struct ColumnarStream {
    path: PathBuf,
    columns: IndexMap<String, Vec<Value>>,
    rows: usize,
}

impl ColumnarMultiSink {
    pub fn open(streams: Vec<(String, PathBuf)>) -> Result<Self, StoreError> {
        let mut prepared = IndexMap::new();
        for (name, base) in streams {
            let path = Format::Columnar.stream_file(&base);
            create_parent_dirs(&path)?;
            prepared.insert(
                name,
                ColumnarStream {
                    path,
                    columns: IndexMap::new(),
                    rows: 0,
                },
            );
        }
        Ok(Self {
            streams: prepared,
            closed: false,
        })
    }
}

impl RecordSink for ColumnarMultiSink {
    fn write(&mut self, stream: &str, record: Value) -> Result<(), StoreError> {
        let slot = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::UnknownStream(stream.to_owned()))?;
        let record = match record {
            Value::Object(map) => map,
            _ => return Err(StoreError::NotARecord),
        };

        if slot.columns.is_empty() {
            for key in record.keys() {
                slot.columns.insert(key.clone(), Vec::new());
            }
        }
        for (key, column) in slot.columns.iter_mut() {
            column.push(record.get(key).cloned().unwrap_or(Value::Null));
        }
        slot.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.closed = true;
        for slot in self.streams.values_mut() {
            if slot.rows == 0 {
                debug!("columnar stream {} is empty, skipping", slot.path.display());
                continue;
            }

            let mut document = Map::new();
            for (key, column) in slot.columns.drain(..) {
                document.insert(key, Value::Array(column));
            }

            let tmp_path = slot.path.with_extension("tmp");
            let file = File::create(&tmp_path).map_err(|source| StoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &Value::Object(document)).map_err(|source| {
                StoreError::Json {
                    path: tmp_path.clone(),
                    source,
                }
            })?;
            writer.flush().map_err(|source| StoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            std::fs::rename(&tmp_path, &slot.path).map_err(|source| StoreError::Io {
                path: slot.path.clone(),
                source,
            })?;
            slot.rows = 0;
        }
        Ok(())
    }
}

impl Drop for ColumnarMultiSink {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(why) = self.close() {
                warn!("columnar sink dropped without close: {why}");
            }
        }
    }
}
