use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{from_records, RecordSink, StoreError};

/// Buffer-everything sink for tests and debug inspection. Accepts any
/// stream name without prior declaration.
#[derive(Debug, Default)]
pub struct MemorySink {
    streams: IndexMap<String, Vec<Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, stream: &str) -> &[Value] {
        self.streams.get(stream).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Buffered rows of a stream, decoded back into typed rows.
    pub fn decoded<T: DeserializeOwned>(&self, stream: &str) -> Result<Vec<T>, StoreError> {
        from_records(self.records(stream))
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, stream: &str, record: Value) -> Result<(), StoreError> {
        if !record.is_object() {
            return Err(StoreError::NotARecord);
        }
        self.streams.entry(stream.to_owned()).or_default().push(record);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
