use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stream '{0}' was not declared when the sink was opened")]
    UnknownStream(String),

    #[error("records must serialize to a flat key/value object")]
    NotARecord,

    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed columnar file {path}: {reason}")]
    MalformedColumnar { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("json error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
