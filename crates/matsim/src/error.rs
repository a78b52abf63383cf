use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatsimError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed xml in {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: quick_xml::Error,
    },

    #[error("malformed attribute in {path}: {source}")]
    XmlAttribute {
        path: PathBuf,
        #[source]
        source: quick_xml::events::attributes::AttrError,
    },

    #[error("event '{event_type}' is missing required attribute '{attribute}'")]
    MissingEventAttribute {
        event_type: String,
        attribute: String,
    },

    #[error("event '{event_type}' carries unparseable number '{value}' in attribute '{attribute}'")]
    MalformedEventNumber {
        event_type: String,
        attribute: String,
        value: String,
    },

    #[error("unparseable departure time '{value}' on line '{line_id}'")]
    MalformedDepartureTime { line_id: String, value: String },

    #[error(
        "element '{element}' in {path} has unparseable number '{value}' \
         in attribute '{attribute}'"
    )]
    MalformedNumber {
        path: PathBuf,
        element: String,
        attribute: String,
        value: String,
    },

    #[error("element '{element}' in {path} is missing required attribute '{attribute}'")]
    MissingElementAttribute {
        path: PathBuf,
        element: String,
        attribute: String,
    },

    #[error(
        "bus run of vehicle '{vehicle_id}' ended unbalanced: \
         {boarding} boardings, {alighting} alightings"
    )]
    UnbalancedBusRun {
        vehicle_id: String,
        boarding: u64,
        alighting: u64,
    },

    #[error(transparent)]
    Store(#[from] store::StoreError),
}
