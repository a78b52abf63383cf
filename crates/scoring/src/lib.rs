//! Metric aggregation and Level-of-Service scoring over the record
//! streams produced by the event extractor.

pub mod aggregate;
pub mod error;
pub mod los;
pub mod metrics;
mod propagation;

pub use aggregate::AggregationMode;
pub use error::ScoringError;
pub use los::{Grade, LosCalculator, ScoreRow};
pub use metrics::{LinkMetrics, MetricProcessor, MetricsTables};
