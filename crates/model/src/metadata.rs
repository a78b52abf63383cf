use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utility::id::Id;

use crate::line::{TransitLine, TransitRoute};
use crate::link::LinkTable;
use crate::vehicle::FleetRegistry;

/// Everything the metadata stage extracts from the simulation
/// descriptors. Read-only for the rest of the pipeline.
#[derive(Debug, Default, Clone)]
pub struct SimulationMetadata {
    pub links: LinkTable,
    /// Scheduled headway per retained line; `None` when the line has
    /// fewer than two distinct departures.
    pub line_headways: IndexMap<Id<TransitLine>, Option<f64>>,
    /// Routes of all retained lines, in schedule order.
    pub routes: Vec<TransitRoute>,
    pub fleet: FleetRegistry,
}

impl SimulationMetadata {
    pub fn headway(&self, line_id: &Id<TransitLine>) -> Option<f64> {
        self.line_headways.get(line_id).copied().flatten()
    }
}

/// Row shape used when line headways are persisted for downstream stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineHeadwayRow {
    pub line_id: Id<TransitLine>,
    pub scheduled_headway: Option<f64>,
}
