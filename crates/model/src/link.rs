use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

/// A directed network edge. Only carried as a marker for [`Id`]; the
/// attributes live in [`LinkMeta`].
pub struct Link;

impl HasId for Link {
    type IdType = String;
}

/// Static per-link attributes derived from the network and schedule
/// descriptors. Immutable once the metadata stage has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMeta {
    /// Link length in meters.
    pub length: f64,
    /// Scheduled bus departures per hour, summed over every route whose
    /// link sequence contains this link.
    pub bus_frequency: f64,
}

/// Link table keyed by link id, in network-file order.
pub type LinkTable = IndexMap<Id<Link>, LinkMeta>;

/// Row shape used when the link table is persisted for downstream stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkMetaRow {
    pub link_id: Id<Link>,
    pub length: f64,
    pub bus_frequency: f64,
}
