use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

/// A simulated vehicle. Marker for [`Id`].
pub struct Vehicle;

impl HasId for Vehicle {
    type IdType = String;
}

/// Classification of the transit fleet from the vehicles descriptor.
///
/// Buses are vehicles whose type id starts (case-insensitively) with the
/// configured prefix. Every other transit vehicle (tram, train, ferry) is
/// blacklisted: it still produces plain link traversals upstream of this
/// table, but the extractor refuses to track it.
#[derive(Debug, Default, Clone)]
pub struct FleetRegistry {
    buses: IndexMap<Id<Vehicle>, String>,
    blacklist: HashSet<Id<Vehicle>>,
}

impl FleetRegistry {
    pub fn register_bus(&mut self, vehicle_id: Id<Vehicle>, vehicle_type: String) {
        self.buses.insert(vehicle_id, vehicle_type);
    }

    pub fn register_blacklisted(&mut self, vehicle_id: Id<Vehicle>) {
        self.blacklist.insert(vehicle_id);
    }

    pub fn is_bus(&self, vehicle_id: &Id<Vehicle>) -> bool {
        self.buses.contains_key(vehicle_id)
    }

    pub fn is_blacklisted(&self, vehicle_id: &Id<Vehicle>) -> bool {
        self.blacklist.contains(vehicle_id)
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn blacklist_count(&self) -> usize {
        self.blacklist.len()
    }

    /// Bus vehicles with their type ids, in descriptor order.
    pub fn buses(&self) -> impl Iterator<Item = (&Id<Vehicle>, &str)> {
        self.buses.iter().map(|(id, ty)| (id, ty.as_str()))
    }
}

/// Row shape used when the bus fleet is persisted for downstream stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusVehicleRow {
    pub vehicle_id: Id<Vehicle>,
    pub vehicle_type: String,
}
