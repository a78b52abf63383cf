use serde::{Deserialize, Serialize};
use utility::id::Id;

use crate::line::{Stop, TransitLine};
use crate::link::Link;
use crate::vehicle::Vehicle;

/// One completed link traversal by a tracked vehicle.
///
/// `line_id` and `passenger_load` are populated exactly when `is_bus` is
/// true; other vehicles only contribute to flow and speed statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub vehicle_id: Id<Vehicle>,
    pub link_id: Id<Link>,
    pub line_id: Option<Id<TransitLine>>,
    pub enter_time: f64,
    pub exit_time: f64,
    /// Link length in meters; the traversal covers the whole link.
    pub travel_distance: f64,
    pub passenger_load: Option<u32>,
    pub is_bus: bool,
}

impl LinkRecord {
    pub fn duration(&self) -> f64 {
        self.exit_time - self.enter_time
    }

    /// Hour bucket of the traversal, by enter time.
    pub fn hour(&self) -> i64 {
        (self.enter_time / 3600.0).floor() as i64
    }
}

/// One bus departure from a stop facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRecord {
    pub vehicle_id: Id<Vehicle>,
    pub stop_id: Id<Stop>,
    pub link_id: Id<Link>,
    pub line_id: Id<TransitLine>,
    /// Arrival time at the facility, seconds.
    pub timestamp: f64,
    /// Arrival delay after the headway-tolerance correction.
    pub schedule_deviation: f64,
    pub scheduled_headway: f64,
    pub boarding: u32,
    pub alighting: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hour_buckets_by_enter_time() {
        let record = LinkRecord {
            vehicle_id: Id::from("car_1"),
            link_id: Id::from("l1"),
            line_id: None,
            enter_time: 3599.0,
            exit_time: 3700.0,
            travel_distance: 500.0,
            passenger_load: None,
            is_bus: false,
        };
        assert_eq!(record.hour(), 0);
        assert_eq!(record.duration(), 101.0);
    }
}
