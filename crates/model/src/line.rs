use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utility::id::{HasId, Id};

use crate::link::Link;

/// A transit line as declared in the schedule. Marker for [`Id`].
pub struct TransitLine;

impl HasId for TransitLine {
    type IdType = String;
}

/// A stop facility. Marker for [`Id`].
pub struct Stop;

impl HasId for Stop {
    type IdType = String;
}

/// One route of a transit line: the ordered link sequence it drives, the
/// links that carry one of its stops, and its scheduled departures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitRoute {
    pub line_id: Id<TransitLine>,
    pub transport_mode: String,
    /// Ordered link sequence of the route.
    pub links: Vec<Id<Link>>,
    /// Links referenced by the route's stop profile (resolved through the
    /// stop-facility table).
    pub stop_links: BTreeSet<Id<Link>>,
    /// Departure times in seconds since the simulation midnight.
    pub departures: Vec<i64>,
}

/// Scheduled headway in seconds over a line's pooled departure times.
///
/// Departures are deduplicated and sorted first; a line with fewer than
/// two distinct departures has no defined headway.
pub fn scheduled_headway(departures: &[i64]) -> Option<f64> {
    let mut times: Vec<i64> = departures.to_vec();
    times.sort_unstable();
    times.dedup();

    if times.len() < 2 {
        return None;
    }
    let first = times[0];
    let last = times[times.len() - 1];
    Some((last - first) as f64 / (times.len() - 1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headway_over_evenly_spaced_departures() {
        // 00:00, 00:10, 00:20 -> 600 s
        assert_eq!(scheduled_headway(&[0, 600, 1200]), Some(600.0));
    }

    #[test]
    fn headway_deduplicates_and_sorts() {
        assert_eq!(scheduled_headway(&[1200, 0, 600, 600]), Some(600.0));
    }

    #[test]
    fn headway_undefined_for_single_departure() {
        assert_eq!(scheduled_headway(&[3600]), None);
        assert_eq!(scheduled_headway(&[]), None);
        assert_eq!(scheduled_headway(&[3600, 3600]), None);
    }

    #[test]
    fn headway_is_strictly_positive_when_defined() {
        let h = scheduled_headway(&[0, 1, 90_000]).unwrap();
        assert!(h > 0.0);
    }
}
