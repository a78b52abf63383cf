//! System-wide LOS aggregation: one scalar per weighting perspective.

use indexmap::IndexMap;
use serde::Serialize;
use utility::id::Id;

use model::link::{Link, LinkTable};

use crate::los::ScoreRow;
use crate::metrics::LoadTotals;

/// The weighting perspective of the system-wide mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Weight by vehicle time spent on the link.
    OperatorVehTime,
    /// Weight by link length times offered capacity.
    OperatorLoad,
    /// Weight by passenger time spent on the link.
    PassengerTime,
    /// Weight by link length times mean on-board load.
    PassengerTrip,
}

impl AggregationMode {
    pub const ALL: [AggregationMode; 4] = [
        AggregationMode::OperatorVehTime,
        AggregationMode::OperatorLoad,
        AggregationMode::PassengerTime,
        AggregationMode::PassengerTrip,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AggregationMode::OperatorVehTime => "operator_veh_time",
            AggregationMode::OperatorLoad => "operator_load",
            AggregationMode::PassengerTime => "passenger_time",
            AggregationMode::PassengerTrip => "passenger_trip",
        }
    }
}

/// Weighted mean LOS over the scored links. Links without load totals or
/// link metadata carry no weight and drop out; `None` when nothing is
/// left to weigh.
pub fn aggregate_los(
    scores: &[ScoreRow],
    load_totals: &IndexMap<Id<Link>, LoadTotals>,
    links: &LinkTable,
    mode: AggregationMode,
) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;

    for row in scores {
        let Some(totals) = load_totals.get(&row.link_id) else {
            continue;
        };
        let Some(meta) = links.get(&row.link_id) else {
            continue;
        };

        let weight = match mode {
            AggregationMode::OperatorVehTime => totals.duration,
            AggregationMode::OperatorLoad => meta.length * totals.plan_cap_seconds,
            AggregationMode::PassengerTime => totals.pax_seconds,
            AggregationMode::PassengerTrip => {
                if totals.duration > 0.0 {
                    meta.length * (totals.pax_seconds / totals.duration)
                } else {
                    0.0
                }
            }
        };
        weighted_sum += row.los * weight;
        weight_sum += weight;
    }

    (weight_sum > 0.0).then(|| weighted_sum / weight_sum)
}
