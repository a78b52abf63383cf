//! Closed-form Level-of-Service scoring over the filtered per-link
//! metric table.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use store::RecordSink;
use utility::id::Id;

use model::config::ScoringParams;
use model::line::TransitLine;
use model::link::Link;

use crate::metrics::LinkMetrics;
use crate::ScoringError;

/// Six-band service grade over the LOS value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Grade {
    pub fn from_los(los: f64) -> Grade {
        if los <= 2.0 {
            Grade::A
        } else if los <= 2.75 {
            Grade::B
        } else if los <= 3.5 {
            Grade::C
        } else if los <= 4.25 {
            Grade::D
        } else if los <= 5.0 {
            Grade::E
        } else {
            Grade::F
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::F => "F",
        };
        write!(f, "{letter}")
    }
}

/// One scored row; `line_id` is set on the per-line table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub link_id: Id<Link>,
    pub line_id: Option<Id<TransitLine>>,
    pub wait_ride_score: f64,
    pub ped_score: f64,
    pub los: f64,
    pub los_grade: Grade,
}

/// A scored table plus the rows that could not be scored for lack of
/// metrics.
#[derive(Debug, Default)]
pub struct ScoredTable {
    pub rows: Vec<ScoreRow>,
    pub skipped: u64,
}

/// The metric inputs of one scoring evaluation.
struct ScoreInputs {
    bus_frequency: f64,
    avg_load_factor: f64,
    avg_bus_speed: f64,
    ewt: f64,
    veh_flow: f64,
    avg_speed: f64,
}

/// Skips the current row when a required metric is absent.
macro_rules! some_or_skip {
    ($value:expr, $table:ident, $subject:expr) => {
        match $value {
            Some(value) => value,
            None => {
                warn!("skipping {:?}: missing metric", $subject);
                $table.skipped += 1;
                continue;
            }
        }
    };
}

pub struct LosCalculator<'a> {
    params: &'a ScoringParams,
    /// Mean passenger trip length in meters.
    avg_trip_length: f64,
}

impl<'a> LosCalculator<'a> {
    pub fn new(params: &'a ScoringParams, avg_trip_length: Option<f64>) -> Result<Self, ScoringError> {
        match avg_trip_length {
            Some(length) if length > 0.0 => Ok(Self {
                params,
                avg_trip_length: length,
            }),
            _ => Err(ScoringError::MissingTripLength),
        }
    }

    /// Scores the filtered per-link table.
    pub fn score_links(
        &self,
        filtered: &IndexMap<Id<Link>, LinkMetrics>,
    ) -> Result<ScoredTable, ScoringError> {
        let mut table = ScoredTable::default();
        for (link_id, metrics) in filtered {
            let inputs = ScoreInputs {
                bus_frequency: metrics.bus_frequency,
                avg_load_factor: some_or_skip!(metrics.avg_load_factor, table, link_id),
                avg_bus_speed: some_or_skip!(metrics.avg_bus_speed, table, link_id),
                ewt: some_or_skip!(metrics.ewt, table, link_id),
                veh_flow: some_or_skip!(metrics.veh_flow, table, link_id),
                avg_speed: some_or_skip!(metrics.avg_speed, table, link_id),
            };
            table
                .rows
                .push(self.score_row(link_id.clone(), None, &inputs)?);
        }
        info!(
            "scored {} links ({} skipped for missing metrics)",
            table.rows.len(),
            table.skipped
        );
        Ok(table)
    }

    /// Expands the filtered table to (link, line) rows and scores them,
    /// preferring line-specific metrics and falling back to the link
    /// level where a line has none.
    pub fn score_lines(
        &self,
        filtered: &IndexMap<Id<Link>, LinkMetrics>,
    ) -> Result<ScoredTable, ScoringError> {
        let mut table = ScoredTable::default();
        for (link_id, metrics) in filtered {
            let lines: BTreeSet<&Id<TransitLine>> = metrics
                .ewt_per_line
                .keys()
                .chain(metrics.avg_bus_speed_per_line.keys())
                .chain(metrics.avg_load_factor_per_line.keys())
                .collect();

            for line_id in lines {
                let subject = (link_id, line_id);
                let inputs = ScoreInputs {
                    bus_frequency: metrics.bus_frequency,
                    avg_load_factor: some_or_skip!(
                        metrics
                            .avg_load_factor_per_line
                            .get(line_id)
                            .copied()
                            .or(metrics.avg_load_factor),
                        table,
                        subject
                    ),
                    avg_bus_speed: some_or_skip!(
                        metrics
                            .avg_bus_speed_per_line
                            .get(line_id)
                            .copied()
                            .or(metrics.avg_bus_speed),
                        table,
                        subject
                    ),
                    ewt: some_or_skip!(
                        metrics.ewt_per_line.get(line_id).copied().or(metrics.ewt),
                        table,
                        subject
                    ),
                    veh_flow: some_or_skip!(metrics.veh_flow, table, subject),
                    avg_speed: some_or_skip!(metrics.avg_speed, table, subject),
                };
                table
                    .rows
                    .push(self.score_row(link_id.clone(), Some(line_id.clone()), &inputs)?);
            }
        }
        info!(
            "scored {} link-line pairs ({} skipped for missing metrics)",
            table.rows.len(),
            table.skipped
        );
        Ok(table)
    }

    fn score_row(
        &self,
        link_id: Id<Link>,
        line_id: Option<Id<TransitLine>>,
        inputs: &ScoreInputs,
    ) -> Result<ScoreRow, ScoringError> {
        let subject = match &line_id {
            Some(line) => format!("link {link_id}, line {line}"),
            None => format!("link {link_id}"),
        };
        let wait_ride_score = self.wait_ride_score(inputs, &subject)?;
        let ped_score = self.ped_score(inputs);
        let los = 6.0 - 1.5 * wait_ride_score + 0.15 * ped_score;
        Ok(ScoreRow {
            link_id,
            line_id,
            wait_ride_score,
            ped_score,
            los,
            los_grade: Grade::from_los(los),
        })
    }

    /// Transit wait-ride score: headway factor times travel-time factor.
    fn wait_ride_score(&self, inputs: &ScoreInputs, subject: &str) -> Result<f64, ScoringError> {
        let headway_factor = Self::headway_factor(inputs.bus_frequency);
        let load_weight = Self::load_factor_weight(inputs.avg_load_factor);
        let bus_speed_kmh = inputs.avg_bus_speed * 3.6;
        // Excess wait minutes per passenger kilometer.
        let excess_wait = (inputs.ewt / 60.0) / (self.avg_trip_length / 1000.0);
        let amenity = self.amenity_time();

        let perceived_tt = load_weight * (60.0 / bus_speed_kmh) + 2.0 * excess_wait - amenity;
        let travel_time_factor = self.travel_time_factor(perceived_tt, subject)?;
        Ok(headway_factor * travel_time_factor)
    }

    fn headway_factor(frequency: f64) -> f64 {
        4.0 * (-1.434 / (frequency + 0.001)).exp()
    }

    /// Crowding penalty. Free until 80% of plan capacity, rising smoothly
    /// through seated crush and again past standing load.
    fn load_factor_weight(load_factor: f64) -> f64 {
        if load_factor <= 0.8 {
            return 1.0;
        }
        let base = 1.0 + 4.0 * (load_factor - 0.8) / (4.2 * load_factor);
        if load_factor <= 1.0 {
            base
        } else {
            base + (load_factor - 1.0) * (6.5 + 5.0 * (load_factor - 1.0)) / (4.2 * load_factor)
        }
    }

    fn travel_time_factor(&self, perceived_tt: f64, subject: &str) -> Result<f64, ScoringError> {
        let elasticity = self.params.wait_ride.elas;
        let base_tt = self.params.wait_ride.base_travel_time;
        let numerator = (elasticity - 1.0) * base_tt - (elasticity + 1.0) * perceived_tt;
        let denominator = (elasticity - 1.0) * perceived_tt - (elasticity + 1.0) * base_tt;
        if denominator == 0.0 {
            return Err(ScoringError::DegenerateTravelTime {
                subject: subject.to_owned(),
            });
        }
        Ok(numerator / denominator)
    }

    /// Perceived minutes saved by stop amenities, per trip.
    fn amenity_time(&self) -> f64 {
        let amenity = &self.params.amenity;
        (amenity.shelter * amenity.shelter_rate + amenity.bench * amenity.bench_rate)
            / self.avg_trip_length
    }

    /// Pedestrian-environment score from the highway-capacity
    /// cross-section model.
    fn ped_score(&self, inputs: &ScoreInputs) -> f64 {
        let ped = &self.params.ped_env;

        let volume_factor = 0.0091 * inputs.veh_flow / 4.0;
        let speed_mph = inputs.avg_speed * 3.6 / 1.6;
        let speed_factor = 4.0 * (speed_mph / 100.0).powi(2);

        let adjusted_parking_width = (ped.parking_lane_width - 1.5).max(0.0);
        let parking = ped.street_parking;
        let bike_parking_width = if parking >= 0.25 {
            10.0
        } else {
            ped.bike_lane_width + adjusted_parking_width
        };
        let total_width = if parking == 0.0 {
            ped.outside_lane_width + ped.bike_lane_width + adjusted_parking_width
        } else {
            ped.outside_lane_width + ped.bike_lane_width
        };
        let effective_width = if inputs.veh_flow > ped.volume_threshold {
            total_width
        } else {
            total_width * (2.0 - 0.005 * inputs.veh_flow)
        };

        let buffer_index = ped.sidewalk_buffer * ped.buffer_coeff;
        let adjusted_sidewalk = ped.sidewalk_width.min(10.0);
        let sidewalk_index = adjusted_sidewalk * (6.0 - 0.3 * adjusted_sidewalk);

        let cross_section_factor = -1.2276
            * (effective_width + 0.5 * bike_parking_width + 50.0 * parking + buffer_index
                + sidewalk_index)
                .ln();

        6.0468 + cross_section_factor + volume_factor + speed_factor
    }
}

/// Writes a scored table through the record store.
pub fn persist_scores(
    stream: &str,
    table: &ScoredTable,
    sink: &mut dyn RecordSink,
) -> Result<(), ScoringError> {
    for row in &table.rows {
        let record = match &row.line_id {
            Some(line_id) => json!({
                "link_id": row.link_id,
                "line_id": line_id,
                "wait_ride_score": row.wait_ride_score,
                "ped_score": row.ped_score,
                "los": row.los,
                "los_grade": row.los_grade,
            }),
            None => json!({
                "link_id": row.link_id,
                "wait_ride_score": row.wait_ride_score,
                "ped_score": row.ped_score,
                "los": row.los,
                "los_grade": row.los_grade,
            }),
        };
        sink.write(stream, record)?;
    }
    Ok(())
}
