//! The metric processor: turns the two record streams into per-link and
//! per-(link, line) performance metrics.

use std::collections::{BTreeMap, HashSet};

use indexmap::IndexMap;
use itertools::Itertools;
use log::{info, warn};
use serde_json::json;
use store::RecordSink;
use utility::id::Id;

use model::config::Config;
use model::line::TransitLine;
use model::link::Link;
use model::metadata::SimulationMetadata;
use model::record::{LinkRecord, StopRecord};

use crate::propagation::propagate_ewt;
use crate::ScoringError;

/// Consecutive records of one vehicle further apart than this belong to
/// distinct trips. Matches the slicing the upstream simulator applies at
/// hour boundaries; deliberately not configurable.
pub const TRIP_BOUNDARY_GAP_SECONDS: f64 = 60.0;

/// Aggregated metrics of one link. Fields are `None` where the event log
/// never produced the underlying records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkMetrics {
    pub length: f64,
    pub bus_frequency: f64,
    pub veh_flow: Option<f64>,
    pub avg_speed: Option<f64>,
    pub avg_bus_speed: Option<f64>,
    pub avg_load_factor: Option<f64>,
    pub ewt: Option<f64>,
    pub ewt_per_line: IndexMap<Id<TransitLine>, f64>,
    pub avg_bus_speed_per_line: IndexMap<Id<TransitLine>, f64>,
    pub avg_load_factor_per_line: IndexMap<Id<TransitLine>, f64>,
}

/// Per-link weights for the system-wide aggregation, from the bus load
/// slices.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadTotals {
    pub duration: f64,
    pub pax_seconds: f64,
    pub plan_cap_seconds: f64,
}

#[derive(Debug, Default)]
pub struct MetricsTables {
    /// Every link of the network table, enriched with metrics.
    pub merged: IndexMap<Id<Link>, LinkMetrics>,
    /// Links with scheduled bus service (`bus_frequency > 0`).
    pub filtered: IndexMap<Id<Link>, LinkMetrics>,
    /// Links without scheduled bus service.
    pub outlier: IndexMap<Id<Link>, LinkMetrics>,
    pub load_totals: IndexMap<Id<Link>, LoadTotals>,
    /// Mean passenger trip length in meters, when derivable.
    pub avg_trip_length: Option<f64>,
    pub inconsistent_link_records: u64,
    pub inconsistent_stop_records: u64,
}

pub struct MetricProcessor<'a> {
    config: &'a Config,
    metadata: &'a SimulationMetadata,
}

impl<'a> MetricProcessor<'a> {
    pub fn new(config: &'a Config, metadata: &'a SimulationMetadata) -> Self {
        Self { config, metadata }
    }

    pub fn process(
        &self,
        link_records: &[LinkRecord],
        stop_records: &[StopRecord],
    ) -> MetricsTables {
        let mut tables = MetricsTables::default();

        // Records referencing links outside the network table cannot be
        // attributed; drop them and report once at the end.
        let link_records: Vec<&LinkRecord> = link_records
            .iter()
            .filter(|record| {
                let known = self.metadata.links.contains_key(&record.link_id);
                if !known {
                    tables.inconsistent_link_records += 1;
                }
                known
            })
            .collect();

        let flow = self.vehicle_flow(&link_records);
        let (mut ewt_links, mut ewt_lines) =
            self.excess_wait_time(stop_records, &mut tables.inconsistent_stop_records);

        let actual_times = bus_trip_durations(&link_records);
        let bus_links: HashSet<Id<Link>> = self
            .metadata
            .links
            .iter()
            .filter(|(_, meta)| meta.bus_frequency > 0.0)
            .map(|(id, _)| id.clone())
            .collect();
        propagate_ewt(
            &self.metadata.routes,
            &bus_links,
            &self.metadata.links,
            &flow.avg_speed,
            &actual_times,
            &mut ewt_links,
            &mut ewt_lines,
        );

        let load = self.load_factors(&link_records, &mut tables.load_totals);

        tables.avg_trip_length = self
            .config
            .scoring
            .wait_ride
            .avg_trip_length
            .or_else(|| average_trip_length(&link_records));

        for (link_id, meta) in &self.metadata.links {
            let row = LinkMetrics {
                length: meta.length,
                bus_frequency: meta.bus_frequency,
                veh_flow: flow.veh_flow.get(link_id).copied(),
                avg_speed: flow.avg_speed.get(link_id).copied(),
                avg_bus_speed: flow.avg_bus_speed.get(link_id).copied(),
                avg_load_factor: load.per_link.get(link_id).copied(),
                ewt: ewt_links.get(link_id).copied(),
                ewt_per_line: per_line_map(&ewt_lines, link_id),
                avg_bus_speed_per_line: per_line_map(&flow.avg_bus_speed_per_line, link_id),
                avg_load_factor_per_line: per_line_map(&load.per_line, link_id),
            };
            if row.bus_frequency > 0.0 {
                tables.filtered.insert(link_id.clone(), row.clone());
            } else {
                tables.outlier.insert(link_id.clone(), row.clone());
            }
            tables.merged.insert(link_id.clone(), row);
        }

        if tables.inconsistent_link_records > 0 || tables.inconsistent_stop_records > 0 {
            warn!(
                "dropped {} link records and {} stop records referencing unknown metadata",
                tables.inconsistent_link_records, tables.inconsistent_stop_records
            );
        }
        info!(
            "metrics: {} links ({} with bus service), avg trip length {:?} m",
            tables.merged.len(),
            tables.filtered.len(),
            tables.avg_trip_length
        );
        tables
    }

    /// Hour-bucketed vehicle flow and the speed estimates.
    fn vehicle_flow(&self, records: &[&LinkRecord]) -> FlowStats {
        #[derive(Default)]
        struct Sums {
            duration: f64,
            distance: f64,
        }

        let mut hourly: BTreeMap<Id<Link>, BTreeMap<i64, u64>> = BTreeMap::new();
        let mut per_link: BTreeMap<Id<Link>, Sums> = BTreeMap::new();
        let mut per_bus_link: BTreeMap<Id<Link>, Sums> = BTreeMap::new();
        let mut per_bus_line: BTreeMap<(Id<Link>, Id<TransitLine>), Sums> = BTreeMap::new();

        for record in records {
            *hourly
                .entry(record.link_id.clone())
                .or_default()
                .entry(record.hour())
                .or_default() += 1;
            let sums = per_link.entry(record.link_id.clone()).or_default();
            sums.duration += record.duration();
            sums.distance += record.travel_distance;

            if record.is_bus {
                let sums = per_bus_link.entry(record.link_id.clone()).or_default();
                sums.duration += record.duration();
                sums.distance += record.travel_distance;
                if let Some(line_id) = &record.line_id {
                    let sums = per_bus_line
                        .entry((record.link_id.clone(), line_id.clone()))
                        .or_default();
                    sums.duration += record.duration();
                    sums.distance += record.travel_distance;
                }
            }
        }

        let speed = |sums: &Sums| (sums.duration > 0.0).then(|| sums.distance / sums.duration);

        FlowStats {
            veh_flow: hourly
                .into_iter()
                .map(|(link, hours)| {
                    let total: u64 = hours.values().sum();
                    (link, total as f64 / hours.len() as f64)
                })
                .collect(),
            avg_speed: per_link
                .iter()
                .filter_map(|(link, sums)| speed(sums).map(|s| (link.clone(), s)))
                .collect(),
            avg_bus_speed: per_bus_link
                .iter()
                .filter_map(|(link, sums)| speed(sums).map(|s| (link.clone(), s)))
                .collect(),
            avg_bus_speed_per_line: nest_by_link(
                per_bus_line
                    .iter()
                    .filter_map(|(key, sums)| speed(sums).map(|s| (key.clone(), s))),
            ),
        }
    }

    /// Passenger-weighted excess wait time with the boarding-count
    /// fallback, per link and per link×line.
    fn excess_wait_time(
        &self,
        stop_records: &[StopRecord],
        inconsistent: &mut u64,
    ) -> (
        BTreeMap<Id<Link>, f64>,
        BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, f64>>,
    ) {
        #[derive(Default)]
        struct Acc {
            weighted_deviation: f64,
            boardings: u64,
            deviation_sum: f64,
            count: u64,
        }

        impl Acc {
            fn push(&mut self, record: &StopRecord) {
                self.weighted_deviation +=
                    record.schedule_deviation * record.boarding as f64;
                self.boardings += record.boarding as u64;
                self.deviation_sum += record.schedule_deviation;
                self.count += 1;
            }

            fn estimate(&self, boarding_threshold: u32) -> f64 {
                if self.boardings >= boarding_threshold as u64 && self.boardings > 0 {
                    self.weighted_deviation / self.boardings as f64
                } else {
                    self.deviation_sum / self.count as f64
                }
            }
        }

        let threshold = self.config.scoring.wait_ride.boarding_threshold;
        let mut per_link: BTreeMap<Id<Link>, Acc> = BTreeMap::new();
        let mut per_line: BTreeMap<(Id<Link>, Id<TransitLine>), Acc> = BTreeMap::new();

        for record in stop_records {
            if self.metadata.headway(&record.line_id).is_none() {
                *inconsistent += 1;
                continue;
            }
            per_link
                .entry(record.link_id.clone())
                .or_default()
                .push(record);
            per_line
                .entry((record.link_id.clone(), record.line_id.clone()))
                .or_default()
                .push(record);
        }

        let links = per_link
            .into_iter()
            .map(|(link, acc)| (link, acc.estimate(threshold)))
            .collect();
        let mut lines: BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, f64>> = BTreeMap::new();
        for ((link, line), acc) in per_line {
            lines
                .entry(link)
                .or_default()
                .insert(line, acc.estimate(threshold));
        }
        (links, lines)
    }

    /// Load factors from the bus load slices, pax-second weighted with a
    /// simple-mean fallback for thin groups.
    fn load_factors(
        &self,
        records: &[&LinkRecord],
        load_totals: &mut IndexMap<Id<Link>, LoadTotals>,
    ) -> LoadStats {
        #[derive(Default)]
        struct Acc {
            total_pax: u64,
            weighted_lf: f64,
            pax_seconds: f64,
            instant_lfs: Vec<f64>,
        }

        impl Acc {
            fn estimate(&self, total_load_threshold: u32) -> f64 {
                if self.total_pax >= total_load_threshold as u64 && self.pax_seconds > 0.0 {
                    self.weighted_lf / self.pax_seconds
                } else {
                    self.instant_lfs.iter().sum::<f64>() / self.instant_lfs.len() as f64
                }
            }
        }

        let plan_capacity = self.config.bus.plan_capacity();
        let threshold = self.config.scoring.wait_ride.total_load_threshold;
        let mut per_link: BTreeMap<Id<Link>, Acc> = BTreeMap::new();
        let mut per_line: BTreeMap<(Id<Link>, Id<TransitLine>), Acc> = BTreeMap::new();
        let mut totals: BTreeMap<Id<Link>, LoadTotals> = BTreeMap::new();

        for record in records {
            if !record.is_bus {
                continue;
            }
            let Some(load) = record.passenger_load else {
                continue;
            };
            let duration = record.duration();
            let pax_seconds = load as f64 * duration;
            let instant_lf = if plan_capacity > 0.0 {
                load as f64 / plan_capacity
            } else {
                0.0
            };

            let entry = totals.entry(record.link_id.clone()).or_default();
            entry.duration += duration;
            entry.pax_seconds += pax_seconds;
            entry.plan_cap_seconds += plan_capacity * duration;

            let bump = |acc: &mut Acc| {
                acc.total_pax += load as u64;
                acc.weighted_lf += instant_lf * pax_seconds;
                acc.pax_seconds += pax_seconds;
                acc.instant_lfs.push(instant_lf);
            };
            bump(per_link.entry(record.link_id.clone()).or_default());
            if let Some(line) = &record.line_id {
                bump(
                    per_line
                        .entry((record.link_id.clone(), line.clone()))
                        .or_default(),
                );
            }
        }

        for (link, entry) in totals {
            load_totals.insert(link, entry);
        }

        LoadStats {
            per_link: per_link
                .into_iter()
                .map(|(link, acc)| (link, acc.estimate(threshold)))
                .collect(),
            per_line: nest_by_link(
                per_line
                    .into_iter()
                    .map(|(key, acc)| (key, acc.estimate(threshold))),
            ),
        }
    }
}

struct FlowStats {
    veh_flow: BTreeMap<Id<Link>, f64>,
    avg_speed: BTreeMap<Id<Link>, f64>,
    avg_bus_speed: BTreeMap<Id<Link>, f64>,
    avg_bus_speed_per_line: BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, f64>>,
}

struct LoadStats {
    per_link: BTreeMap<Id<Link>, f64>,
    per_line: BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, f64>>,
}

fn nest_by_link(
    flat: impl Iterator<Item = ((Id<Link>, Id<TransitLine>), f64)>,
) -> BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, f64>> {
    let mut nested: BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, f64>> = BTreeMap::new();
    for ((link, line), value) in flat {
        nested.entry(link).or_default().insert(line, value);
    }
    nested
}

/// Mean per-trip traversal time of each (link, line), used as the
/// "actual time" during EWT propagation. Records of one vehicle on one
/// link are first grouped into trips at the boundary gap.
pub(crate) fn bus_trip_durations(
    records: &[&LinkRecord],
) -> BTreeMap<(Id<Link>, Id<TransitLine>), f64> {
    let mut durations: BTreeMap<(Id<Link>, Id<TransitLine>), Vec<f64>> = BTreeMap::new();

    let bus_records = records
        .iter()
        .filter(|record| record.is_bus && record.line_id.is_some())
        .sorted_by(|a, b| {
            (&a.vehicle_id, &a.link_id)
                .cmp(&(&b.vehicle_id, &b.link_id))
                .then(a.enter_time.total_cmp(&b.enter_time))
        });

    for ((_, link_id), group) in
        &bus_records.chunk_by(|record| (record.vehicle_id.clone(), record.link_id.clone()))
    {
        let mut previous_enter: Option<f64> = None;
        let mut trip_duration = 0.0;
        let mut trip_line: Option<Id<TransitLine>> = None;

        for record in group {
            let boundary = previous_enter
                .map(|previous| record.enter_time - previous > TRIP_BOUNDARY_GAP_SECONDS)
                .unwrap_or(false);
            if boundary {
                if let Some(line) = trip_line.take() {
                    durations
                        .entry((link_id.clone(), line))
                        .or_default()
                        .push(trip_duration);
                }
                trip_duration = 0.0;
            }
            trip_duration += record.duration();
            trip_line = record.line_id.clone();
            previous_enter = Some(record.enter_time);
        }
        if let Some(line) = trip_line {
            durations
                .entry((link_id.clone(), line))
                .or_default()
                .push(trip_duration);
        }
    }

    durations
        .into_iter()
        .map(|(key, trips)| {
            let mean = trips.iter().sum::<f64>() / trips.len() as f64;
            (key, mean)
        })
        .collect()
}

/// Mean distance of per-vehicle trips, over all tracked vehicles. A gap
/// of more than the boundary constant between leaving one link and
/// entering the next starts a new trip.
fn average_trip_length(records: &[&LinkRecord]) -> Option<f64> {
    let mut distances: Vec<f64> = Vec::new();

    let ordered = records.iter().sorted_by(|a, b| {
        a.vehicle_id
            .cmp(&b.vehicle_id)
            .then(a.enter_time.total_cmp(&b.enter_time))
    });

    for (_, group) in &ordered.chunk_by(|record| record.vehicle_id.clone()) {
        let mut previous_exit: Option<f64> = None;
        let mut trip_distance = 0.0;

        for record in group {
            let boundary = previous_exit
                .map(|exit| record.enter_time - exit > TRIP_BOUNDARY_GAP_SECONDS)
                .unwrap_or(false);
            if boundary {
                distances.push(trip_distance);
                trip_distance = 0.0;
            }
            trip_distance += record.travel_distance;
            previous_exit = Some(record.exit_time);
        }
        distances.push(trip_distance);
    }

    let positive: Vec<f64> = distances.into_iter().filter(|d| *d > 0.0).collect();
    if positive.is_empty() {
        return None;
    }
    Some(positive.iter().sum::<f64>() / positive.len() as f64)
}

fn per_line_map<T: Copy>(
    source: &BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, T>>,
    link_id: &Id<Link>,
) -> IndexMap<Id<TransitLine>, T> {
    source
        .get(link_id)
        .map(|lines| lines.iter().map(|(line, value)| (line.clone(), *value)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use model::config::Config;
    use model::line::TransitRoute;
    use model::link::LinkMeta;
    use model::record::{LinkRecord, StopRecord};
    use model::vehicle::Vehicle;

    use super::*;

    fn test_config() -> Config {
        serde_json::from_value(serde_json::json!({
            "files": {
                "inputs": {
                    "network": "net.xml",
                    "transit_schedule": "schedule.xml",
                    "transit_vehicles": "vehicles.xml",
                    "events": "events.xml.gz"
                },
                "metadata": {
                    "link_data": "m/link_data",
                    "line_headway": "m/line_headway",
                    "bus_vehicles": "m/bus_vehicles"
                },
                "data": {
                    "link_records": "d/link_records",
                    "stop_records": "d/stop_records",
                    "avg_trip_length": "d/avg_trip_length.json"
                },
                "los": {
                    "merged": "l/merged",
                    "filtered": "l/filtered",
                    "outlier": "l/outlier",
                    "scores": "l/scores",
                    "line_scores": "l/line_scores",
                    "aggregates": "l/aggregates.json"
                }
            }
        }))
        .unwrap()
    }

    fn test_metadata() -> SimulationMetadata {
        let mut metadata = SimulationMetadata::default();
        for (id, length, frequency) in [
            ("l1", 1000.0, 1.5),
            ("l2", 500.0, 1.5),
            ("side", 250.0, 0.0),
        ] {
            metadata.links.insert(
                Id::from(id),
                LinkMeta {
                    length,
                    bus_frequency: frequency,
                },
            );
        }
        metadata
            .line_headways
            .insert(Id::from("L1"), Some(600.0));
        metadata.routes.push(TransitRoute {
            line_id: Id::from("L1"),
            transport_mode: "bus".to_owned(),
            links: vec![Id::from("l1"), Id::from("l2")],
            stop_links: [Id::from("l1")].into_iter().collect(),
            departures: vec![21_600, 22_200],
        });
        metadata
    }

    fn link_record(
        vehicle: &str,
        link: &str,
        line: Option<&str>,
        enter: f64,
        exit: f64,
        distance: f64,
        load: Option<u32>,
    ) -> LinkRecord {
        LinkRecord {
            vehicle_id: Id::<Vehicle>::from(vehicle),
            link_id: Id::from(link),
            line_id: line.map(Id::from),
            enter_time: enter,
            exit_time: exit,
            travel_distance: distance,
            passenger_load: load,
            is_bus: load.is_some(),
        }
    }

    fn stop_record(link: &str, line: &str, deviation: f64, boarding: u32) -> StopRecord {
        StopRecord {
            vehicle_id: Id::from("bus_1"),
            stop_id: Id::from("s1"),
            link_id: Id::from(link),
            line_id: Id::from(line),
            timestamp: 21_600.0,
            schedule_deviation: deviation,
            scheduled_headway: 600.0,
            boarding,
            alighting: 0,
        }
    }

    #[test]
    fn vehicle_flow_averages_hourly_counts() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        // Three traversals in hour 6, one in hour 7.
        let records = vec![
            link_record("car_1", "l1", None, 21_700.0, 21_800.0, 1000.0, None),
            link_record("car_2", "l1", None, 22_000.0, 22_100.0, 1000.0, None),
            link_record("car_3", "l1", None, 23_000.0, 23_100.0, 1000.0, None),
            link_record("car_1", "l1", None, 25_300.0, 25_500.0, 1000.0, None),
        ];
        let tables = processor.process(&records, &[]);

        let row = &tables.merged[&Id::from("l1")];
        assert_eq!(row.veh_flow, Some(2.0));
        // 4000 m over 500 s.
        assert_eq!(row.avg_speed, Some(8.0));
        assert_eq!(row.avg_bus_speed, None);
    }

    #[test]
    fn bus_speed_is_tracked_per_link_and_line() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        let records = vec![
            link_record("bus_1", "l1", Some("L1"), 21_600.0, 21_700.0, 1000.0, Some(0)),
            link_record("car_1", "l1", None, 21_600.0, 21_850.0, 1000.0, None),
        ];
        let tables = processor.process(&records, &[]);

        let row = &tables.merged[&Id::from("l1")];
        assert_eq!(row.avg_bus_speed, Some(10.0));
        assert_eq!(row.avg_bus_speed_per_line[&Id::from("L1")], 10.0);
        // All-vehicle speed mixes the slower car in.
        assert_eq!(row.avg_speed, Some(2000.0 / 350.0));
    }

    #[test]
    fn ewt_uses_weighted_mean_above_threshold() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        // 12 boardings in total, threshold is 10: passenger-weighted.
        let stops = vec![
            stop_record("l1", "L1", 30.0, 9),
            stop_record("l1", "L1", 120.0, 3),
        ];
        let tables = processor.process(&[], &stops);

        let expected = (30.0 * 9.0 + 120.0 * 3.0) / 12.0;
        let row = &tables.merged[&Id::from("l1")];
        assert_eq!(row.ewt, Some(expected));
        assert_eq!(row.ewt_per_line[&Id::from("L1")], expected);
    }

    #[test]
    fn ewt_falls_back_to_simple_mean_below_threshold() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        let stops = vec![
            stop_record("l1", "L1", 30.0, 1),
            stop_record("l1", "L1", 120.0, 1),
        ];
        let tables = processor.process(&[], &stops);

        assert_eq!(tables.merged[&Id::from("l1")].ewt, Some(75.0));
    }

    #[test]
    fn stop_records_for_unknown_lines_are_counted_and_dropped() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        let stops = vec![stop_record("l1", "ghost_line", 30.0, 5)];
        let tables = processor.process(&[], &stops);

        assert_eq!(tables.inconsistent_stop_records, 1);
        assert_eq!(tables.merged[&Id::from("l1")].ewt, None);
    }

    #[test]
    fn load_factor_weighted_and_fallback() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);
        let capacity = config.bus.plan_capacity();

        // l1 carries 12 passengers in total (above the threshold of 10),
        // l2 only 2 (fallback to the simple mean of instant factors).
        let records = vec![
            link_record("bus_1", "l1", Some("L1"), 21_600.0, 21_700.0, 1000.0, Some(8)),
            link_record("bus_2", "l1", Some("L1"), 22_600.0, 22_800.0, 1000.0, Some(4)),
            link_record("bus_1", "l2", Some("L1"), 21_700.0, 21_750.0, 500.0, Some(2)),
        ];
        let tables = processor.process(&records, &[]);

        let lf = |load: f64| load / capacity;
        let weighted = (lf(8.0) * 800.0 + lf(4.0) * 800.0) / 1600.0;
        let row_l1 = &tables.merged[&Id::from("l1")];
        assert!((row_l1.avg_load_factor.unwrap() - weighted).abs() < 1e-12);

        let row_l2 = &tables.merged[&Id::from("l2")];
        assert!((row_l2.avg_load_factor.unwrap() - lf(2.0)).abs() < 1e-12);

        let totals = &tables.load_totals[&Id::from("l1")];
        assert_eq!(totals.duration, 300.0);
        assert_eq!(totals.pax_seconds, 1600.0);
        assert_eq!(totals.plan_cap_seconds, capacity * 300.0);
    }

    #[test]
    fn ewt_propagates_to_stopless_route_links() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        // Measured EWT on l1 only; l2 is on the route but has no stop
        // records, so it receives the propagated value.
        let records = vec![
            link_record("bus_1", "l1", Some("L1"), 21_600.0, 21_700.0, 1000.0, Some(0)),
            link_record("bus_1", "l2", Some("L1"), 21_700.0, 21_750.0, 500.0, Some(0)),
        ];
        let stops = vec![stop_record("l1", "L1", 30.0, 12)];
        let tables = processor.process(&records, &stops);

        assert_eq!(tables.merged[&Id::from("l1")].ewt, Some(30.0));
        // Reference speed on l2 is its only traversal (10 m/s), actual
        // time matches expectation, so the delta is zero.
        assert_eq!(tables.merged[&Id::from("l2")].ewt, Some(30.0));
    }

    #[test]
    fn filtered_and_outlier_split_on_bus_frequency() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);
        let tables = processor.process(&[], &[]);

        assert!(tables.filtered.contains_key(&Id::from("l1")));
        assert!(tables.filtered.contains_key(&Id::from("l2")));
        assert!(tables.outlier.contains_key(&Id::from("side")));
        assert!(!tables.filtered.contains_key(&Id::from("side")));
        assert!(tables
            .filtered
            .values()
            .all(|row| row.bus_frequency > 0.0));
        assert!(tables
            .outlier
            .values()
            .all(|row| row.bus_frequency <= 0.0));
    }

    #[test]
    fn unknown_links_are_counted_and_dropped() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        let records = vec![link_record(
            "car_1", "offmap", None, 21_600.0, 21_700.0, 100.0, None,
        )];
        let tables = processor.process(&records, &[]);
        assert_eq!(tables.inconsistent_link_records, 1);
    }

    #[test]
    fn average_trip_length_splits_on_idle_gaps() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        // One vehicle: a two-link trip, a long idle gap, then another
        // single-link trip. Two trips of 1500 m and 1000 m.
        let records = vec![
            link_record("car_1", "l1", None, 21_600.0, 21_700.0, 1000.0, None),
            link_record("car_1", "l2", None, 21_700.0, 21_800.0, 500.0, None),
            link_record("car_1", "l1", None, 50_000.0, 50_100.0, 1000.0, None),
        ];
        let tables = processor.process(&records, &[]);
        assert_eq!(tables.avg_trip_length, Some(1250.0));
    }

    #[test]
    fn configured_trip_length_overrides_derivation() {
        let mut config = test_config();
        config.scoring.wait_ride.avg_trip_length = Some(4200.0);
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);
        let tables = processor.process(&[], &[]);
        assert_eq!(tables.avg_trip_length, Some(4200.0));
    }

    #[test]
    fn processing_is_deterministic() {
        let config = test_config();
        let metadata = test_metadata();
        let processor = MetricProcessor::new(&config, &metadata);

        let records = vec![
            link_record("bus_1", "l1", Some("L1"), 21_600.0, 21_700.0, 1000.0, Some(3)),
            link_record("car_1", "l1", None, 21_650.0, 21_750.0, 1000.0, None),
        ];
        let stops = vec![stop_record("l1", "L1", 30.0, 12)];

        let first = processor.process(&records, &stops);
        let second = processor.process(&records, &stops);
        assert_eq!(first.merged, second.merged);
        assert_eq!(first.filtered, second.filtered);
    }
}

/// Writes the merged, filtered, and outlier tables through the record
/// store.
pub fn persist_metrics(
    tables: &MetricsTables,
    sink: &mut dyn RecordSink,
) -> Result<(), ScoringError> {
    for (stream, table) in [
        ("merged", &tables.merged),
        ("filtered", &tables.filtered),
        ("outlier", &tables.outlier),
    ] {
        for (link_id, row) in table {
            sink.write(
                stream,
                json!({
                    "link_id": link_id,
                    "length": row.length,
                    "bus_frequency": row.bus_frequency,
                    "veh_flow": row.veh_flow,
                    "avg_speed": row.avg_speed,
                    "avg_bus_speed": row.avg_bus_speed,
                    "avg_load_factor": row.avg_load_factor,
                    "ewt": row.ewt,
                    "ewt_per_line": row.ewt_per_line,
                    "avg_bus_speed_per_line": row.avg_bus_speed_per_line,
                    "avg_load_factor_per_line": row.avg_load_factor_per_line,
                }),
            )?;
        }
    }
    Ok(())
}
