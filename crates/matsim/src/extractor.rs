//! Single-pass extractor over the gzipped event log.
//!
//! Per-vehicle state machines reconstruct link traversals and bus stop
//! dwells; completed traversals and departures are emitted through the
//! record store as they happen, so memory stays bounded by the number of
//! vehicles simultaneously in traffic.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use flate2::read::GzDecoder;
use log::{info, warn};
use quick_xml::events::Event;
use quick_xml::Reader;
use store::{to_record, RecordSink};
use utility::id::Id;

use model::config::Config;
use model::line::{Stop, TransitLine};
use model::link::Link;
use model::metadata::SimulationMetadata;
use model::record::{LinkRecord, StopRecord};
use model::vehicle::Vehicle;

use crate::event::{parse_event, SimEvent};
use crate::xml::attributes;
use crate::MatsimError;

pub const LINK_RECORDS_STREAM: &str = "link_records";
pub const STOP_RECORDS_STREAM: &str = "stop_records";

/// Transit drivers are agents with this id prefix; they occupy their own
/// vehicle but are never passengers.
const DRIVER_ID_PREFIX: &str = "pt_";

/// Traversals at or under this duration are simulator artifacts (queue
/// teleports across a node) and are not emitted.
const MIN_TRAVERSAL_SECONDS: f64 = 1.0;

pub struct EventExtractor<'a> {
    config: &'a Config,
    metadata: &'a SimulationMetadata,
    /// When false, an unbalanced bus run is logged and counted instead of
    /// aborting the stage.
    strict_run_invariants: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub link_records: u64,
    pub stop_records: u64,
    pub short_traversals_dropped: u64,
    pub unknown_link_drops: u64,
    pub headwayless_stop_drops: u64,
    pub incomplete_stop_drops: u64,
    pub unbalanced_runs: u64,
    pub negative_load_corrections: u64,
}

impl<'a> EventExtractor<'a> {
    pub fn new(config: &'a Config, metadata: &'a SimulationMetadata) -> Self {
        Self {
            config,
            metadata,
            strict_run_invariants: true,
        }
    }

    pub fn lenient_run_invariants(mut self) -> Self {
        self.strict_run_invariants = false;
        self
    }

    /// Streams the configured gzipped event log into the sink.
    pub fn extract(&self, sink: &mut dyn RecordSink) -> Result<ExtractSummary, MatsimError> {
        let path = self.config.files.inputs.events.as_path();
        let file = File::open(path).map_err(|source| MatsimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.extract_from_reader(BufReader::new(GzDecoder::new(file)), sink)
    }

    /// Streams an already-decompressed event log. Split out so tests can
    /// feed literal XML.
    pub fn extract_from_reader<R: BufRead>(
        &self,
        source: R,
        sink: &mut dyn RecordSink,
    ) -> Result<ExtractSummary, MatsimError> {
        let path = self.config.files.inputs.events.as_path();
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);

        let mut state = ExtractorState::new(self.config, self.metadata, self.strict_run_invariants);
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Err(source) => {
                    return Err(MatsimError::Xml {
                        path: path.to_path_buf(),
                        source,
                    })
                }
                Ok(Event::Eof) => break,
                Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                    if element.local_name().as_ref() == b"event" {
                        let attrs = attributes(&element, path)?;
                        let event_type = attrs.get("type").map(String::as_str).unwrap_or("");
                        if let Some(event) = parse_event(event_type, &attrs)? {
                            state.apply(event, sink)?;
                        }
                    }
                }
                Ok(_) => {}
            }
            // Release the element buffer; state lives per vehicle, not
            // per event.
            buf.clear();
        }

        let summary = state.into_summary();
        info!(
            "extracted {} link records, {} stop records ({} short traversals, \
             {} unknown links, {} headwayless stops dropped)",
            summary.link_records,
            summary.stop_records,
            summary.short_traversals_dropped,
            summary.unknown_link_drops,
            summary.headwayless_stop_drops,
        );
        Ok(summary)
    }
}

/// Traversal tracking for one active vehicle.
#[derive(Debug, Default)]
struct VehicleState {
    current_link: Option<Id<Link>>,
    enter_time: Option<f64>,
    line_id: Option<Id<TransitLine>>,
    passenger_count: u32,
    /// Passenger count sampled when the current link was entered; the
    /// load reported for the traversal.
    entry_load: u32,
    is_bus: bool,
}

/// Stop-dwell tracking for one active bus.
#[derive(Debug)]
struct StopState {
    current_link: Option<Id<Link>>,
    line_id: Option<Id<TransitLine>>,
    stop_id: Option<Id<Stop>>,
    arrival_time: Option<f64>,
    arrival_delay: f64,
    boarding: u32,
    alighting: u32,
    total_boarding: u64,
    total_alighting: u64,
}

impl Default for StopState {
    fn default() -> Self {
        Self {
            current_link: None,
            line_id: None,
            stop_id: None,
            arrival_time: None,
            arrival_delay: -1.0,
            boarding: 0,
            alighting: 0,
            total_boarding: 0,
            total_alighting: 0,
        }
    }
}

/// The extractor's whole mutable world. The event loop is the only
/// mutator; vehicles are keyed under the id ordering so iteration order
/// never depends on hashing.
struct ExtractorState<'a> {
    config: &'a Config,
    metadata: &'a SimulationMetadata,
    strict_run_invariants: bool,
    vehicles: BTreeMap<Id<Vehicle>, VehicleState>,
    stops: BTreeMap<Id<Vehicle>, StopState>,
    summary: ExtractSummary,
}

impl<'a> ExtractorState<'a> {
    fn new(
        config: &'a Config,
        metadata: &'a SimulationMetadata,
        strict_run_invariants: bool,
    ) -> Self {
        Self {
            config,
            metadata,
            strict_run_invariants,
            vehicles: BTreeMap::new(),
            stops: BTreeMap::new(),
            summary: ExtractSummary::default(),
        }
    }

    fn into_summary(self) -> ExtractSummary {
        self.summary
    }

    /// The single transition function: one recognized event in, zero or
    /// more records out.
    fn apply(&mut self, event: SimEvent, sink: &mut dyn RecordSink) -> Result<(), MatsimError> {
        match event {
            SimEvent::TransitDriverStarts {
                vehicle_id,
                line_id,
            } => {
                if self.metadata.fleet.is_blacklisted(&vehicle_id) {
                    return Ok(());
                }
                let is_bus = self.metadata.fleet.is_bus(&vehicle_id);
                let vehicle = self.vehicle_entry(vehicle_id.clone());
                vehicle.line_id = Some(line_id.clone());
                vehicle.is_bus = is_bus;
                if is_bus {
                    self.stops.entry(vehicle_id).or_default().line_id = Some(line_id);
                }
            }

            SimEvent::VehicleEntersTraffic {
                vehicle_id,
                link_id,
                time,
            } => {
                if self.metadata.fleet.is_blacklisted(&vehicle_id) {
                    return Ok(());
                }
                let vehicle = self.vehicle_entry(vehicle_id);
                vehicle.current_link = Some(link_id);
                vehicle.enter_time = Some(time);
                vehicle.entry_load = vehicle.passenger_count;
            }

            SimEvent::EnteredLink {
                vehicle_id,
                link_id,
                time,
            } => {
                if self.metadata.fleet.is_blacklisted(&vehicle_id) {
                    return Ok(());
                }
                let is_bus = self.metadata.fleet.is_bus(&vehicle_id);
                let vehicle = self.vehicle_entry(vehicle_id.clone());
                vehicle.current_link = Some(link_id.clone());
                vehicle.enter_time = Some(time);
                vehicle.entry_load = vehicle.passenger_count;
                if is_bus {
                    self.stops.entry(vehicle_id).or_default().current_link = Some(link_id);
                }
            }

            SimEvent::LeftLink { vehicle_id, time } => {
                self.emit_link_record(&vehicle_id, time, sink)?;
                if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
                    vehicle.current_link = None;
                    vehicle.enter_time = None;
                }
            }

            SimEvent::VehicleLeavesTraffic { vehicle_id, time } => {
                let pending = self
                    .vehicles
                    .get(&vehicle_id)
                    .map(|v| v.current_link.is_some() && v.enter_time.is_some())
                    .unwrap_or(false);
                if pending {
                    self.emit_link_record(&vehicle_id, time, sink)?;
                }
                let vehicle = self.vehicles.remove(&vehicle_id);
                let stop = self.stops.remove(&vehicle_id);
                if vehicle.map(|v| v.is_bus).unwrap_or(false) {
                    if let Some(stop) = stop {
                        self.check_run_balance(&vehicle_id, &stop)?;
                    }
                }
            }

            SimEvent::PersonEntersVehicle {
                person_id,
                vehicle_id,
            } => {
                if person_id.starts_with(DRIVER_ID_PREFIX) {
                    return Ok(());
                }
                if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
                    vehicle.passenger_count += 1;
                }
                if let Some(stop) = self.stops.get_mut(&vehicle_id) {
                    if stop.stop_id.is_some() {
                        stop.boarding += 1;
                        stop.total_boarding += 1;
                    }
                }
            }

            SimEvent::PersonLeavesVehicle {
                person_id,
                vehicle_id,
            } => {
                if person_id.starts_with(DRIVER_ID_PREFIX) {
                    return Ok(());
                }
                if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
                    if vehicle.passenger_count == 0 {
                        self.summary.negative_load_corrections += 1;
                        warn!("vehicle {vehicle_id} reports an alighting at zero load");
                    }
                    vehicle.passenger_count = vehicle.passenger_count.saturating_sub(1);
                }
                if let Some(stop) = self.stops.get_mut(&vehicle_id) {
                    if stop.stop_id.is_some() {
                        stop.alighting += 1;
                        stop.total_alighting += 1;
                    }
                }
            }

            SimEvent::VehicleArrivesAtFacility {
                vehicle_id,
                stop_id,
                time,
                delay,
            } => {
                if let Some(stop) = self.stops.get_mut(&vehicle_id) {
                    stop.stop_id = Some(stop_id);
                    stop.arrival_time = Some(time);
                    stop.arrival_delay = delay;
                    stop.boarding = 0;
                    stop.alighting = 0;
                }
            }

            SimEvent::VehicleDepartsAtFacility { vehicle_id } => {
                self.emit_stop_record(&vehicle_id, sink)?;
            }
        }
        Ok(())
    }

    fn vehicle_entry(&mut self, vehicle_id: Id<Vehicle>) -> &mut VehicleState {
        let is_bus = self.metadata.fleet.is_bus(&vehicle_id);
        self.vehicles
            .entry(vehicle_id)
            .or_insert_with(|| VehicleState {
                is_bus,
                ..VehicleState::default()
            })
    }

    fn emit_link_record(
        &mut self,
        vehicle_id: &Id<Vehicle>,
        exit_time: f64,
        sink: &mut dyn RecordSink,
    ) -> Result<(), MatsimError> {
        let Some(vehicle) = self.vehicles.get(vehicle_id) else {
            return Ok(());
        };
        let (Some(link_id), Some(enter_time)) = (&vehicle.current_link, vehicle.enter_time)
        else {
            return Ok(());
        };

        let Some(link_meta) = self.metadata.links.get(link_id) else {
            self.summary.unknown_link_drops += 1;
            return Ok(());
        };
        if exit_time - enter_time <= MIN_TRAVERSAL_SECONDS {
            self.summary.short_traversals_dropped += 1;
            return Ok(());
        }

        let record = LinkRecord {
            vehicle_id: vehicle_id.clone(),
            link_id: link_id.clone(),
            line_id: if vehicle.is_bus {
                vehicle.line_id.clone()
            } else {
                None
            },
            enter_time,
            exit_time,
            travel_distance: link_meta.length,
            passenger_load: vehicle.is_bus.then_some(vehicle.entry_load),
            is_bus: vehicle.is_bus,
        };
        sink.write(LINK_RECORDS_STREAM, to_record(&record)?)?;
        self.summary.link_records += 1;
        Ok(())
    }

    fn emit_stop_record(
        &mut self,
        vehicle_id: &Id<Vehicle>,
        sink: &mut dyn RecordSink,
    ) -> Result<(), MatsimError> {
        let Some(stop) = self.stops.get_mut(vehicle_id) else {
            return Ok(());
        };
        let Some(stop_id) = stop.stop_id.clone() else {
            // Between stops; nothing pending.
            return Ok(());
        };
        let (Some(arrival_time), Some(line_id), Some(link_id)) = (
            stop.arrival_time,
            stop.line_id.clone(),
            stop.current_link.clone(),
        ) else {
            self.summary.incomplete_stop_drops += 1;
            return Ok(());
        };

        let Some(headway) = self.metadata.headway(&line_id) else {
            self.summary.headwayless_stop_drops += 1;
            return Ok(());
        };

        // Strongly negative delays mean the simulator matched the stop
        // against a different departure cycle; report the headway instead
        // so one outlier cannot zero the wait-ride score.
        let tolerance_seconds = self.config.scoring.wait_ride.headway_tolerance * 60.0;
        let schedule_deviation = if stop.arrival_delay >= -tolerance_seconds {
            stop.arrival_delay
        } else {
            headway
        };

        let record = StopRecord {
            vehicle_id: vehicle_id.clone(),
            stop_id,
            link_id,
            line_id,
            timestamp: arrival_time,
            schedule_deviation,
            scheduled_headway: headway,
            boarding: stop.boarding,
            alighting: stop.alighting,
        };
        sink.write(STOP_RECORDS_STREAM, to_record(&record)?)?;
        self.summary.stop_records += 1;

        stop.stop_id = None;
        stop.arrival_time = None;
        stop.arrival_delay = -1.0;
        stop.boarding = 0;
        stop.alighting = 0;
        Ok(())
    }

    fn check_run_balance(
        &mut self,
        vehicle_id: &Id<Vehicle>,
        stop: &StopState,
    ) -> Result<(), MatsimError> {
        if stop.total_boarding == stop.total_alighting {
            return Ok(());
        }
        if self.strict_run_invariants {
            return Err(MatsimError::UnbalancedBusRun {
                vehicle_id: vehicle_id.to_string(),
                boarding: stop.total_boarding,
                alighting: stop.total_alighting,
            });
        }
        self.summary.unbalanced_runs += 1;
        warn!(
            "bus {vehicle_id} ended its run with {} boardings and {} alightings",
            stop.total_boarding, stop.total_alighting
        );
        Ok(())
    }
}
