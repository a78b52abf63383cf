//! Parsers for the network, transit-schedule, and transit-vehicles
//! descriptors. Runs once per pipeline invocation; everything it produces
//! is immutable afterwards.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;
use log::{debug, info};
use quick_xml::events::Event;
use quick_xml::Reader;
use store::RecordSink;
use utility::id::Id;
use utility::sim_time;

use model::config::Config;
use model::line::{scheduled_headway, Stop, TransitLine, TransitRoute};
use model::link::{Link, LinkMeta, LinkMetaRow, LinkTable};
use model::metadata::{LineHeadwayRow, SimulationMetadata};
use model::vehicle::{BusVehicleRow, FleetRegistry};

use crate::xml::{attributes, require};
use crate::MatsimError;

/// Links are relevant when any of their modes is one of these.
const RELEVANT_LINK_MODES: [&str; 2] = ["pt", "car"];

pub struct MetadataLoader<'a> {
    config: &'a Config,
}

impl<'a> MetadataLoader<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn load(&self) -> Result<SimulationMetadata, MatsimError> {
        let mut metadata = SimulationMetadata::default();

        self.read_network(&mut metadata.links)?;
        info!("network: {} relevant links", metadata.links.len());

        self.read_transit_schedule(&mut metadata)?;
        info!(
            "transit schedule: {} lines retained, {} routes",
            metadata.line_headways.len(),
            metadata.routes.len()
        );

        self.read_transit_vehicles(&mut metadata.fleet)?;
        info!(
            "transit vehicles: {} buses, {} blacklisted",
            metadata.fleet.bus_count(),
            metadata.fleet.blacklist_count()
        );

        Ok(metadata)
    }

    /// Streams the network descriptor and records every non-loop link
    /// whose mode set touches pt or car traffic.
    fn read_network(&self, links: &mut LinkTable) -> Result<(), MatsimError> {
        let path = self.config.files.inputs.network.as_path();
        let mut reader = open_xml(path)?;
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
                    if element.local_name().as_ref() != b"link" {
                        buf.clear();
                        continue;
                    }
                    let attrs = attributes(&element, path)?;
                    let id = require(&attrs, "link", "id", path)?;
                    let from = require(&attrs, "link", "from", path)?;
                    let to = require(&attrs, "link", "to", path)?;
                    let modes = require(&attrs, "link", "modes", path)?;
                    let length = require(&attrs, "link", "length", path)?;

                    if from != to && has_relevant_mode(modes) {
                        let length = parse_number(length, path, "link", "length")?;
                        links.insert(
                            Id::from(id),
                            LinkMeta {
                                length,
                                bus_frequency: 0.0,
                            },
                        );
                    }
                }
                Ok(_) => {}
            }
            buf.clear();
        }
        Ok(())
    }

    /// Streams the transit schedule: collects the stop-facility table and
    /// the raw routes, then derives headways and bus frequencies for the
    /// lines whose transport modes are allowed.
    fn read_transit_schedule(
        &self,
        metadata: &mut SimulationMetadata,
    ) -> Result<(), MatsimError> {
        let path = self.config.files.inputs.transit_schedule.as_path();
        let mut reader = open_xml(path)?;
        let mut buf = Vec::new();

        let mut stop_to_link: HashMap<Id<Stop>, Id<Link>> = HashMap::new();
        // (line id, routes) in schedule order.
        let mut lines: Vec<(Id<TransitLine>, Vec<RawRoute>)> = Vec::new();
        let mut in_transport_mode = false;

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
                    match element.local_name().as_ref() {
                        b"stopFacility" => {
                            let attrs = attributes(&element, path)?;
                            let id = require(&attrs, "stopFacility", "id", path)?;
                            if let Some(link_ref) = attrs.get("linkRefId") {
                                stop_to_link.insert(Id::from(id), Id::from(link_ref.as_str()));
                            }
                        }
                        b"transitLine" => {
                            let attrs = attributes(&element, path)?;
                            let id = require(&attrs, "transitLine", "id", path)?;
                            lines.push((Id::from(id), Vec::new()));
                        }
                        b"transitRoute" => {
                            if let Some((line_id, routes)) = lines.last_mut() {
                                routes.push(RawRoute::new(line_id.clone()));
                            }
                        }
                        b"transportMode" => in_transport_mode = true,
                        b"stop" => {
                            let attrs = attributes(&element, path)?;
                            let ref_id = require(&attrs, "stop", "refId", path)?;
                            if let Some(route) = current_route(&mut lines) {
                                route.stops.push(Id::from(ref_id));
                            }
                        }
                        b"link" => {
                            let attrs = attributes(&element, path)?;
                            let ref_id = require(&attrs, "link", "refId", path)?;
                            if let Some(route) = current_route(&mut lines) {
                                route.links.push(Id::from(ref_id));
                            }
                        }
                        b"departure" => {
                            let attrs = attributes(&element, path)?;
                            let time = require(&attrs, "departure", "departureTime", path)?;
                            let line_id = lines
                                .last()
                                .map(|(id, _)| id.to_string())
                                .unwrap_or_default();
                            let seconds = sim_time::parse_hms(time)
                                .ok_or_else(|| MatsimError::MalformedDepartureTime {
                                    line_id,
                                    value: time.to_owned(),
                                })?
                                .num_seconds();
                            if let Some(route) = current_route(&mut lines) {
                                route.departures.push(seconds);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Text(text)) => {
                    if in_transport_mode {
                        let mode = text
                            .unescape()
                            .map_err(|source| MatsimError::Xml {
                                path: path.to_path_buf(),
                                source,
                            })?
                            .trim()
                            .to_owned();
                        if let Some(route) = current_route(&mut lines) {
                            route.transport_mode = mode;
                        }
                    }
                }
                Ok(Event::End(element)) => {
                    if element.local_name().as_ref() == b"transportMode" {
                        in_transport_mode = false;
                    }
                }
                Ok(_) => {}
            }
            buf.clear();
        }

        self.assemble_schedule(metadata, &stop_to_link, lines);
        Ok(())
    }

    /// Derives per-line headways and per-link bus frequencies from the
    /// raw routes of the lines that pass the transport-mode filter.
    fn assemble_schedule(
        &self,
        metadata: &mut SimulationMetadata,
        stop_to_link: &HashMap<Id<Stop>, Id<Link>>,
        lines: Vec<(Id<TransitLine>, Vec<RawRoute>)>,
    ) {
        let allowed = &self.config.matsim.bus_transport_modes;

        for (line_id, routes) in lines {
            let retained = routes
                .iter()
                .any(|route| allowed.iter().any(|mode| *mode == route.transport_mode));
            if !retained {
                continue;
            }

            let all_departures: Vec<i64> = routes
                .iter()
                .flat_map(|route| route.departures.iter().copied())
                .collect();
            let headway = scheduled_headway(&all_departures);
            if let Some(headway) = headway {
                debug!(
                    "line {}: headway {}",
                    line_id,
                    sim_time::format_hms(chrono::Duration::seconds(headway as i64))
                );
            }
            metadata.line_headways.insert(line_id.clone(), headway);

            for route in routes {
                let mut departures = route.departures.clone();
                departures.sort_unstable();
                departures.dedup();

                if !departures.is_empty() {
                    let span_hours = (departures[departures.len() - 1] - departures[0]) as f64
                        / 3600.0;
                    let operating_hours = span_hours.max(1.0);
                    let frequency = departures.len() as f64 / operating_hours;

                    for link_id in &route.links {
                        if let Some(meta) = metadata.links.get_mut(link_id) {
                            meta.bus_frequency += frequency;
                        }
                    }
                }

                let stop_links: BTreeSet<Id<Link>> = route
                    .stops
                    .iter()
                    .filter_map(|stop| stop_to_link.get(stop).cloned())
                    .collect();
                metadata.routes.push(TransitRoute {
                    line_id: route.line_id,
                    transport_mode: route.transport_mode,
                    links: route.links,
                    stop_links,
                    departures: route.departures,
                });
            }
        }
    }

    /// Classifies the transit fleet: a vehicle whose type id starts with
    /// the configured prefix (case-insensitively) is a bus, every other
    /// transit vehicle is blacklisted.
    fn read_transit_vehicles(&self, fleet: &mut FleetRegistry) -> Result<(), MatsimError> {
        let path = self.config.files.inputs.transit_vehicles.as_path();
        let prefix = self.config.matsim.bus_type_prefix.to_lowercase();
        let mut reader = open_xml(path)?;
        let mut buf = Vec::new();

        let mut bus_types: BTreeSet<String> = BTreeSet::new();
        let mut other_types: BTreeSet<String> = BTreeSet::new();
        // (vehicle id, type id); types may be declared after vehicles.
        let mut vehicles: Vec<(String, String)> = Vec::new();

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
                    match element.local_name().as_ref() {
                        b"vehicleType" => {
                            let attrs = attributes(&element, path)?;
                            let id = require(&attrs, "vehicleType", "id", path)?;
                            if id.to_lowercase().starts_with(&prefix) {
                                bus_types.insert(id.to_owned());
                            } else {
                                other_types.insert(id.to_owned());
                            }
                        }
                        b"vehicle" => {
                            let attrs = attributes(&element, path)?;
                            let id = require(&attrs, "vehicle", "id", path)?;
                            let type_id = require(&attrs, "vehicle", "type", path)?;
                            vehicles.push((id.to_owned(), type_id.to_owned()));
                        }
                        _ => {}
                    }
                }
                Ok(_) => {}
            }
            buf.clear();
        }

        for (vehicle_id, type_id) in vehicles {
            if bus_types.contains(&type_id) {
                fleet.register_bus(Id::new(vehicle_id), type_id);
            } else if other_types.contains(&type_id) {
                fleet.register_blacklisted(Id::new(vehicle_id));
            }
        }
        Ok(())
    }
}

/// Writes the metadata tables through the record store so downstream
/// stages (and postprocessing scripts) can re-read them.
pub fn persist_metadata(
    metadata: &SimulationMetadata,
    sink: &mut dyn RecordSink,
) -> Result<(), MatsimError> {
    for (link_id, meta) in &metadata.links {
        let row = LinkMetaRow {
            link_id: link_id.clone(),
            length: meta.length,
            bus_frequency: meta.bus_frequency,
        };
        sink.write("link_data", store::to_record(&row)?)?;
    }
    for (line_id, headway) in &metadata.line_headways {
        let row = LineHeadwayRow {
            line_id: line_id.clone(),
            scheduled_headway: *headway,
        };
        sink.write("line_headway", store::to_record(&row)?)?;
    }
    for (vehicle_id, vehicle_type) in metadata.fleet.buses() {
        let row = BusVehicleRow {
            vehicle_id: vehicle_id.clone(),
            vehicle_type: vehicle_type.to_owned(),
        };
        sink.write("bus_vehicles", store::to_record(&row)?)?;
    }
    Ok(())
}

struct RawRoute {
    line_id: Id<TransitLine>,
    transport_mode: String,
    links: Vec<Id<Link>>,
    stops: Vec<Id<Stop>>,
    departures: Vec<i64>,
}

impl RawRoute {
    fn new(line_id: Id<TransitLine>) -> Self {
        Self {
            line_id,
            transport_mode: String::new(),
            links: Vec::new(),
            stops: Vec::new(),
            departures: Vec::new(),
        }
    }
}

fn current_route(
    lines: &mut [(Id<TransitLine>, Vec<RawRoute>)],
) -> Option<&mut RawRoute> {
    lines.last_mut().and_then(|(_, routes)| routes.last_mut())
}

fn has_relevant_mode(modes: &str) -> bool {
    modes
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .any(|mode| RELEVANT_LINK_MODES.contains(&mode))
}

fn parse_number(
    value: &str,
    path: &Path,
    element: &str,
    attribute: &str,
) -> Result<f64, MatsimError> {
    value
        .parse()
        .map_err(|_| MatsimError::MalformedNumber {
            path: path.to_path_buf(),
            element: element.to_owned(),
            attribute: attribute.to_owned(),
            value: value.to_owned(),
        })
}

/// Opens a descriptor for streaming, transparently inflating `.gz` files.
fn open_xml(path: &Path) -> Result<Reader<Box<dyn BufRead>>, MatsimError> {
    let file = File::open(path).map_err(|source| MatsimError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let buffered: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut reader = Reader::from_reader(buffered);
    reader.config_mut().trim_text(true);
    Ok(reader)
}
