//! The event vocabulary of the simulator's log, parsed into a sum type so
//! the extractor can dispatch with a plain `match`.

use std::collections::HashMap;

use utility::id::Id;

use model::line::{Stop, TransitLine};
use model::link::Link;
use model::vehicle::Vehicle;

use crate::MatsimError;

/// Event-type literals as they appear in the log.
pub const TRANSIT_DRIVER_STARTS: &str = "TransitDriverStarts";
pub const VEHICLE_ENTERS_TRAFFIC: &str = "vehicle enters traffic";
pub const ENTERED_LINK: &str = "entered link";
pub const LEFT_LINK: &str = "left link";
pub const VEHICLE_LEAVES_TRAFFIC: &str = "vehicle leaves traffic";
pub const PERSON_ENTERS_VEHICLE: &str = "PersonEntersVehicle";
pub const PERSON_LEAVES_VEHICLE: &str = "PersonLeavesVehicle";
pub const VEHICLE_ARRIVES_AT_FACILITY: &str = "VehicleArrivesAtFacility";
pub const VEHICLE_DEPARTS_AT_FACILITY: &str = "VehicleDepartsAtFacility";

/// One recognized event from the log.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    TransitDriverStarts {
        vehicle_id: Id<Vehicle>,
        line_id: Id<TransitLine>,
    },
    VehicleEntersTraffic {
        vehicle_id: Id<Vehicle>,
        link_id: Id<Link>,
        time: f64,
    },
    EnteredLink {
        vehicle_id: Id<Vehicle>,
        link_id: Id<Link>,
        time: f64,
    },
    LeftLink {
        vehicle_id: Id<Vehicle>,
        time: f64,
    },
    VehicleLeavesTraffic {
        vehicle_id: Id<Vehicle>,
        time: f64,
    },
    PersonEntersVehicle {
        person_id: String,
        vehicle_id: Id<Vehicle>,
    },
    PersonLeavesVehicle {
        person_id: String,
        vehicle_id: Id<Vehicle>,
    },
    VehicleArrivesAtFacility {
        vehicle_id: Id<Vehicle>,
        stop_id: Id<Stop>,
        time: f64,
        delay: f64,
    },
    VehicleDepartsAtFacility {
        vehicle_id: Id<Vehicle>,
    },
}

/// Parses a recognized event from its attribute map; unknown event types
/// come back as `None` and are skipped. A recognized event missing one of
/// its attributes is malformed input and a hard error.
pub fn parse_event(
    event_type: &str,
    attrs: &HashMap<String, String>,
) -> Result<Option<SimEvent>, MatsimError> {
    let event = match event_type {
        TRANSIT_DRIVER_STARTS => SimEvent::TransitDriverStarts {
            vehicle_id: Id::from(required(event_type, attrs, "vehicleId")?),
            line_id: Id::from(required(event_type, attrs, "transitLineId")?),
        },
        VEHICLE_ENTERS_TRAFFIC => SimEvent::VehicleEntersTraffic {
            vehicle_id: Id::from(required(event_type, attrs, "vehicle")?),
            link_id: Id::from(required(event_type, attrs, "link")?),
            time: number(event_type, attrs, "time")?,
        },
        ENTERED_LINK => SimEvent::EnteredLink {
            vehicle_id: Id::from(required(event_type, attrs, "vehicle")?),
            link_id: Id::from(required(event_type, attrs, "link")?),
            time: number(event_type, attrs, "time")?,
        },
        LEFT_LINK => SimEvent::LeftLink {
            vehicle_id: Id::from(required(event_type, attrs, "vehicle")?),
            time: number(event_type, attrs, "time")?,
        },
        VEHICLE_LEAVES_TRAFFIC => SimEvent::VehicleLeavesTraffic {
            vehicle_id: Id::from(required(event_type, attrs, "vehicle")?),
            time: number(event_type, attrs, "time")?,
        },
        PERSON_ENTERS_VEHICLE => SimEvent::PersonEntersVehicle {
            person_id: required(event_type, attrs, "person")?.to_owned(),
            vehicle_id: Id::from(required(event_type, attrs, "vehicle")?),
        },
        PERSON_LEAVES_VEHICLE => SimEvent::PersonLeavesVehicle {
            person_id: required(event_type, attrs, "person")?.to_owned(),
            vehicle_id: Id::from(required(event_type, attrs, "vehicle")?),
        },
        VEHICLE_ARRIVES_AT_FACILITY => SimEvent::VehicleArrivesAtFacility {
            vehicle_id: Id::from(required(event_type, attrs, "vehicle")?),
            stop_id: Id::from(required(event_type, attrs, "facility")?),
            time: number(event_type, attrs, "time")?,
            delay: number(event_type, attrs, "delay")?,
        },
        VEHICLE_DEPARTS_AT_FACILITY => SimEvent::VehicleDepartsAtFacility {
            vehicle_id: Id::from(required(event_type, attrs, "vehicle")?),
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn required<'a>(
    event_type: &str,
    attrs: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, MatsimError> {
    attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| MatsimError::MissingEventAttribute {
            event_type: event_type.to_owned(),
            attribute: name.to_owned(),
        })
}

fn number(
    event_type: &str,
    attrs: &HashMap<String, String>,
    name: &str,
) -> Result<f64, MatsimError> {
    let value = required(event_type, attrs, name)?;
    value
        .parse()
        .map_err(|_| MatsimError::MalformedEventNumber {
            event_type: event_type.to_owned(),
            attribute: name.to_owned(),
            value: value.to_owned(),
        })
}
