//! End-to-end run of the whole pipeline over a tiny simulated day: one
//! bus line, two links, three passengers.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use matsim::extractor::{LINK_RECORDS_STREAM, STOP_RECORDS_STREAM};
use matsim::{EventExtractor, MetadataLoader};
use model::config::{Config, OutputMode};
use model::record::{LinkRecord, StopRecord};
use scoring::aggregate::aggregate_los;
use scoring::{AggregationMode, LosCalculator, MetricProcessor};
use store::{Format, RecordSink};
use utility::id::Id;

const NETWORK: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<network name="mini">
  <links>
    <link id="l1" from="n1" to="n2" length="1000.0" modes="car,pt"/>
    <link id="l2" from="n2" to="n3" length="500.0" modes="car,pt"/>
    <link id="side" from="n3" to="n4" length="250.0" modes="car"/>
  </links>
</network>
"#;

const SCHEDULE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<transitSchedule>
  <transitStops>
    <stopFacility id="s1" linkRefId="l1"/>
    <stopFacility id="s2" linkRefId="l2"/>
  </transitStops>
  <transitLine id="L1">
    <transitRoute id="L1_r1">
      <transportMode>bus</transportMode>
      <routeProfile>
        <stop refId="s1"/>
        <stop refId="s2"/>
      </routeProfile>
      <route>
        <link refId="l1"/>
        <link refId="l2"/>
      </route>
      <departures>
        <departure id="d1" departureTime="06:00:00" vehicleRefId="bus_1"/>
        <departure id="d2" departureTime="06:10:00" vehicleRefId="bus_1"/>
      </departures>
    </transitRoute>
  </transitLine>
</transitSchedule>
"#;

const VEHICLES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<vehicleDefinitions xmlns="http://www.matsim.org/files/dtd">
  <vehicleType id="Bus_default">
    <capacity seats="30" standingRoom="20"/>
  </vehicleType>
  <vehicle id="bus_1" type="Bus_default"/>
</vehicleDefinitions>
"#;

const EVENTS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<events version="1.0">
<event time="21600.0" type="TransitDriverStarts" driverId="pt_d1" vehicleId="bus_1" transitLineId="L1" transitRouteId="L1_r1" departureId="d1"/>
<event time="21600.0" type="vehicle enters traffic" person="pt_d1" link="l1" vehicle="bus_1" networkMode="car"/>
<event time="21605.0" type="VehicleArrivesAtFacility" vehicle="bus_1" facility="s1" delay="5.0"/>
<event time="21610.0" type="PersonEntersVehicle" person="p1" vehicle="bus_1"/>
<event time="21611.0" type="PersonEntersVehicle" person="p2" vehicle="bus_1"/>
<event time="21612.0" type="PersonEntersVehicle" person="p3" vehicle="bus_1"/>
<event time="21620.0" type="VehicleDepartsAtFacility" vehicle="bus_1" facility="s1" delay="5.0"/>
<event time="21700.0" type="left link" vehicle="bus_1" link="l1"/>
<event time="21700.0" type="entered link" vehicle="bus_1" link="l2"/>
<event time="21750.0" type="VehicleArrivesAtFacility" vehicle="bus_1" facility="s2" delay="10.0"/>
<event time="21760.0" type="PersonLeavesVehicle" person="p1" vehicle="bus_1"/>
<event time="21761.0" type="PersonLeavesVehicle" person="p2" vehicle="bus_1"/>
<event time="21762.0" type="PersonLeavesVehicle" person="p3" vehicle="bus_1"/>
<event time="21770.0" type="VehicleDepartsAtFacility" vehicle="bus_1" facility="s2" delay="10.0"/>
<event time="21800.0" type="left link" vehicle="bus_1" link="l2"/>
<event time="21800.0" type="vehicle leaves traffic" vehicle="bus_1" person="pt_d1" link="l2" networkMode="car"/>
</events>
"#;

fn workspace(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("los-pipeline-{tag}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_inputs(dir: &Path) {
    fs::write(dir.join("network.xml"), NETWORK).unwrap();
    fs::write(dir.join("schedule.xml"), SCHEDULE).unwrap();
    fs::write(dir.join("vehicles.xml"), VEHICLES).unwrap();

    let file = fs::File::create(dir.join("events.xml.gz")).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    encoder.write_all(EVENTS.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn pipeline_config(dir: &Path, mode: OutputMode) -> Config {
    let mode = match mode {
        OutputMode::Debug => "debug",
        OutputMode::Release => "release",
    };
    serde_json::from_value(serde_json::json!({
        "mode": mode,
        "scoring": { "wait_ride": { "boarding_threshold": 2 } },
        "files": {
            "inputs": {
                "network": dir.join("network.xml"),
                "transit_schedule": dir.join("schedule.xml"),
                "transit_vehicles": dir.join("vehicles.xml"),
                "events": dir.join("events.xml.gz"),
            },
            "metadata": {
                "link_data": dir.join("meta/link_data"),
                "line_headway": dir.join("meta/line_headway"),
                "bus_vehicles": dir.join("meta/bus_vehicles"),
            },
            "data": {
                "link_records": dir.join("data/link_records"),
                "stop_records": dir.join("data/stop_records"),
                "avg_trip_length": dir.join("data/avg_trip_length.json"),
            },
            "los": {
                "merged": dir.join("los/merged"),
                "filtered": dir.join("los/filtered"),
                "outlier": dir.join("los/outlier"),
                "scores": dir.join("los/scores"),
                "line_scores": dir.join("los/line_scores"),
                "aggregates": dir.join("los/aggregates.json"),
            },
        },
    }))
    .unwrap()
}

fn run_pipeline(config: &Config, format: Format) -> (Vec<LinkRecord>, Vec<StopRecord>) {
    let metadata = MetadataLoader::new(config).load().unwrap();

    let mut sink = store::open_sink(
        format,
        vec![
            (
                LINK_RECORDS_STREAM.to_owned(),
                config.files.data.link_records.clone(),
            ),
            (
                STOP_RECORDS_STREAM.to_owned(),
                config.files.data.stop_records.clone(),
            ),
        ],
    )
    .unwrap();
    EventExtractor::new(config, &metadata)
        .extract(sink.as_mut())
        .unwrap();
    sink.close().unwrap();

    let link_records = store::read_rows(&config.files.data.link_records, format).unwrap();
    let stop_records = store::read_rows(&config.files.data.stop_records, format).unwrap();
    (link_records, stop_records)
}

#[test]
fn full_pipeline_scores_the_served_links() {
    let dir = workspace("full");
    write_inputs(&dir);
    let config = pipeline_config(&dir, OutputMode::Debug);
    let metadata = MetadataLoader::new(&config).load().unwrap();
    let (link_records, stop_records) = run_pipeline(&config, Format::Csv);

    assert_eq!(link_records.len(), 2);
    assert_eq!(stop_records.len(), 2);
    // Scheduled headway: two departures ten minutes apart.
    assert_eq!(metadata.headway(&Id::from("L1")), Some(600.0));
    // 1000 m in 100 s.
    assert_eq!(link_records[0].duration(), 100.0);
    assert_eq!(link_records[0].passenger_load, Some(0));
    assert_eq!(link_records[1].passenger_load, Some(3));

    let tables =
        MetricProcessor::new(&config, &metadata).process(&link_records, &stop_records);
    let l1 = &tables.merged[&Id::from("l1")];
    assert_eq!(l1.avg_bus_speed, Some(10.0));
    // Boardings (3) exceed the test threshold (2): passenger-weighted.
    assert_eq!(l1.ewt, Some(5.0));
    let l2 = &tables.merged[&Id::from("l2")];
    assert_eq!(l2.ewt, Some(10.0));
    assert!(tables.outlier.contains_key(&Id::from("side")));

    let calculator = LosCalculator::new(&config.scoring, tables.avg_trip_length).unwrap();
    let scores = calculator.score_links(&tables.filtered).unwrap();
    assert_eq!(scores.rows.len(), 2);
    assert_eq!(scores.skipped, 0);
    for row in &scores.rows {
        assert!(row.los.is_finite());
    }

    let line_scores = calculator.score_lines(&tables.filtered).unwrap();
    assert_eq!(line_scores.rows.len(), 2);
    assert!(line_scores
        .rows
        .iter()
        .all(|row| row.line_id == Some(Id::from("L1"))));

    for mode in AggregationMode::ALL {
        let value = aggregate_los(&scores.rows, &tables.load_totals, &metadata.links, mode);
        assert!(value.unwrap().is_finite());
    }
}

#[test]
fn debug_and_release_modes_agree() {
    let csv_dir = workspace("csv");
    write_inputs(&csv_dir);
    let csv_config = pipeline_config(&csv_dir, OutputMode::Debug);
    let (csv_links, csv_stops) = run_pipeline(&csv_config, Format::Csv);

    let col_dir = workspace("columnar");
    write_inputs(&col_dir);
    let col_config = pipeline_config(&col_dir, OutputMode::Release);
    let (col_links, col_stops) = run_pipeline(&col_config, Format::Columnar);

    assert_eq!(csv_links, col_links);
    assert_eq!(csv_stops, col_stops);
}

#[test]
fn rerunning_the_extractor_reproduces_the_streams() {
    let dir = workspace("idempotent");
    write_inputs(&dir);
    let config = pipeline_config(&dir, OutputMode::Debug);

    let (first_links, first_stops) = run_pipeline(&config, Format::Csv);
    let (second_links, second_stops) = run_pipeline(&config, Format::Csv);
    assert_eq!(first_links, second_links);
    assert_eq!(first_stops, second_stops);

    let metadata = MetadataLoader::new(&config).load().unwrap();
    let processor = MetricProcessor::new(&config, &metadata);
    let first = processor.process(&first_links, &first_stops);
    let second = processor.process(&second_links, &second_stops);
    assert_eq!(first.merged, second.merged);
}
