use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde_json::json;

use matsim::extractor::{LINK_RECORDS_STREAM, STOP_RECORDS_STREAM};
use matsim::{EventExtractor, MetadataLoader};
use model::config::{Config, OutputMode};
use model::record::{LinkRecord, StopRecord};
use scoring::aggregate::aggregate_los;
use scoring::los::persist_scores;
use scoring::metrics::persist_metrics;
use scoring::{AggregationMode, LosCalculator, MetricProcessor};
use store::{Format, RecordSink};

/// Computes transit level-of-service scores from the output of a MATSim
/// simulation run.
#[derive(Debug, Parser)]
#[command(name = "transit-los", version)]
struct Opt {
    /// Pipeline configuration (JSON).
    #[arg(short, long)]
    config: PathBuf,

    /// Count unbalanced bus runs instead of aborting on them.
    #[arg(long)]
    lenient_run_invariants: bool,
}

fn main() {
    env_logger::init();
    let opt = Opt::parse();
    if let Err(why) = run(&opt) {
        eprintln!("transit-los: {why:#}");
        std::process::exit(1);
    }
}

fn run(opt: &Opt) -> Result<()> {
    let total = Instant::now();
    let config = load_config(&opt.config)?;
    let format = match config.mode {
        OutputMode::Debug => Format::Csv,
        OutputMode::Release => Format::Columnar,
    };

    // Stage 1: simulation metadata.
    let started = Instant::now();
    let metadata = MetadataLoader::new(&config)
        .load()
        .context("loading simulation metadata")?;
    let mut sink = store::open_sink(
        format,
        vec![
            ("link_data".to_owned(), config.files.metadata.link_data.clone()),
            (
                "line_headway".to_owned(),
                config.files.metadata.line_headway.clone(),
            ),
            (
                "bus_vehicles".to_owned(),
                config.files.metadata.bus_vehicles.clone(),
            ),
        ],
    )?;
    matsim::metadata::persist_metadata(&metadata, sink.as_mut())?;
    sink.close()?;
    info!("metadata stage finished in {:.2?}", started.elapsed());

    // Stage 2: event extraction.
    let started = Instant::now();
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
    )?;
    let mut extractor = EventExtractor::new(&config, &metadata);
    if opt.lenient_run_invariants {
        extractor = extractor.lenient_run_invariants();
    }
    let summary = extractor
        .extract(sink.as_mut())
        .context("extracting the event log")?;
    sink.close()?;
    info!("extraction stage finished in {:.2?}", started.elapsed());

    // Stage 3: metric aggregation over the persisted record streams.
    let started = Instant::now();
    let link_records: Vec<LinkRecord> =
        store::read_rows(&config.files.data.link_records, format)
            .context("reading link records back")?;
    let stop_records: Vec<StopRecord> =
        store::read_rows(&config.files.data.stop_records, format)
            .context("reading stop records back")?;
    let tables = MetricProcessor::new(&config, &metadata).process(&link_records, &stop_records);

    let mut sink = store::open_sink(
        format,
        vec![
            ("merged".to_owned(), config.files.los.merged.clone()),
            ("filtered".to_owned(), config.files.los.filtered.clone()),
            ("outlier".to_owned(), config.files.los.outlier.clone()),
        ],
    )?;
    persist_metrics(&tables, sink.as_mut())?;
    sink.close()?;
    write_json(
        &config.files.data.avg_trip_length,
        &json!({ "avg_passenger_trip_length": tables.avg_trip_length }),
    )?;
    info!("metric stage finished in {:.2?}", started.elapsed());

    // Stage 4: LOS scoring.
    let started = Instant::now();
    let calculator = LosCalculator::new(&config.scoring, tables.avg_trip_length)?;
    let link_scores = calculator
        .score_links(&tables.filtered)
        .context("scoring links")?;
    let line_scores = calculator
        .score_lines(&tables.filtered)
        .context("scoring link-line pairs")?;

    let mut sink = store::open_sink(
        format,
        vec![
            ("scores".to_owned(), config.files.los.scores.clone()),
            (
                "line_scores".to_owned(),
                config.files.los.line_scores.clone(),
            ),
        ],
    )?;
    persist_scores("scores", &link_scores, sink.as_mut())?;
    persist_scores("line_scores", &line_scores, sink.as_mut())?;
    sink.close()?;
    info!("scoring stage finished in {:.2?}", started.elapsed());

    // Stage 5: system-wide aggregates.
    let mut aggregates = serde_json::Map::new();
    for mode in AggregationMode::ALL {
        let value = aggregate_los(&link_scores.rows, &tables.load_totals, &metadata.links, mode);
        match value {
            Some(value) => println!("{}: {value:.6}", mode.name()),
            None => println!("{}: no weighted links", mode.name()),
        }
        aggregates.insert(mode.name().to_owned(), json!(value));
    }
    write_json(
        &config.files.los.aggregates,
        &serde_json::Value::Object(aggregates),
    )?;

    info!(
        "pipeline finished in {:.2?}: {} link records, {} stop records, \
         {} links scored, {} link-line pairs scored",
        total.elapsed(),
        summary.link_records,
        summary.stop_records,
        link_scores.rows.len(),
        line_scores.rows.len(),
    );
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading configuration {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing configuration {}", path.display()))
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}
