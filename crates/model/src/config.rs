use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Pipeline configuration. Built once by the binary, then passed by
/// shared reference to every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: OutputMode,
    #[serde(default)]
    pub bus: BusParams,
    #[serde(default)]
    pub matsim: MatsimParams,
    #[serde(default)]
    pub scoring: ScoringParams,
    pub files: FilePlan,
}

/// Selects the record-store format: row-streamed CSV for inspection,
/// buffered columnar output for production runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Debug,
    Release,
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::Release
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusParams {
    pub seating: u32,
    pub standing: u32,
    /// Fraction of the standing capacity counted into plan capacity.
    pub cap_headroom: f64,
}

impl BusParams {
    /// Effective capacity used as the load-factor denominator.
    pub fn plan_capacity(&self) -> f64 {
        self.seating as f64 + self.cap_headroom * self.standing as f64
    }
}

impl Default for BusParams {
    fn default() -> Self {
        Self {
            seating: 30,
            standing: 20,
            cap_headroom: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatsimParams {
    /// Case-insensitive prefix of bus vehicle-type ids.
    pub bus_type_prefix: String,
    /// Transport modes a transit line must use to be scored.
    pub bus_transport_modes: Vec<String>,
}

impl Default for MatsimParams {
    fn default() -> Self {
        Self {
            bus_type_prefix: "bus".to_owned(),
            bus_transport_modes: vec!["bus".to_owned(), "pt".to_owned()],
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub wait_ride: WaitRideParams,
    pub amenity: AmenityParams,
    pub ped_env: PedEnvParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitRideParams {
    /// Tolerance in minutes for negative arrival delays; anything below
    /// `-tolerance` is treated as a cycle mismatch and replaced by the
    /// line headway.
    pub headway_tolerance: f64,
    /// Minimum summed boardings for the passenger-weighted EWT estimator.
    pub boarding_threshold: u32,
    /// Minimum summed passenger load for the pax-second-weighted load
    /// factor.
    pub total_load_threshold: u32,
    /// Elasticity of the travel-time factor.
    pub elas: f64,
    /// Base perceived travel time, minutes per kilometer.
    pub base_travel_time: f64,
    /// Overrides the derived average passenger trip length (meters).
    pub avg_trip_length: Option<f64>,
}

impl Default for WaitRideParams {
    fn default() -> Self {
        Self {
            headway_tolerance: 1.0,
            boarding_threshold: 10,
            total_load_threshold: 10,
            elas: -0.4,
            base_travel_time: 6.0,
            avg_trip_length: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmenityParams {
    pub shelter: f64,
    pub bench: f64,
    pub shelter_rate: f64,
    pub bench_rate: f64,
}

impl Default for AmenityParams {
    fn default() -> Self {
        Self {
            shelter: 0.0,
            bench: 0.0,
            shelter_rate: 1.3,
            bench_rate: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PedEnvParams {
    /// Widths in feet, per the highway-capacity cross-section model.
    pub outside_lane_width: f64,
    pub bike_lane_width: f64,
    pub parking_lane_width: f64,
    /// Proportion of occupied on-street parking, 0 to 1.
    pub street_parking: f64,
    /// Vehicle flow above which the outside-lane width is not widened.
    pub volume_threshold: f64,
    pub sidewalk_buffer: f64,
    pub buffer_coeff: f64,
    pub sidewalk_width: f64,
}

impl Default for PedEnvParams {
    fn default() -> Self {
        Self {
            outside_lane_width: 12.0,
            bike_lane_width: 0.0,
            parking_lane_width: 0.0,
            street_parking: 0.0,
            volume_threshold: 160.0,
            sidewalk_buffer: 0.0,
            buffer_coeff: 1.0,
            sidewalk_width: 6.0,
        }
    }
}

/// All file locations the pipeline reads or writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePlan {
    pub inputs: InputFiles,
    pub metadata: MetadataFiles,
    pub data: DataFiles,
    pub los: LosFiles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFiles {
    pub network: PathBuf,
    pub transit_schedule: PathBuf,
    pub transit_vehicles: PathBuf,
    /// Gzipped event log.
    pub events: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFiles {
    pub link_data: PathBuf,
    pub line_headway: PathBuf,
    pub bus_vehicles: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFiles {
    pub link_records: PathBuf,
    pub stop_records: PathBuf,
    pub avg_trip_length: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LosFiles {
    pub merged: PathBuf,
    pub filtered: PathBuf,
    pub outlier: PathBuf,
    pub scores: PathBuf,
    pub line_scores: PathBuf,
    pub aggregates: PathBuf,
}
