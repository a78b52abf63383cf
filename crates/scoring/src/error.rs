use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoringError {
    /// The travel-time factor denominator vanished for a row; the
    /// configured elasticity and base travel time cannot score it.
    #[error("degenerate travel-time factor for {subject}")]
    DegenerateTravelTime { subject: String },

    #[error("no usable passenger trips; configure scoring.wait_ride.avg_trip_length")]
    MissingTripLength,

    #[error(transparent)]
    Store(#[from] store::StoreError),
}
