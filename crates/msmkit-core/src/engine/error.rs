use crate::core::io::features::FeatureError;
use crate::core::math::kmeans::ClusterError;
use crate::core::math::markov::MarkovError;
use crate::core::models::collection::CollectionError;
use crate::core::models::msm::AssignmentKey;
use crate::core::units::UnitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors: fail immediately, non-retryable.
    #[error("List length mismatch: {what} has {found} entries, expected {expected}")]
    ListLengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Number of metastable states must be at least 1")]
    InvalidStateCount,
    #[error("Resolved lag is zero steps (lag time shorter than the trajectory timestep)")]
    ZeroLag,
    #[error("Invalid time specification: {source}")]
    Unit {
        #[from]
        source: UnitError,
    },
    #[error("Clustering failed: {source}")]
    Cluster {
        #[from]
        source: ClusterError,
    },
    #[error("Feature loading failed: {source}")]
    Feature { source: FeatureError },
    #[error("MSM '{title}' has no loaded feature data")]
    NoData { title: String },
    #[error("MSM '{title}' has no cluster centers; run clustering first")]
    NotClustered { title: String },
    #[error("MSM '{title}' has no discrete trajectories; assign to clusters first")]
    NotAssigned { title: String },
    #[error("MSM '{title}' has not been built; estimate a model first")]
    NotBuilt { title: String },
    #[error(
        "Discrete trajectory references microstate {microstate} but only {clusters} cluster centers exist"
    )]
    MicrostateOutOfRange { microstate: usize, clusters: usize },

    // Lookup errors: raised to the caller, never silently defaulted.
    #[error("Metastable state {state} out of range for {n_states} states")]
    StateOutOfRange { state: usize, n_states: usize },
    #[error("No cached results under assignment key '{0}'")]
    MissingAssignment(AssignmentKey),

    // Estimation errors.
    #[error("No transitions observed at the requested lag")]
    NoTransitions,
    #[error("Macrostate {state} has no active microstates; cannot sample passage times")]
    EmptyMacrostate { state: usize },
    #[error("Markov estimation failed: {source}")]
    Markov {
        #[from]
        source: MarkovError,
    },

    #[error("Collection error: {source}")]
    Collection {
        #[from]
        source: CollectionError,
    },
    #[error("Snapshot error: {source}")]
    Snapshot {
        #[from]
        source: crate::core::io::snapshot::SnapshotError,
    },
}
