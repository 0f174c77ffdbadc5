use super::model::MarkovModel;
use crate::core::units::TimeQuantity;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum KeyError {
    #[error("Assignment key has to be in the format \"title, N states\". Was: '{0}'")]
    Malformed(String),
}

/// Identifies a cached metastable analysis: the MSM whose partition is
/// authoritative, and the number of macrostates.
///
/// Serialized as the string `"{title}, {n} states"` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AssignmentKey {
    pub source_title: String,
    pub n_states: usize,
}

impl AssignmentKey {
    pub fn new(source_title: impl Into<String>, n_states: usize) -> Self {
        Self {
            source_title: source_title.into(),
            n_states,
        }
    }
}

impl fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {} states", self.source_title, self.n_states)
    }
}

impl From<AssignmentKey> for String {
    fn from(key: AssignmentKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for AssignmentKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (title, rest) = value
            .rsplit_once(", ")
            .ok_or_else(|| KeyError::Malformed(value.clone()))?;
        let n_states = rest
            .strip_suffix(" states")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| KeyError::Malformed(value.clone()))?;
        Ok(Self {
            source_title: title.to_string(),
            n_states,
        })
    }
}

/// Equilibrium statistics of one macrostate.
///
/// `spread` is the dispersion of the weighted member probabilities, not a
/// statistical error bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateStatistic {
    /// Equilibrium probability in percent.
    pub probability: f64,
    /// Population standard deviation of the weighted member probabilities,
    /// in percent.
    pub spread: f64,
    /// Number of member microstates.
    pub members: usize,
}

/// Mean first passage time between an ordered macrostate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageStatistic {
    pub from: usize,
    pub to: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub unit: String,
}

/// Mean first passage rate between an ordered macrostate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRate {
    pub from: usize,
    pub to: usize,
    pub rate: f64,
    pub error: f64,
    /// Unit of the reciprocal passage time, e.g. "us" for a rate per
    /// microsecond.
    pub unit: String,
}

/// Probability-ratio versus rate-ratio diagnostic for one unordered
/// macrostate pair. Reporting only; no pass/fail threshold is defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateComparison {
    pub states: (usize, usize),
    pub probability_ratio: f64,
    pub rate_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BootstrapStatus {
    #[default]
    Unstarted,
    Accumulating,
    Converged,
    Exhausted,
}

/// Accumulated bootstrap state for one assignment key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapRun {
    pub status: BootstrapStatus,
    /// One row of macrostate probabilities (percent) per accepted iteration.
    pub probabilities: Vec<Vec<f64>>,
    /// Which replicate indices were resampled in each accepted iteration.
    pub trajectories: Vec<Vec<usize>>,
    /// Per-macrostate mean and standard deviation over all accepted rows.
    pub summary: Vec<(f64, f64)>,
}

impl BootstrapRun {
    pub fn iterations(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            BootstrapStatus::Converged | BootstrapStatus::Exhausted
        )
    }
}

/// One simulated system's complete analysis state.
///
/// Created empty, populated by feature loading, clustered (own or shared
/// centers), assigned to clusters, then built into a lag-time model. All
/// downstream artifacts are cached per [`AssignmentKey`] and recomputed only
/// on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Msm {
    pub title: String,
    pub timestep: TimeQuantity,
    /// Feature matrices, one `(frames, n_dims)` matrix per replicate; order
    /// is provenance order and drives bootstrap resampling.
    pub features: Vec<DMatrix<f64>>,
    pub feature_names: Option<Vec<String>>,
    pub cluster_centers: Option<DMatrix<f64>>,
    pub discrete_trajectories: Vec<Vec<usize>>,
    pub model: Option<MarkovModel>,
    /// Full-length stationary distribution (always one entry per cluster
    /// center once built; disconnected entries are exactly 0.0).
    pub stationary_distribution: Option<DVector<f64>>,
    /// Canonical metastable partitions, by number of macrostates.
    pub pcca: HashMap<usize, Vec<Vec<usize>>>,
    pub state_labels: HashMap<usize, Vec<String>>,
    pub metastable_assignments: HashMap<AssignmentKey, Vec<StateStatistic>>,
    pub mfpt: HashMap<AssignmentKey, Vec<PassageStatistic>>,
    pub mfpr: HashMap<AssignmentKey, Vec<PassageRate>>,
    pub bootstrap: HashMap<AssignmentKey, BootstrapRun>,
}

impl Msm {
    pub fn new(title: impl Into<String>, timestep: TimeQuantity) -> Self {
        Self {
            title: title.into(),
            timestep,
            features: Vec::new(),
            feature_names: None,
            cluster_centers: None,
            discrete_trajectories: Vec::new(),
            model: None,
            stationary_distribution: None,
            pcca: HashMap::new(),
            state_labels: HashMap::new(),
            metastable_assignments: HashMap::new(),
            mfpt: HashMap::new(),
            mfpr: HashMap::new(),
            bootstrap: HashMap::new(),
        }
    }

    /// Number of cluster centers, once clustering has happened.
    pub fn n_clusters(&self) -> Option<usize> {
        self.cluster_centers.as_ref().map(|c| c.nrows())
    }

    pub fn n_replicates(&self) -> usize {
        self.features.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::{TimeQuantity, TimeUnit};

    #[test]
    fn assignment_key_round_trips_through_its_string_form() {
        let key = AssignmentKey::new("reference", 3);
        let as_string: String = key.clone().into();
        assert_eq!(as_string, "reference, 3 states");
        let parsed = AssignmentKey::try_from(as_string).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn assignment_key_allows_commas_in_titles() {
        let key = AssignmentKey::new("apo, mutant", 2);
        let parsed = AssignmentKey::try_from(String::from(key.clone())).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn assignment_key_rejects_malformed_strings() {
        assert!(AssignmentKey::try_from("no states here".to_string()).is_err());
        assert!(AssignmentKey::try_from("title, x states".to_string()).is_err());
    }

    #[test]
    fn new_msm_is_empty() {
        let msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        assert_eq!(msm.n_replicates(), 0);
        assert_eq!(msm.n_clusters(), None);
        assert!(msm.model.is_none());
        assert!(msm.pcca.is_empty());
    }

    #[test]
    fn bootstrap_run_reports_terminal_states() {
        let mut run = BootstrapRun::default();
        assert!(!run.is_terminal());
        run.status = BootstrapStatus::Converged;
        assert!(run.is_terminal());
        run.status = BootstrapStatus::Exhausted;
        assert!(run.is_terminal());
    }
}
