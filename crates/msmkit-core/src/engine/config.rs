use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

fn default_n_clusters() -> usize {
    100
}
fn default_cluster_max_iter() -> usize {
    50
}
fn default_n_samples() -> usize {
    100
}
fn default_min_iter() -> usize {
    10
}
fn default_max_iter() -> usize {
    100
}
fn default_tol() -> f64 {
    1.0
}
fn default_last() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Number of microstates.
    pub n_clusters: usize,
    /// Maximum k-means iterations.
    pub max_iter: usize,
    /// Seed for centroid initialization.
    pub seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            n_clusters: default_n_clusters(),
            max_iter: default_cluster_max_iter(),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    /// Posterior transition-matrix draws per passage-time estimate.
    pub n_samples: usize,
    /// Seed for the posterior sampler.
    pub seed: u64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            n_samples: default_n_samples(),
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub min_iter: usize,
    pub max_iter: usize,
    /// Absolute tolerance on the dispersion of the trailing window means.
    pub tol: f64,
    /// Number of trailing cumulative windows examined by the convergence
    /// test.
    pub last: usize,
    /// Seed for the resampling draws.
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            min_iter: default_min_iter(),
            max_iter: default_max_iter(),
            tol: default_tol(),
            last: default_last(),
            seed: 0,
        }
    }
}

/// Explicit analysis configuration, constructed once and passed by reference
/// into the components that need it. No component reads environment state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub clustering: ClusteringConfig,
    pub estimation: EstimationConfig,
    pub bootstrap: BootstrapConfig,
}

impl AnalysisConfig {
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }
}

#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    n_clusters: Option<usize>,
    cluster_max_iter: Option<usize>,
    clustering_seed: Option<u64>,
    n_samples: Option<usize>,
    estimation_seed: Option<u64>,
    min_iter: Option<usize>,
    max_iter: Option<usize>,
    tol: Option<f64>,
    last: Option<usize>,
    bootstrap_seed: Option<u64>,
}

impl AnalysisConfigBuilder {
    pub fn n_clusters(mut self, n: usize) -> Self {
        self.n_clusters = Some(n);
        self
    }
    pub fn cluster_max_iter(mut self, n: usize) -> Self {
        self.cluster_max_iter = Some(n);
        self
    }
    pub fn clustering_seed(mut self, seed: u64) -> Self {
        self.clustering_seed = Some(seed);
        self
    }
    pub fn n_samples(mut self, n: usize) -> Self {
        self.n_samples = Some(n);
        self
    }
    pub fn estimation_seed(mut self, seed: u64) -> Self {
        self.estimation_seed = Some(seed);
        self
    }
    pub fn min_iter(mut self, n: usize) -> Self {
        self.min_iter = Some(n);
        self
    }
    pub fn max_iter(mut self, n: usize) -> Self {
        self.max_iter = Some(n);
        self
    }
    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = Some(tol);
        self
    }
    pub fn last(mut self, n: usize) -> Self {
        self.last = Some(n);
        self
    }
    pub fn bootstrap_seed(mut self, seed: u64) -> Self {
        self.bootstrap_seed = Some(seed);
        self
    }

    pub fn build(self) -> AnalysisConfig {
        let defaults = AnalysisConfig::default();
        AnalysisConfig {
            clustering: ClusteringConfig {
                n_clusters: self.n_clusters.unwrap_or(defaults.clustering.n_clusters),
                max_iter: self
                    .cluster_max_iter
                    .unwrap_or(defaults.clustering.max_iter),
                seed: self.clustering_seed.unwrap_or(defaults.clustering.seed),
            },
            estimation: EstimationConfig {
                n_samples: self.n_samples.unwrap_or(defaults.estimation.n_samples),
                seed: self.estimation_seed.unwrap_or(defaults.estimation.seed),
            },
            bootstrap: BootstrapConfig {
                min_iter: self.min_iter.unwrap_or(defaults.bootstrap.min_iter),
                max_iter: self.max_iter.unwrap_or(defaults.bootstrap.max_iter),
                tol: self.tol.unwrap_or(defaults.bootstrap.tol),
                last: self.last.unwrap_or(defaults.bootstrap.last),
                seed: self.bootstrap_seed.unwrap_or(defaults.bootstrap.seed),
            },
        }
    }
}
