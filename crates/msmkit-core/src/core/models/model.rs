use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// A lag-time Markov model estimated from discrete trajectories.
///
/// The transition matrix, its stationary distribution and the transition
/// counts are all restricted to the active set (the largest strongly
/// connected component), in ascending microstate order. `connected_sets`
/// holds the active set first, then every disconnected component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkovModel {
    pub lag_steps: usize,
    /// Total number of cluster centers, including never-visited ones.
    pub total_clusters: usize,
    pub connected_sets: Vec<Vec<usize>>,
    /// Transition counts restricted to the active set (active-local indices).
    pub counts: DMatrix<f64>,
    pub transition: DMatrix<f64>,
    /// Stationary distribution over the active set only.
    pub stationary: DVector<f64>,
    /// Number of posterior transition-matrix draws used by the sampler.
    pub n_samples: usize,
}

impl MarkovModel {
    /// The active state set: original microstate indices, ascending.
    pub fn active_set(&self) -> &[usize] {
        &self.connected_sets[0]
    }

    /// All disconnected microstates, ascending across every non-active
    /// component. Never-visited trailing microstates do not appear here.
    pub fn disconnected_members(&self) -> Vec<usize> {
        let mut members: Vec<usize> = self.connected_sets[1..]
            .iter()
            .flatten()
            .copied()
            .collect();
        members.sort_unstable();
        members
    }

    /// Active-set-local index of an original microstate, if it is active.
    pub fn active_local_index(&self, microstate: usize) -> Option<usize> {
        self.active_set().binary_search(&microstate).ok()
    }

    /// Stationary distribution over the full cluster range.
    ///
    /// Starts from the active-set distribution, inserts an explicit 0.0 at
    /// every disconnected microstate's original position (ascending, so
    /// later insertions see already-shifted entries), then appends 0.0 for
    /// trailing microstates no trajectory ever visited. The result always
    /// has exactly `total_clusters` entries.
    pub fn full_stationary(&self) -> DVector<f64> {
        let mut values: Vec<f64> = self.stationary.iter().copied().collect();
        for member in self.disconnected_members() {
            values.insert(member, 0.0);
        }
        while values.len() < self.total_clusters {
            values.push(0.0);
        }
        DVector::from_vec(values)
    }

    /// Implied timescales `-lag / ln(lambda_i)` for the `k` slowest
    /// non-stationary processes, in trajectory frames. Eigenvalues at or
    /// below zero yield `NaN`; eigenvalues at or above one yield infinity.
    pub fn timescales(&self, k: usize) -> Vec<f64> {
        let mut eigenvalues = self.propagator_eigenvalues();
        eigenvalues.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        eigenvalues
            .into_iter()
            .skip(1) // the stationary eigenvalue
            .take(k)
            .map(|lambda| {
                if lambda >= 1.0 {
                    f64::INFINITY
                } else if lambda <= 0.0 {
                    f64::NAN
                } else {
                    -(self.lag_steps as f64) / lambda.ln()
                }
            })
            .collect()
    }

    /// Eigenvalues of the transition matrix, computed through the symmetrized
    /// propagator (valid because the estimate satisfies detailed balance).
    pub(crate) fn propagator_eigenvalues(&self) -> Vec<f64> {
        self.symmetrized_propagator()
            .symmetric_eigen()
            .eigenvalues
            .iter()
            .copied()
            .collect()
    }

    /// `S_ij = sqrt(pi_i / pi_j) P_ij`, symmetric under detailed balance and
    /// sharing the transition matrix's spectrum.
    pub(crate) fn symmetrized_propagator(&self) -> DMatrix<f64> {
        let n = self.transition.nrows();
        let mut symmetric = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                symmetric[(i, j)] =
                    self.transition[(i, j)] * (self.stationary[i] / self.stationary[j]).sqrt();
            }
        }
        // Average out round-off so SymmetricEigen sees an exactly symmetric
        // matrix.
        for i in 0..n {
            for j in (i + 1)..n {
                let mean = 0.5 * (symmetric[(i, j)] + symmetric[(j, i)]);
                symmetric[(i, j)] = mean;
                symmetric[(j, i)] = mean;
            }
        }
        symmetric
    }

    /// Number of microstates in the active set (the largest connected
    /// component).
    pub fn n_active(&self) -> usize {
        self.connected_sets[0].len()
    }
}
