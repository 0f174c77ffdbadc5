use crate::core::math::kmeans::{assign_to_centers, kmeans};
use crate::core::math::markov::{
    count_transitions, mean_first_passage, reversible_estimate, sample_transition_matrix,
    stationary_distribution, strongly_connected_components,
};
use crate::core::models::model::MarkovModel;
use crate::core::models::msm::Msm;
use crate::core::units::{TimeQuantity, TimeUnit};
use crate::engine::error::EngineError;
use nalgebra::DMatrix;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::str::FromStr;
use tracing::info;

/// Lag time for model estimation, either directly in trajectory steps or as a
/// physical time quantity resolved against the trajectory timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lag {
    Steps(usize),
    Time(TimeQuantity),
}

impl Lag {
    /// The lag in trajectory steps. A physical lag is divided by the timestep
    /// and rounded down; anything that resolves below one step is rejected.
    pub fn resolve(&self, timestep: TimeQuantity) -> Result<usize, EngineError> {
        let steps = match self {
            Lag::Steps(steps) => *steps,
            Lag::Time(time) => {
                let ratio = time.to(TimeUnit::Picoseconds) / timestep.to(TimeUnit::Picoseconds);
                ratio.floor() as usize
            }
        };
        if steps == 0 {
            return Err(EngineError::ZeroLag);
        }
        Ok(steps)
    }
}

impl FromStr for Lag {
    type Err = EngineError;

    /// Parses either a bare step count (`"5"`) or a physical time
    /// (`"2 ns"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(steps) = s.trim().parse::<usize>() {
            return Ok(Lag::Steps(steps));
        }
        Ok(Lag::Time(s.parse::<TimeQuantity>()?))
    }
}

/// Estimates a reversible Markov model from discrete trajectories.
///
/// Transition counts run over the visited index range; the model is then
/// restricted to the largest strongly connected component. `total_clusters`
/// only fixes the length of the full stationary distribution.
pub fn build_model(
    dtrajs: &[Vec<usize>],
    lag_steps: usize,
    total_clusters: usize,
    n_samples: usize,
) -> Result<MarkovModel, EngineError> {
    let n_observed = dtrajs
        .iter()
        .flatten()
        .copied()
        .max()
        .map(|m| m + 1)
        .unwrap_or(0);
    if n_observed == 0 {
        return Err(EngineError::NoTransitions);
    }

    let counts = count_transitions(dtrajs, lag_steps, n_observed);
    if counts.sum() <= 0.0 {
        return Err(EngineError::NoTransitions);
    }

    let connected_sets = strongly_connected_components(&counts);
    let active = &connected_sets[0];
    let mut active_counts = DMatrix::zeros(active.len(), active.len());
    for (li, &gi) in active.iter().enumerate() {
        for (lj, &gj) in active.iter().enumerate() {
            active_counts[(li, lj)] = counts[(gi, gj)];
        }
    }

    let (transition, stationary) = reversible_estimate(&active_counts)?;
    Ok(MarkovModel {
        lag_steps,
        total_clusters,
        connected_sets,
        counts: active_counts,
        transition,
        stationary,
        n_samples,
    })
}

/// Builds the MSM's Markov model at the given lag and caches the model plus
/// its full-range stationary distribution on the MSM. Replaces any previous
/// model and invalidates nothing else; cached metastable results keep their
/// keys.
pub fn build_msm(msm: &mut Msm, lag: Lag, n_samples: usize) -> Result<(), EngineError> {
    if msm.discrete_trajectories.is_empty() {
        return Err(EngineError::NotAssigned {
            title: msm.title.clone(),
        });
    }
    let total_clusters = msm.n_clusters().ok_or_else(|| EngineError::NotClustered {
        title: msm.title.clone(),
    })?;
    if let Some(&max) = msm
        .discrete_trajectories
        .iter()
        .flatten()
        .max()
        && max >= total_clusters
    {
        return Err(EngineError::MicrostateOutOfRange {
            microstate: max,
            clusters: total_clusters,
        });
    }

    let lag_steps = lag.resolve(msm.timestep)?;
    let model = build_model(&msm.discrete_trajectories, lag_steps, total_clusters, n_samples)?;
    info!(
        title = %msm.title,
        lag_steps,
        active = model.n_active(),
        total = total_clusters,
        "Estimated Markov model"
    );
    msm.stationary_distribution = Some(model.full_stationary());
    msm.model = Some(model);
    Ok(())
}

/// Partitions the active set into `n` metastable sets by spectral clustering:
/// k-means over the components of the `n - 1` slowest right eigenvectors.
///
/// Returns active-local indices. Fewer than `n` occupied sets is possible;
/// the partition always covers every active state exactly once. When the
/// active set has at most `n` states each state becomes its own set, padded
/// with empty sets to length `n`.
pub fn metastable_sets(model: &MarkovModel, n: usize) -> Result<Vec<Vec<usize>>, EngineError> {
    if n == 0 {
        return Err(EngineError::InvalidStateCount);
    }
    let n_active = model.n_active();
    if n_active <= n {
        let mut sets: Vec<Vec<usize>> = (0..n_active).map(|i| vec![i]).collect();
        sets.resize(n, Vec::new());
        return Ok(sets);
    }
    if n == 1 {
        return Ok(vec![(0..n_active).collect()]);
    }

    // Eigenvectors of the symmetrized propagator, slowest first. Dividing by
    // sqrt(pi) turns them into right eigenvectors of the transition matrix,
    // which are constant within a metastable set.
    let eigen = model.symmetrized_propagator().symmetric_eigen();
    let mut order: Vec<usize> = (0..n_active).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut coordinates = DMatrix::zeros(n_active, n - 1);
    for (column, &index) in order.iter().skip(1).take(n - 1).enumerate() {
        for state in 0..n_active {
            coordinates[(state, column)] =
                eigen.eigenvectors[(state, index)] / model.stationary[state].sqrt();
        }
    }

    let data = vec![coordinates];
    let mut rng = StdRng::seed_from_u64(0);
    let centers = kmeans(&data, n, 500, None, &mut rng)?;
    let assignment = &assign_to_centers(&data, &centers)?[0];

    let mut sets = vec![Vec::new(); n];
    for (state, &set) in assignment.iter().enumerate() {
        sets[set].push(state);
    }
    Ok(sets)
}

/// Draws `model.n_samples` posterior mean first passage times between two
/// active-local index sets, in trajectory frames.
pub fn sample_mfpt(
    model: &MarkovModel,
    origin: &[usize],
    target: &[usize],
    rng: &mut impl Rng,
) -> Result<Vec<f64>, EngineError> {
    let mut samples = Vec::with_capacity(model.n_samples);
    for _ in 0..model.n_samples {
        let transition = sample_transition_matrix(&model.counts, rng)?;
        let stationary = stationary_distribution(&transition)?;
        samples.push(mean_first_passage(
            &transition,
            &stationary,
            model.lag_steps,
            origin,
            target,
        )?);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // Two metastable blocks {0, 1} and {2, 3} with rare crossings.
    fn two_block_dtraj() -> Vec<Vec<usize>> {
        let mut dtraj = Vec::new();
        for _ in 0..50 {
            dtraj.extend_from_slice(&[0, 1, 0, 1, 0]);
        }
        dtraj.push(2);
        for _ in 0..50 {
            dtraj.extend_from_slice(&[2, 3, 2, 3, 2]);
        }
        dtraj.push(0);
        vec![dtraj]
    }

    #[test]
    fn lag_resolves_steps_directly() {
        let timestep = TimeQuantity::new(10.0, TimeUnit::Picoseconds);
        assert_eq!(Lag::Steps(5).resolve(timestep).unwrap(), 5);
    }

    #[test]
    fn lag_resolves_physical_time_by_flooring() {
        let timestep = TimeQuantity::new(10.0, TimeUnit::Picoseconds);
        let lag = Lag::Time(TimeQuantity::new(25.0, TimeUnit::Picoseconds));
        assert_eq!(lag.resolve(timestep).unwrap(), 2);
    }

    #[test]
    fn sub_timestep_lag_is_rejected() {
        let timestep = TimeQuantity::new(10.0, TimeUnit::Picoseconds);
        let lag = Lag::Time(TimeQuantity::new(5.0, TimeUnit::Picoseconds));
        assert!(matches!(lag.resolve(timestep), Err(EngineError::ZeroLag)));
    }

    #[test]
    fn lag_parses_steps_and_times() {
        assert_eq!("5".parse::<Lag>().unwrap(), Lag::Steps(5));
        assert_eq!(
            "2 ns".parse::<Lag>().unwrap(),
            Lag::Time(TimeQuantity::new(2.0, TimeUnit::Nanoseconds))
        );
        assert!("2 lightyears".parse::<Lag>().is_err());
    }

    #[test]
    fn build_model_restricts_to_the_largest_component() {
        // State 4 is an absorbing singleton, state 5 exists but is never
        // visited.
        let mut dtrajs = two_block_dtraj();
        dtrajs.push(vec![4, 4, 4, 4]);
        let model = build_model(&dtrajs, 1, 6, 10).unwrap();

        assert_eq!(model.active_set(), &[0, 1, 2, 3]);
        assert!(model.disconnected_members().contains(&4));
        assert_eq!(model.total_clusters, 6);
        assert_relative_eq!(model.stationary.sum(), 1.0, epsilon = 1e-12);
        assert_eq!(model.full_stationary().len(), 6);
    }

    #[test]
    fn build_model_without_transitions_is_an_error() {
        let dtrajs = vec![vec![0], vec![1]];
        assert!(matches!(
            build_model(&dtrajs, 1, 2, 10),
            Err(EngineError::NoTransitions)
        ));
    }

    #[test]
    fn build_msm_requires_discrete_trajectories() {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        msm.cluster_centers = Some(DMatrix::from_row_slice(2, 1, &[0.0, 1.0]));
        assert!(matches!(
            build_msm(&mut msm, Lag::Steps(1), 10),
            Err(EngineError::NotAssigned { .. })
        ));
    }

    #[test]
    fn build_msm_rejects_out_of_range_microstates() {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        msm.cluster_centers = Some(DMatrix::from_row_slice(2, 1, &[0.0, 1.0]));
        msm.discrete_trajectories = vec![vec![0, 1, 7, 0]];
        assert!(matches!(
            build_msm(&mut msm, Lag::Steps(1), 10),
            Err(EngineError::MicrostateOutOfRange {
                microstate: 7,
                clusters: 2
            })
        ));
    }

    #[test]
    fn build_msm_caches_model_and_full_stationary() {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        msm.cluster_centers = Some(DMatrix::from_row_slice(4, 1, &[0.0, 1.0, 2.0, 3.0]));
        msm.discrete_trajectories = two_block_dtraj();
        build_msm(&mut msm, Lag::Steps(1), 10).unwrap();

        let stationary = msm.stationary_distribution.as_ref().unwrap();
        assert_eq!(stationary.len(), 4);
        assert_relative_eq!(stationary.sum(), 1.0, epsilon = 1e-9);
        assert_eq!(msm.model.as_ref().unwrap().lag_steps, 1);
    }

    #[test]
    fn metastable_sets_separate_the_two_blocks() {
        let model = build_model(&two_block_dtraj(), 1, 4, 10).unwrap();
        let mut sets = metastable_sets(&model, 2).unwrap();
        for set in &mut sets {
            set.sort_unstable();
        }
        sets.sort();
        assert_eq!(sets, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn metastable_sets_cover_every_active_state_once() {
        let model = build_model(&two_block_dtraj(), 1, 4, 10).unwrap();
        let sets = metastable_sets(&model, 3).unwrap();
        let mut all: Vec<usize> = sets.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }

    #[test]
    fn too_few_active_states_yield_singletons_and_padding() {
        let dtrajs = vec![vec![0, 1, 0, 1, 0]];
        let model = build_model(&dtrajs, 1, 2, 10).unwrap();
        let sets = metastable_sets(&model, 3).unwrap();
        assert_eq!(sets, vec![vec![0], vec![1], vec![]]);
    }

    #[test]
    fn zero_metastable_states_are_rejected() {
        let model = build_model(&two_block_dtraj(), 1, 4, 10).unwrap();
        assert!(matches!(
            metastable_sets(&model, 0),
            Err(EngineError::InvalidStateCount)
        ));
    }

    #[test]
    fn sampled_passage_times_bracket_the_point_estimate() {
        let model = build_model(&two_block_dtraj(), 1, 4, 50).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let samples = sample_mfpt(&model, &[0, 1], &[2, 3], &mut rng).unwrap();

        assert_eq!(samples.len(), 50);
        assert!(samples.iter().all(|&s| s.is_finite() && s > 0.0));
        let point = mean_first_passage(
            &model.transition,
            &model.stationary,
            model.lag_steps,
            &[0, 1],
            &[2, 3],
        )
        .unwrap();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - point).abs() / point < 0.5);
    }
}
