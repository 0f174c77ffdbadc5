use crate::core::models::msm::Msm;
use crate::engine::error::EngineError;
use crate::engine::estimator::metastable_sets;
use nalgebra::DMatrix;
use tracing::{debug, info};

/// Distance of each set's mean member center from the feature-space origin.
/// Empty sets are pushed past every occupied set so they sort last.
fn set_distances(sets: &[Vec<usize>], centers: &DMatrix<f64>) -> Vec<f64> {
    let mut distances: Vec<f64> = sets
        .iter()
        .map(|set| {
            if set.is_empty() {
                f64::NAN
            } else {
                set.iter()
                    .map(|&m| centers.row(m).norm())
                    .sum::<f64>()
                    / set.len() as f64
            }
        })
        .collect();
    let max = distances
        .iter()
        .copied()
        .filter(|d| d.is_finite())
        .fold(0.0f64, f64::max);
    for distance in &mut distances {
        if !distance.is_finite() {
            *distance = max + 10.0;
        }
    }
    distances
}

/// Mean feature-space position of each occupied set's member centers.
fn set_means(sets: &[Vec<usize>], centers: &DMatrix<f64>) -> Vec<Option<DMatrix<f64>>> {
    sets.iter()
        .map(|set| {
            if set.is_empty() {
                return None;
            }
            let mut mean = DMatrix::zeros(1, centers.ncols());
            for &member in set {
                mean += centers.row(member);
            }
            Some(mean / set.len() as f64)
        })
        .collect()
}

/// Partitions the full microstate range into `n_states` metastable sets and
/// caches the result on the MSM, keyed by `n_states`.
///
/// The active set is split by the model's metastable decomposition; sets are
/// then reordered by their mean center distance from the origin, so state 0
/// is always the innermost basin. Disconnected and never-visited microstates
/// are folded in afterwards: into `disconnected_state` when one is given,
/// otherwise each onto the set whose pre-fold mean center is nearest.
pub fn run_pcca(
    msm: &mut Msm,
    n_states: usize,
    disconnected_state: Option<usize>,
    overwrite: bool,
) -> Result<(), EngineError> {
    if !overwrite && msm.pcca.contains_key(&n_states) {
        debug!(title = %msm.title, n_states, "Reusing cached metastable partition");
        return Ok(());
    }
    let model = msm.model.as_ref().ok_or_else(|| EngineError::NotBuilt {
        title: msm.title.clone(),
    })?;
    let centers = msm
        .cluster_centers
        .as_ref()
        .ok_or_else(|| EngineError::NotClustered {
            title: msm.title.clone(),
        })?;
    if let Some(state) = disconnected_state
        && state >= n_states
    {
        return Err(EngineError::StateOutOfRange {
            state,
            n_states,
        });
    }

    // Active-local sets, remapped to original microstate indices.
    let active = model.active_set();
    let local_sets = metastable_sets(model, n_states)?;
    let mut sets: Vec<Vec<usize>> = local_sets
        .iter()
        .map(|set| set.iter().map(|&l| active[l]).collect())
        .collect();

    // Innermost basin first.
    let distances = set_distances(&sets, centers);
    let mut order: Vec<usize> = (0..n_states).collect();
    order.sort_by(|&a, &b| {
        distances[a]
            .partial_cmp(&distances[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sets = order.into_iter().map(|i| std::mem::take(&mut sets[i])).collect();

    // Fold everything outside the active set: true disconnected components
    // plus trailing centers no trajectory ever visited. Means are frozen
    // before folding so the outcome does not depend on fold order.
    let max_observed = model
        .connected_sets
        .iter()
        .flatten()
        .copied()
        .max()
        .unwrap_or(0);
    let mut orphans = model.disconnected_members();
    orphans.extend(max_observed + 1..model.total_clusters);

    let means = set_means(&sets, centers);
    for orphan in orphans {
        let destination = match disconnected_state {
            Some(state) => state,
            None => nearest_set(&means, centers, orphan),
        };
        sets[destination].push(orphan);
    }
    for set in &mut sets {
        set.sort_unstable();
    }

    info!(
        title = %msm.title,
        n_states,
        occupied = sets.iter().filter(|s| !s.is_empty()).count(),
        "Computed metastable partition"
    );
    msm.pcca.insert(n_states, sets);
    Ok(())
}

/// Index of the occupied set whose mean center is closest to `microstate`.
/// The active set is never empty, so at least one candidate always exists.
fn nearest_set(means: &[Option<DMatrix<f64>>], centers: &DMatrix<f64>, microstate: usize) -> usize {
    let position = centers.row(microstate);
    means
        .iter()
        .enumerate()
        .filter_map(|(set, mean)| {
            mean.as_ref()
                .map(|mean| (set, (mean.row(0) - position).norm()))
        })
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(set, _)| set)
        .unwrap_or(0)
}
