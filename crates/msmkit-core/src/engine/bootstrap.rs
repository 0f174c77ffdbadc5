use crate::core::math::gaussian::fit_gaussian;
use crate::core::math::kmeans::assign_to_centers;
use crate::core::models::msm::{AssignmentKey, BootstrapRun, BootstrapStatus, Msm};
use crate::engine::config::BootstrapConfig;
use crate::engine::error::EngineError;
use crate::engine::estimator::build_model;
use nalgebra::DMatrix;
use rand::Rng;
use tracing::{debug, info};

/// Rebuilds that fail this many times in a row end the run as exhausted
/// instead of spinning on data that can never produce a connected model.
const MAX_CONSECUTIVE_FAILURES: usize = 50;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether the accumulated probability rows have stabilized.
///
/// Per macrostate column, fits a Gaussian to each of the `last` growing
/// prefixes of the column and collects the fitted means; the column has
/// converged when the sample standard deviation of those means is below
/// `tol`. Any failed fit, or fewer rows than `last`, means not converged.
fn has_converged(rows: &[Vec<f64>], tol: f64, last: usize) -> bool {
    let n = rows.len();
    if n < last || n == 0 {
        return false;
    }
    let n_columns = rows[0].len();
    for column in 0..n_columns {
        let values: Vec<f64> = rows.iter().map(|row| row[column]).collect();
        let mut means = Vec::with_capacity(last);
        for window in 0..last {
            let end = n - last + window + 1;
            match fit_gaussian(&values[..end]) {
                Ok(fit) => means.push(fit.mean),
                Err(_) => return false,
            }
        }
        let dispersion = if last > 1 {
            let mean = means.iter().sum::<f64>() / last as f64;
            let variance =
                means.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / (last as f64 - 1.0);
            variance.sqrt()
        } else {
            0.0
        };
        if dispersion >= tol {
            return false;
        }
    }
    true
}

/// One resampled model: draws replicate indices with replacement, rebuilds
/// discrete trajectories (reassigning raw features when an alternate center
/// set is given), estimates a model at the reference lag and returns the
/// full-length stationary distribution plus the drawn indices.
fn resample_once(
    msm: &Msm,
    lag_steps: usize,
    centers: Option<&DMatrix<f64>>,
    total_clusters: usize,
    rng: &mut impl Rng,
) -> Result<(Vec<f64>, Vec<usize>), EngineError> {
    let n_replicates = match centers {
        Some(_) => msm.features.len(),
        None => msm.discrete_trajectories.len(),
    };
    let indices: Vec<usize> = (0..n_replicates).map(|_| rng.gen_range(0..n_replicates)).collect();

    let dtrajs: Vec<Vec<usize>> = match centers {
        Some(centers) => {
            let resampled: Vec<DMatrix<f64>> =
                indices.iter().map(|&i| msm.features[i].clone()).collect();
            assign_to_centers(&resampled, centers)?
        }
        None => indices
            .iter()
            .map(|&i| msm.discrete_trajectories[i].clone())
            .collect(),
    };

    let model = build_model(&dtrajs, lag_steps, total_clusters, 1)?;
    let stationary: Vec<f64> = model.full_stationary().iter().copied().collect();
    Ok((stationary, indices))
}

/// Bootstraps macrostate probabilities for the fixed reference partition
/// `sets` until the distribution of accumulated samples stabilizes, or the
/// iteration budget runs out. Accumulates onto any previous non-terminal run
/// under `key`; terminal runs are returned as-is unless `overwrite`.
#[allow(clippy::too_many_arguments)]
pub fn bootstrap(
    msm: &mut Msm,
    key: &AssignmentKey,
    sets: &[Vec<usize>],
    lag_steps: usize,
    centers: Option<&DMatrix<f64>>,
    config: &BootstrapConfig,
    rng: &mut impl Rng,
    overwrite: bool,
) -> Result<(), EngineError> {
    let total_clusters = match centers {
        Some(centers) => centers.nrows(),
        None => msm.n_clusters().ok_or_else(|| EngineError::NotClustered {
            title: msm.title.clone(),
        })?,
    };
    if msm.discrete_trajectories.is_empty() && centers.is_none() {
        return Err(EngineError::NotAssigned {
            title: msm.title.clone(),
        });
    }
    if centers.is_some() && msm.features.is_empty() {
        return Err(EngineError::NoData {
            title: msm.title.clone(),
        });
    }
    if let Some(&member) = sets.iter().flatten().find(|&&m| m >= total_clusters) {
        return Err(EngineError::MicrostateOutOfRange {
            microstate: member,
            clusters: total_clusters,
        });
    }

    let mut run = match msm.bootstrap.get(key) {
        Some(existing) if !overwrite => {
            if existing.is_terminal() {
                debug!(title = %msm.title, %key, "Reusing terminal bootstrap run");
                return Ok(());
            }
            existing.clone()
        }
        _ => BootstrapRun::default(),
    };
    run.status = BootstrapStatus::Accumulating;

    let mut converged = has_converged(&run.probabilities, config.tol, config.last);
    let mut failures = 0usize;
    while (!converged && run.iterations() < config.max_iter) || run.iterations() < config.min_iter
    {
        let (stationary, indices) =
            match resample_once(msm, lag_steps, centers, total_clusters, rng) {
                Ok(result) => result,
                Err(error) => {
                    debug!(title = %msm.title, %error, "Discarding failed bootstrap rebuild");
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        run.status = BootstrapStatus::Exhausted;
                        msm.bootstrap.insert(key.clone(), run);
                        return Ok(());
                    }
                    continue;
                }
            };
        failures = 0;

        let row: Vec<f64> = sets
            .iter()
            .map(|set| round2(set.iter().map(|&m| stationary[m]).sum::<f64>() * 100.0))
            .collect();
        run.probabilities.push(row);
        run.trajectories.push(indices);

        if run.iterations() >= config.min_iter {
            converged = has_converged(&run.probabilities, config.tol, config.last);
        }
    }

    run.status = if converged {
        BootstrapStatus::Converged
    } else {
        BootstrapStatus::Exhausted
    };
    run.summary = (0..sets.len())
        .map(|column| {
            let values: Vec<f64> = run.probabilities.iter().map(|row| row[column]).collect();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
            (mean, variance.sqrt())
        })
        .collect();
    for (state, (mean, std)) in run.summary.iter().enumerate() {
        info!(
            title = %msm.title,
            state,
            probability = format!("{:.2}% ± {:.2}%", mean, std),
            iterations = run.iterations(),
            "Bootstrapped state probability"
        );
    }
    msm.bootstrap.insert(key.clone(), run);
    Ok(())
}
