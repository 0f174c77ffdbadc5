use crate::core::models::msm::{
    AssignmentKey, Msm, PassageRate, PassageStatistic, StateComparison, StateStatistic,
};
use crate::core::units::TimeUnit;
use crate::engine::error::EngineError;
use crate::engine::estimator::sample_mfpt;
use rand::Rng;
use tracing::{debug, info};

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Computes equilibrium macrostate probabilities from the full stationary
/// distribution and caches them under `key`.
///
/// `sets` is a full-range metastable partition, normally the `key` source's
/// PCCA result. `weights`, when given, scales each member's stationary
/// probability (one weight vector per macrostate, matching the partition
/// shape) and lets callers discount microstates without re-partitioning.
/// Probabilities are in percent; the spread is the dispersion of the
/// weighted member probabilities within each macrostate, not an error bar.
pub fn assign_to_metastable(
    msm: &mut Msm,
    key: &AssignmentKey,
    sets: &[Vec<usize>],
    weights: Option<&[Vec<f64>]>,
    overwrite: bool,
) -> Result<(), EngineError> {
    if !overwrite && msm.metastable_assignments.contains_key(key) {
        debug!(title = %msm.title, %key, "Reusing cached metastable assignment");
        return Ok(());
    }
    if let Some(weights) = weights {
        if weights.len() != sets.len() {
            return Err(EngineError::ListLengthMismatch {
                what: "state weights",
                expected: sets.len(),
                found: weights.len(),
            });
        }
        for (set, state_weights) in sets.iter().zip(weights.iter()) {
            if state_weights.len() != set.len() {
                return Err(EngineError::ListLengthMismatch {
                    what: "member weights",
                    expected: set.len(),
                    found: state_weights.len(),
                });
            }
        }
    }
    let stationary = msm
        .stationary_distribution
        .as_ref()
        .ok_or_else(|| EngineError::NotBuilt {
            title: msm.title.clone(),
        })?;

    let mut statistics = Vec::with_capacity(sets.len());
    for (state, set) in sets.iter().enumerate() {
        if set.is_empty() {
            statistics.push(StateStatistic {
                probability: 0.0,
                spread: 0.0,
                members: 0,
            });
            continue;
        }
        let mut weighted = Vec::with_capacity(set.len());
        for (position, &member) in set.iter().enumerate() {
            if member >= stationary.len() {
                return Err(EngineError::MicrostateOutOfRange {
                    microstate: member,
                    clusters: stationary.len(),
                });
            }
            let weight = weights.map(|w| w[state][position]).unwrap_or(1.0);
            weighted.push(stationary[member] * weight);
        }
        let (mean, std) = mean_and_std(&weighted);
        statistics.push(StateStatistic {
            probability: mean * set.len() as f64 * 100.0,
            spread: std * 100.0,
            members: set.len(),
        });
    }

    for (state, stat) in statistics.iter().enumerate() {
        info!(
            title = %msm.title,
            state,
            members = stat.members,
            probability = format!("{:.2}%", stat.probability),
            "Metastable state probability"
        );
    }
    msm.metastable_assignments.insert(key.clone(), statistics);
    Ok(())
}

/// Samples mean first passage times between every ordered macrostate pair
/// and caches them under `key`, in microseconds.
///
/// Each macrostate is first restricted to the model's active set; a
/// macrostate left with no active member cannot take part in passage
/// statistics and is reported as an error rather than silently skipped.
pub fn compute_mfpt(
    msm: &mut Msm,
    key: &AssignmentKey,
    sets: &[Vec<usize>],
    rng: &mut impl Rng,
    overwrite: bool,
) -> Result<(), EngineError> {
    if !overwrite && msm.mfpt.contains_key(key) {
        debug!(title = %msm.title, %key, "Reusing cached passage times");
        return Ok(());
    }
    let model = msm.model.as_ref().ok_or_else(|| EngineError::NotBuilt {
        title: msm.title.clone(),
    })?;

    let restricted: Vec<Vec<usize>> = sets
        .iter()
        .map(|set| {
            set.iter()
                .filter_map(|&m| model.active_local_index(m))
                .collect()
        })
        .collect();
    if sets.len() > 1
        && let Some(state) = restricted.iter().position(|set| set.is_empty())
    {
        return Err(EngineError::EmptyMacrostate { state });
    }

    let step_us = msm.timestep.to(TimeUnit::Microseconds);
    let unit = TimeUnit::Microseconds.symbol();

    let mut passages = Vec::new();
    for (i, origin) in restricted.iter().enumerate() {
        for (j, target) in restricted.iter().enumerate() {
            if i == j {
                continue;
            }
            let samples: Vec<f64> = sample_mfpt(model, origin, target, rng)?
                .into_iter()
                .map(|frames| frames * step_us)
                .collect();
            let (mean, std_dev) = mean_and_std(&samples);
            info!(
                title = %msm.title,
                transition = format!("{i}->{j}"),
                mfpt = format!("{mean:.3} {unit} (± {std_dev:.3} {unit})"),
                "Mean first passage time"
            );
            passages.push(PassageStatistic {
                from: i,
                to: j,
                mean,
                std_dev,
                unit: unit.to_string(),
            });
        }
    }
    msm.mfpt.insert(key.clone(), passages);
    Ok(())
}

/// Derives mean first passage rates as reciprocal passage times, with the
/// relative error carried over, and caches them under `key`.
pub fn compute_mfpr(
    msm: &mut Msm,
    key: &AssignmentKey,
    overwrite: bool,
) -> Result<(), EngineError> {
    if !overwrite && msm.mfpr.contains_key(key) {
        debug!(title = %msm.title, %key, "Reusing cached passage rates");
        return Ok(());
    }
    let passages = msm
        .mfpt
        .get(key)
        .ok_or_else(|| EngineError::MissingAssignment(key.clone()))?;

    let rates: Vec<PassageRate> = passages
        .iter()
        .map(|passage| {
            let rate = 1.0 / passage.mean;
            PassageRate {
                from: passage.from,
                to: passage.to,
                rate,
                error: rate * (passage.std_dev / passage.mean),
                unit: passage.unit.clone(),
            }
        })
        .collect();
    for rate in &rates {
        info!(
            title = %msm.title,
            transition = format!("{}->{}", rate.from, rate.to),
            mfpr = format!("{:.3}/{} (± {:.3}/{})", rate.rate, rate.unit, rate.error, rate.unit),
            "Mean first passage rate"
        );
    }
    msm.mfpr.insert(key.clone(), rates);
    Ok(())
}

/// Probability ratio versus passage-rate ratio for every unordered macrostate
/// pair. The two agree when the metastable partition describes the dynamics
/// well; this is a reporting diagnostic with no pass/fail threshold.
pub fn compare_states_and_timescales(
    msm: &Msm,
    key: &AssignmentKey,
) -> Result<Vec<StateComparison>, EngineError> {
    let assignments = msm
        .metastable_assignments
        .get(key)
        .ok_or_else(|| EngineError::MissingAssignment(key.clone()))?;
    let rates = msm
        .mfpr
        .get(key)
        .ok_or_else(|| EngineError::MissingAssignment(key.clone()))?;
    let rate = |from: usize, to: usize| -> Result<f64, EngineError> {
        rates
            .iter()
            .find(|r| r.from == from && r.to == to)
            .map(|r| r.rate)
            .ok_or_else(|| EngineError::MissingAssignment(key.clone()))
    };

    let n = assignments.len();
    let mut comparisons = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let (pa, pb) = (assignments[i].probability, assignments[j].probability);
            let (ra, rb) = (rate(i, j)?, rate(j, i)?);
            comparisons.push(StateComparison {
                states: (i, j),
                probability_ratio: pa.max(pb) / pa.min(pb),
                rate_ratio: ra.max(rb) / ra.min(rb),
            });
        }
    }
    Ok(comparisons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::TimeQuantity;
    use crate::engine::estimator::{Lag, build_msm};
    use crate::engine::pcca::run_pcca;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn built_msm() -> (Msm, AssignmentKey) {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        msm.cluster_centers = Some(DMatrix::from_row_slice(4, 1, &[0.0, 1.0, 10.0, 11.0]));
        let mut dtraj = Vec::new();
        for _ in 0..50 {
            dtraj.extend_from_slice(&[0, 1, 0, 1, 0]);
        }
        dtraj.push(2);
        for _ in 0..50 {
            dtraj.extend_from_slice(&[2, 3, 2, 3, 2]);
        }
        dtraj.push(0);
        msm.discrete_trajectories = vec![dtraj];
        build_msm(&mut msm, Lag::Steps(1), 25).unwrap();
        run_pcca(&mut msm, 2, None, false).unwrap();
        (msm, AssignmentKey::new("apo", 2))
    }

    #[test]
    fn assignment_probabilities_sum_to_one_hundred_percent() {
        let (mut msm, key) = built_msm();
        let sets = msm.pcca[&2].clone();
        assign_to_metastable(&mut msm, &key, &sets, None, false).unwrap();

        let stats = &msm.metastable_assignments[&key];
        let total: f64 = stats.iter().map(|s| s.probability).sum();
        assert_relative_eq!(total, 100.0, epsilon = 1e-9);
        assert_eq!(stats.iter().map(|s| s.members).sum::<usize>(), 4);
    }

    #[test]
    fn empty_macrostate_has_zero_probability() {
        let (mut msm, key) = built_msm();
        let sets = vec![vec![0, 1, 2, 3], Vec::new()];
        assign_to_metastable(&mut msm, &key, &sets, None, false).unwrap();

        let stats = &msm.metastable_assignments[&key];
        assert_eq!(stats[1].probability, 0.0);
        assert_eq!(stats[1].members, 0);
    }

    #[test]
    fn zero_weights_suppress_a_macrostate() {
        let (mut msm, key) = built_msm();
        let sets = msm.pcca[&2].clone();
        let weights: Vec<Vec<f64>> = sets
            .iter()
            .enumerate()
            .map(|(state, set)| vec![if state == 0 { 0.0 } else { 1.0 }; set.len()])
            .collect();
        assign_to_metastable(&mut msm, &key, &sets, Some(&weights), false).unwrap();

        let stats = &msm.metastable_assignments[&key];
        assert_eq!(stats[0].probability, 0.0);
        assert_eq!(stats[0].spread, 0.0);
        assert!(stats[1].probability > 0.0);
    }

    #[test]
    fn assignment_rejects_misshapen_weights() {
        let (mut msm, key) = built_msm();
        let sets = msm.pcca[&2].clone();
        let weights = vec![vec![1.0]; sets.len()];
        assert!(matches!(
            assign_to_metastable(&mut msm, &key, &sets, Some(&weights), false),
            Err(EngineError::ListLengthMismatch {
                what: "member weights",
                ..
            })
        ));
    }

    #[test]
    fn assignment_rejects_out_of_range_members() {
        let (mut msm, key) = built_msm();
        let sets = vec![vec![0, 1], vec![2, 9]];
        assert!(matches!(
            assign_to_metastable(&mut msm, &key, &sets, None, false),
            Err(EngineError::MicrostateOutOfRange { microstate: 9, .. })
        ));
    }

    #[test]
    fn passage_times_cover_every_ordered_pair_in_microseconds() {
        let (mut msm, key) = built_msm();
        let sets = msm.pcca[&2].clone();
        let mut rng = StdRng::seed_from_u64(11);
        compute_mfpt(&mut msm, &key, &sets, &mut rng, false).unwrap();

        let passages = &msm.mfpt[&key];
        assert_eq!(passages.len(), 2);
        for passage in passages {
            assert!(passage.mean > 0.0);
            assert_eq!(passage.unit, "us");
        }
    }

    #[test]
    fn mfpt_rejects_macrostates_with_no_active_members() {
        let (mut msm, key) = built_msm();
        // Only inactive (here: nonexistent-in-active) members in set 1.
        let sets = vec![vec![0, 1, 2, 3], Vec::new()];
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            compute_mfpt(&mut msm, &key, &sets, &mut rng, false),
            Err(EngineError::EmptyMacrostate { state: 1 })
        ));
    }

    #[test]
    fn rates_are_reciprocal_passage_times() {
        let (mut msm, key) = built_msm();
        let sets = msm.pcca[&2].clone();
        let mut rng = StdRng::seed_from_u64(11);
        compute_mfpt(&mut msm, &key, &sets, &mut rng, false).unwrap();
        compute_mfpr(&mut msm, &key, false).unwrap();

        let passages = &msm.mfpt[&key];
        let rates = &msm.mfpr[&key];
        for (passage, rate) in passages.iter().zip(rates.iter()) {
            assert_relative_eq!(rate.rate, 1.0 / passage.mean, epsilon = 1e-12);
            assert_relative_eq!(
                rate.error,
                rate.rate * passage.std_dev / passage.mean,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn mfpr_without_mfpt_is_an_error() {
        let (mut msm, key) = built_msm();
        assert!(matches!(
            compute_mfpr(&mut msm, &key, false),
            Err(EngineError::MissingAssignment(_))
        ));
    }

    #[test]
    fn comparison_produces_one_entry_per_unordered_pair() {
        let (mut msm, key) = built_msm();
        let sets = msm.pcca[&2].clone();
        let mut rng = StdRng::seed_from_u64(11);
        assign_to_metastable(&mut msm, &key, &sets, None, false).unwrap();
        compute_mfpt(&mut msm, &key, &sets, &mut rng, false).unwrap();
        compute_mfpr(&mut msm, &key, false).unwrap();

        let comparisons = compare_states_and_timescales(&msm, &key).unwrap();
        assert_eq!(comparisons.len(), 1);
        assert_eq!(comparisons[0].states, (0, 1));
        assert!(comparisons[0].probability_ratio >= 1.0);
        assert!(comparisons[0].rate_ratio >= 1.0);
    }

    #[test]
    fn cached_results_are_reused_unless_overwritten() {
        let (mut msm, key) = built_msm();
        let sets = msm.pcca[&2].clone();
        assign_to_metastable(&mut msm, &key, &sets, None, false).unwrap();
        let sentinel = vec![StateStatistic {
            probability: -1.0,
            spread: 0.0,
            members: 0,
        }];
        msm.metastable_assignments.insert(key.clone(), sentinel.clone());

        assign_to_metastable(&mut msm, &key, &sets, None, false).unwrap();
        assert_eq!(msm.metastable_assignments[&key], sentinel);

        assign_to_metastable(&mut msm, &key, &sets, None, true).unwrap();
        assert_ne!(msm.metastable_assignments[&key], sentinel);
    }
}
