//! Collection-wide analysis operations.
//!
//! Every operation fans out over a title selection (`None` means all members,
//! in deterministic order) and, where a metastable partition is involved,
//! accepts a reference title whose partition is authoritative. Results are
//! cached per [`AssignmentKey`] and reused unless `overwrite` is set. All
//! operations are synchronous and deterministic given the configured seeds.

use crate::core::io::features::{FeatureSource, MissingDataPolicy};
use crate::core::io::snapshot;
use crate::core::math::kmeans::kmeans;
use crate::core::models::collection::MsmCollection;
use crate::core::models::msm::{AssignmentKey, Msm, StateComparison};
use crate::core::units::TimeQuantity;
use crate::engine::bootstrap;
use crate::engine::cluster;
use crate::engine::config::{BootstrapConfig, ClusteringConfig, EstimationConfig};
use crate::engine::error::EngineError;
use crate::engine::estimator::{self, Lag};
use crate::engine::kinetics;
use crate::engine::pcca::run_pcca;
use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Loads featurised trajectory data for several systems at once, creating
/// member MSMs as needed. `locations` must parallel `titles`; a member that
/// already holds data is reloaded only when `reload` is set.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(systems = titles.len()))]
pub fn load_data(
    collection: &mut MsmCollection,
    titles: &[String],
    locations: &[Vec<PathBuf>],
    file_names: &[String],
    trajectories: &[usize],
    frames: usize,
    timestep: TimeQuantity,
    feature_names: Option<Vec<String>>,
    missing: MissingDataPolicy,
    reload: bool,
) -> Result<(), EngineError> {
    if titles.len() != locations.len() {
        return Err(EngineError::ListLengthMismatch {
            what: "locations",
            expected: titles.len(),
            found: locations.len(),
        });
    }

    for (title, location) in titles.iter().zip(locations.iter()) {
        if !collection.contains(title) {
            collection.add_msm(Msm::new(title.clone(), timestep));
        } else if !reload && !collection.get(title)?.features.is_empty() {
            info!(title = %title, "Data already loaded, skipping");
            continue;
        }
        let msm = collection.get_mut(title)?;
        cluster::load_data(
            msm,
            FeatureSource::Files {
                locations: location.clone(),
                file_names: file_names.to_vec(),
                trajectories: trajectories.to_vec(),
                frames,
            },
            feature_names.clone(),
            missing,
        )?;
    }
    Ok(())
}

/// K-means clustering over the pooled data of the selected members. The
/// resulting centers become the collection's shared center set.
#[instrument(skip_all)]
pub fn cluster(
    collection: &mut MsmCollection,
    titles: Option<&[String]>,
    config: &ClusteringConfig,
    seed_centers: Option<&DMatrix<f64>>,
) -> Result<(), EngineError> {
    let selection = collection.resolve_titles(titles)?;
    let pooled = collection.pooled_data(&selection)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let centers = kmeans(&pooled, config.n_clusters, config.max_iter, seed_centers, &mut rng)?;
    info!(
        clusters = centers.nrows(),
        systems = selection.len(),
        "Clustered pooled data"
    );
    collection.cluster_centers = Some(centers);
    Ok(())
}

/// Assigns every selected member's data to cluster centers: an explicit
/// center set, or the collection's shared one.
pub fn assign_to_clusters(
    collection: &mut MsmCollection,
    titles: Option<&[String]>,
    centers: Option<&DMatrix<f64>>,
) -> Result<(), EngineError> {
    let selection = collection.resolve_titles(titles)?;
    let centers = match centers {
        Some(centers) => centers.clone_owned(),
        None => collection
            .cluster_centers
            .as_ref()
            .ok_or_else(|| EngineError::NotClustered {
                title: "collection".to_string(),
            })?
            .clone_owned(),
    };
    for title in &selection {
        cluster::assign_to_clusters(collection.get_mut(title)?, Some(&centers))?;
    }
    Ok(())
}

/// Builds each selected member's Markov model at the given lag.
#[instrument(skip(collection, titles))]
pub fn build_msms(
    collection: &mut MsmCollection,
    lag: Lag,
    titles: Option<&[String]>,
    config: &EstimationConfig,
) -> Result<(), EngineError> {
    let selection = collection.resolve_titles(titles)?;
    for title in &selection {
        estimator::build_msm(collection.get_mut(title)?, lag, config.n_samples)?;
    }
    Ok(())
}

/// Implied timescales per member over a range of candidate lags, in
/// trajectory frames. Lags that produce no transitions are skipped.
pub fn compute_its(
    collection: &MsmCollection,
    titles: Option<&[String]>,
    lags: &[Lag],
    n_timescales: usize,
) -> Result<BTreeMap<String, Vec<(usize, Vec<f64>)>>, EngineError> {
    let selection = collection.resolve_titles(titles)?;
    let mut results = BTreeMap::new();
    for title in &selection {
        let msm = collection.get(title)?;
        if msm.discrete_trajectories.is_empty() {
            return Err(EngineError::NotAssigned {
                title: title.clone(),
            });
        }
        let total_clusters = msm.n_clusters().ok_or_else(|| EngineError::NotClustered {
            title: title.clone(),
        })?;
        let mut per_lag = Vec::new();
        for &lag in lags {
            let lag_steps = lag.resolve(msm.timestep)?;
            match estimator::build_model(&msm.discrete_trajectories, lag_steps, total_clusters, 1)
            {
                Ok(model) => per_lag.push((lag_steps, model.timescales(n_timescales))),
                Err(EngineError::NoTransitions) => {
                    info!(title = %title, lag_steps, "No transitions at this lag, skipping");
                }
                Err(error) => return Err(error),
            }
        }
        results.insert(title.clone(), per_lag);
    }
    Ok(results)
}

/// The reference partition for one target: ensures PCCA is cached on the
/// partition source and returns the key plus a copy of the sets.
fn reference_partition(
    collection: &mut MsmCollection,
    target: &str,
    reference: Option<&str>,
    n_states: usize,
    disconnected_state: Option<usize>,
    overwrite: bool,
) -> Result<(AssignmentKey, Vec<Vec<usize>>), EngineError> {
    let source_title = reference.unwrap_or(target).to_string();
    let key = AssignmentKey::new(source_title.clone(), n_states);
    let source = collection.get_mut(&source_title)?;
    run_pcca(source, n_states, disconnected_state, overwrite)?;
    let sets = source
        .pcca
        .get(&n_states)
        .cloned()
        .ok_or_else(|| EngineError::MissingAssignment(key.clone()))?;
    Ok((key, sets))
}

/// Computes (and caches) the metastable partition for each selected member,
/// or once on the reference when one is given.
#[instrument(skip(collection, titles))]
pub fn pcca_assignments(
    collection: &mut MsmCollection,
    n_states: usize,
    reference: Option<&str>,
    titles: Option<&[String]>,
    disconnected_state: Option<usize>,
    overwrite: bool,
) -> Result<(), EngineError> {
    match reference {
        Some(reference) => {
            run_pcca(
                collection.get_mut(reference)?,
                n_states,
                disconnected_state,
                overwrite,
            )?;
        }
        None => {
            let selection = collection.resolve_titles(titles)?;
            for title in &selection {
                run_pcca(
                    collection.get_mut(title)?,
                    n_states,
                    disconnected_state,
                    overwrite,
                )?;
            }
        }
    }
    Ok(())
}

/// Equilibrium macrostate probabilities for every selected member, against
/// the reference partition (each member's own when no reference is given).
pub fn metastable_assignments(
    collection: &mut MsmCollection,
    n_states: usize,
    reference: Option<&str>,
    titles: Option<&[String]>,
    disconnected_state: Option<usize>,
    overwrite: bool,
) -> Result<(), EngineError> {
    let selection = collection.resolve_titles(titles)?;
    for title in &selection {
        let (key, sets) =
            reference_partition(collection, title, reference, n_states, disconnected_state, false)?;
        kinetics::assign_to_metastable(collection.get_mut(title)?, &key, &sets, None, overwrite)?;
    }
    Ok(())
}

/// Mean first passage times between macrostates for every selected member.
#[instrument(skip(collection, titles, config))]
pub fn mfpt(
    collection: &mut MsmCollection,
    n_states: usize,
    reference: Option<&str>,
    titles: Option<&[String]>,
    config: &EstimationConfig,
    overwrite: bool,
) -> Result<(), EngineError> {
    let selection = collection.resolve_titles(titles)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    for title in &selection {
        let (key, sets) = reference_partition(collection, title, reference, n_states, None, false)?;
        kinetics::compute_mfpt(collection.get_mut(title)?, &key, &sets, &mut rng, overwrite)?;
    }
    Ok(())
}

/// Mean first passage rates, derived from cached (or freshly computed)
/// passage times.
pub fn mfpr(
    collection: &mut MsmCollection,
    n_states: usize,
    reference: Option<&str>,
    titles: Option<&[String]>,
    config: &EstimationConfig,
    overwrite: bool,
) -> Result<(), EngineError> {
    let selection = collection.resolve_titles(titles)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    for title in &selection {
        let (key, sets) = reference_partition(collection, title, reference, n_states, None, false)?;
        let msm = collection.get_mut(title)?;
        kinetics::compute_mfpt(msm, &key, &sets, &mut rng, overwrite)?;
        kinetics::compute_mfpr(msm, &key, overwrite)?;
    }
    Ok(())
}

/// Probability-ratio versus rate-ratio diagnostics per member, computing any
/// missing assignments and rates first.
pub fn compare_states_and_timescales(
    collection: &mut MsmCollection,
    n_states: usize,
    reference: Option<&str>,
    titles: Option<&[String]>,
    config: &EstimationConfig,
    overwrite: bool,
) -> Result<BTreeMap<String, Vec<StateComparison>>, EngineError> {
    let selection = collection.resolve_titles(titles)?;
    metastable_assignments(collection, n_states, reference, Some(&selection), None, overwrite)?;
    mfpr(collection, n_states, reference, Some(&selection), config, overwrite)?;

    let mut results = BTreeMap::new();
    for title in &selection {
        let source_title = reference.unwrap_or(title).to_string();
        let key = AssignmentKey::new(source_title, n_states);
        let comparisons =
            kinetics::compare_states_and_timescales(collection.get(title)?, &key)?;
        results.insert(title.clone(), comparisons);
    }
    Ok(results)
}

/// Bootstraps macrostate probabilities for every selected member, against the
/// reference partition. The lag defaults to each member's built model; an
/// explicit lag allows bootstrapping at a different resolution. When
/// `shared_centers` is set, resampled raw features are reassigned to it.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(n_states))]
pub fn bootstrap(
    collection: &mut MsmCollection,
    n_states: usize,
    reference: Option<&str>,
    titles: Option<&[String]>,
    lag: Option<Lag>,
    shared_centers: Option<&DMatrix<f64>>,
    config: &BootstrapConfig,
    overwrite: bool,
) -> Result<(), EngineError> {
    let selection = collection.resolve_titles(titles)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    for title in &selection {
        let (key, sets) = reference_partition(collection, title, reference, n_states, None, false)?;
        let msm = collection.get_mut(title)?;
        let lag_steps = match lag {
            Some(lag) => lag.resolve(msm.timestep)?,
            None => {
                msm.model
                    .as_ref()
                    .ok_or_else(|| EngineError::NotBuilt {
                        title: title.clone(),
                    })?
                    .lag_steps
            }
        };
        bootstrap::bootstrap(
            msm,
            &key,
            &sets,
            lag_steps,
            shared_centers,
            config,
            &mut rng,
            overwrite,
        )?;
    }
    Ok(())
}

/// Attaches human-readable macrostate labels (one per macrostate) to the
/// selected members.
pub fn add_state_labels(
    collection: &mut MsmCollection,
    n_states: usize,
    labels: &[String],
    titles: Option<&[String]>,
) -> Result<(), EngineError> {
    if labels.len() != n_states {
        return Err(EngineError::ListLengthMismatch {
            what: "state labels",
            expected: n_states,
            found: labels.len(),
        });
    }
    let selection = collection.resolve_titles(titles)?;
    for title in &selection {
        collection
            .get_mut(title)?
            .state_labels
            .insert(n_states, labels.to_vec());
    }
    Ok(())
}

/// Saves the whole collection, cached results included.
pub fn save(collection: &MsmCollection, path: &Path) -> Result<(), EngineError> {
    snapshot::save(collection, path)?;
    info!(path = %path.display(), "Saved collection snapshot");
    Ok(())
}

/// Reloads a saved collection without recomputation.
pub fn load(path: &Path) -> Result<MsmCollection, EngineError> {
    let collection = snapshot::load(path)?;
    info!(
        path = %path.display(),
        members = collection.len(),
        "Loaded collection snapshot"
    );
    Ok(collection)
}
