use crate::core::io::features::{FeatureSource, load_feature_files};
use crate::core::math::kmeans::{assign_to_centers, kmeans};
use crate::core::models::msm::Msm;
use crate::engine::error::EngineError;
use nalgebra::DMatrix;
use rand::Rng;
use tracing::info;

/// Loads feature data into an MSM from either on-disk columnar files or
/// in-memory matrices. Replaces any previously loaded data.
pub fn load_data(
    msm: &mut Msm,
    source: FeatureSource,
    feature_names: Option<Vec<String>>,
    missing: crate::core::io::features::MissingDataPolicy,
) -> Result<(), EngineError> {
    let (data, n_features) = match source {
        FeatureSource::Files {
            locations,
            file_names,
            trajectories,
            frames,
        } => {
            let n_features = file_names.len();
            let data =
                load_feature_files(&locations, &file_names, &trajectories, frames, missing)
                    .map_err(|source| EngineError::Feature { source })?;
            (data, n_features)
        }
        FeatureSource::Matrices(matrices) => {
            let n_features = matrices.first().map(|m| m.ncols()).unwrap_or(0);
            (matrices, n_features)
        }
    };

    if let Some(names) = &feature_names
        && names.len() != n_features
    {
        return Err(EngineError::ListLengthMismatch {
            what: "feature names",
            expected: n_features,
            found: names.len(),
        });
    }

    info!(
        title = %msm.title,
        replicates = data.len(),
        "Loaded feature data"
    );
    msm.features = data;
    msm.feature_names = feature_names;
    Ok(())
}

/// K-means clustering of the MSM's own pooled feature data. Stores the
/// resulting centers on the MSM.
pub fn cluster(
    msm: &mut Msm,
    n_clusters: usize,
    max_iter: usize,
    seed_centers: Option<&DMatrix<f64>>,
    rng: &mut impl Rng,
) -> Result<(), EngineError> {
    if msm.features.is_empty() {
        return Err(EngineError::NoData {
            title: msm.title.clone(),
        });
    }
    let centers = kmeans(&msm.features, n_clusters, max_iter, seed_centers, rng)?;
    msm.cluster_centers = Some(centers);
    Ok(())
}

/// Assigns the MSM's feature data to cluster centers, producing discrete
/// trajectories. `centers`, if given, replaces the MSM's own center set
/// first (this is how shared collection centers are distributed).
pub fn assign_to_clusters(
    msm: &mut Msm,
    centers: Option<&DMatrix<f64>>,
) -> Result<(), EngineError> {
    if let Some(centers) = centers {
        msm.cluster_centers = Some(centers.clone_owned());
    }
    let centers = msm
        .cluster_centers
        .as_ref()
        .ok_or_else(|| EngineError::NotClustered {
            title: msm.title.clone(),
        })?;
    if msm.features.is_empty() {
        return Err(EngineError::NoData {
            title: msm.title.clone(),
        });
    }
    msm.discrete_trajectories = assign_to_centers(&msm.features, centers)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::features::MissingDataPolicy;
    use crate::core::units::{TimeQuantity, TimeUnit};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn msm_with_two_blobs() -> Msm {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        msm.features = vec![
            DMatrix::from_row_slice(3, 2, &[0.0, 0.0, 0.1, 0.1, 0.0, 0.1]),
            DMatrix::from_row_slice(3, 2, &[5.0, 5.0, 5.1, 5.1, 5.0, 5.1]),
        ];
        msm
    }

    #[test]
    fn load_data_accepts_in_memory_matrices() {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        load_data(
            &mut msm,
            FeatureSource::Matrices(vec![DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 2.0, 3.0])]),
            Some(vec!["distance".into(), "torsion".into()]),
            MissingDataPolicy::Error,
        )
        .unwrap();
        assert_eq!(msm.n_replicates(), 1);
        assert_eq!(msm.feature_names.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn load_data_rejects_mismatched_feature_names() {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        let result = load_data(
            &mut msm,
            FeatureSource::Matrices(vec![DMatrix::from_row_slice(1, 2, &[0.0, 1.0])]),
            Some(vec!["distance".into()]),
            MissingDataPolicy::Error,
        );
        assert!(matches!(
            result,
            Err(EngineError::ListLengthMismatch { .. })
        ));
    }

    #[test]
    fn cluster_then_assign_discretizes_every_frame() {
        let mut msm = msm_with_two_blobs();
        let mut rng = StdRng::seed_from_u64(3);
        cluster(&mut msm, 2, 50, None, &mut rng).unwrap();
        assign_to_clusters(&mut msm, None).unwrap();

        assert_eq!(msm.n_clusters(), Some(2));
        assert_eq!(msm.discrete_trajectories.len(), 2);
        assert!(msm.discrete_trajectories.iter().all(|d| d.len() == 3));
        assert_ne!(
            msm.discrete_trajectories[0][0],
            msm.discrete_trajectories[1][0]
        );
    }

    #[test]
    fn assign_with_external_centers_adopts_them() {
        let mut msm = msm_with_two_blobs();
        let shared = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 5.0, 5.0]);
        assign_to_clusters(&mut msm, Some(&shared)).unwrap();
        assert_eq!(msm.cluster_centers.as_ref().unwrap(), &shared);
        assert_eq!(msm.discrete_trajectories[0], vec![0, 0, 0]);
        assert_eq!(msm.discrete_trajectories[1], vec![1, 1, 1]);
    }

    #[test]
    fn assign_without_centers_is_an_error() {
        let mut msm = msm_with_two_blobs();
        assert!(matches!(
            assign_to_clusters(&mut msm, None),
            Err(EngineError::NotClustered { .. })
        ));
    }

    #[test]
    fn cluster_without_data_is_an_error() {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            cluster(&mut msm, 2, 10, None, &mut rng),
            Err(EngineError::NoData { .. })
        ));
    }
}
