use crate::core::models::collection::MsmCollection;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Serialization error for '{path}': {source}")]
    Serde {
        path: String,
        source: serde_json::Error,
    },
}

/// Writes the entire collection, cached analysis artifacts included, so a
/// later [`load`] needs no recomputation.
pub fn save(collection: &MsmCollection, path: &Path) -> Result<(), SnapshotError> {
    let file = File::create(path).map_err(|e| SnapshotError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    serde_json::to_writer(BufWriter::new(file), collection).map_err(|e| SnapshotError::Serde {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

/// Reloads a collection snapshot. Equivalent to re-adding every member MSM
/// plus the shared cluster centers.
pub fn load(path: &Path) -> Result<MsmCollection, SnapshotError> {
    let file = File::open(path).map_err(|e| SnapshotError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| SnapshotError::Serde {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::msm::{AssignmentKey, Msm, StateStatistic};
    use crate::core::units::{TimeQuantity, TimeUnit};
    use nalgebra::{DMatrix, DVector};
    use tempfile::tempdir;

    fn populated_collection() -> MsmCollection {
        let mut msm = Msm::new("apo", TimeQuantity::new(10.0, TimeUnit::Picoseconds));
        msm.features = vec![DMatrix::from_row_slice(2, 2, &[0.0, 0.1, 1.0, 1.1])];
        msm.cluster_centers = Some(DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]));
        msm.discrete_trajectories = vec![vec![0, 1]];
        msm.stationary_distribution = Some(DVector::from_vec(vec![0.4, 0.6]));
        msm.pcca.insert(2, vec![vec![0], vec![1]]);
        msm.metastable_assignments.insert(
            AssignmentKey::new("apo", 2),
            vec![
                StateStatistic {
                    probability: 40.0,
                    spread: 0.0,
                    members: 1,
                },
                StateStatistic {
                    probability: 60.0,
                    spread: 0.0,
                    members: 1,
                },
            ],
        );

        let mut collection = MsmCollection::new();
        collection.add_msm(msm);
        collection.cluster_centers = Some(DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]));
        collection
    }

    #[test]
    fn snapshot_round_trip_preserves_cached_artifacts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("collection.json");
        let original = populated_collection();

        save(&original, &path).unwrap();
        let reloaded = load(&path).unwrap();

        assert_eq!(reloaded.titles(), original.titles());
        assert_eq!(reloaded.cluster_centers, original.cluster_centers);

        let msm = reloaded.get("apo").unwrap();
        assert_eq!(msm.discrete_trajectories, vec![vec![0, 1]]);
        assert_eq!(msm.pcca[&2], vec![vec![0], vec![1]]);
        let stats = &msm.metastable_assignments[&AssignmentKey::new("apo", 2)];
        assert_eq!(stats[1].probability, 60.0);
    }

    #[test]
    fn load_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let result = load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(SnapshotError::Io { .. })));
    }

    #[test]
    fn load_fails_for_malformed_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path), Err(SnapshotError::Serde { .. })));
    }
}
