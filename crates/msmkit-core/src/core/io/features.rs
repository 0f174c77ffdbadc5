use nalgebra::DMatrix;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Could not parse '{token}' as a number in '{path}' line {line}")]
    Parse {
        path: String,
        line: usize,
        token: String,
    },
    #[error("'{path}' has {found} frames but {expected} were requested")]
    TooShort {
        path: String,
        expected: usize,
        found: usize,
    },
    #[error("Data missing in {0}")]
    Missing(String),
    #[error("No feature files were configured")]
    NoFiles,
}

/// What to do when a replicate's feature files are absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDataPolicy {
    /// Fail fast on the first absent replicate.
    Error,
    /// Report the absent replicate and continue with partial data.
    Warn,
    /// Skip absent replicates silently.
    #[default]
    Ignore,
}

/// Origin of per-replicate feature matrices.
#[derive(Debug, Clone)]
pub enum FeatureSource {
    /// Columnar scalar time series on disk, one file per feature, laid out as
    /// `{location}/snapshot_{index}/{file_name}`.
    Files {
        locations: Vec<PathBuf>,
        file_names: Vec<String>,
        trajectories: Vec<usize>,
        frames: usize,
    },
    /// Feature matrices already in memory, one `(frames, n_dims)` matrix per
    /// replicate, in provenance order.
    Matrices(Vec<DMatrix<f64>>),
}

fn read_column(path: &Path, frames: usize) -> Result<Vec<f64>, FeatureError> {
    let content = std::fs::read_to_string(path).map_err(|e| FeatureError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    let mut values = Vec::with_capacity(frames);
    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        // Only the first column matters; trailing columns are tolerated the
        // way numpy's loadtxt slices are used upstream.
        let token = trimmed
            .split_whitespace()
            .next()
            .unwrap_or_default();
        let value: f64 = token.parse().map_err(|_| FeatureError::Parse {
            path: path.to_string_lossy().to_string(),
            line: line_no + 1,
            token: token.to_string(),
        })?;
        values.push(value);
        if values.len() == frames {
            break;
        }
    }
    if values.len() < frames {
        return Err(FeatureError::TooShort {
            path: path.to_string_lossy().to_string(),
            expected: frames,
            found: values.len(),
        });
    }
    Ok(values)
}

/// Loads per-replicate feature matrices from columnar files.
///
/// Each replicate directory must contain every feature file; a replicate with
/// any absent file is handled according to `missing`. Replicate order follows
/// `locations` × `trajectories` and is significant: it is the provenance
/// order used for bootstrap resampling.
pub fn load_feature_files(
    locations: &[PathBuf],
    file_names: &[String],
    trajectories: &[usize],
    frames: usize,
    missing: MissingDataPolicy,
) -> Result<Vec<DMatrix<f64>>, FeatureError> {
    if file_names.is_empty() {
        return Err(FeatureError::NoFiles);
    }

    let mut replicates = Vec::new();
    for location in locations {
        for &index in trajectories {
            let directory = location.join(format!("snapshot_{index}"));
            let files: Vec<PathBuf> = file_names.iter().map(|n| directory.join(n)).collect();

            if !files.iter().all(|f| f.exists()) {
                match missing {
                    MissingDataPolicy::Error => {
                        return Err(FeatureError::Missing(
                            directory.to_string_lossy().to_string(),
                        ));
                    }
                    MissingDataPolicy::Warn => {
                        warn!(directory = %directory.display(), "Data missing, skipping replicate");
                        continue;
                    }
                    MissingDataPolicy::Ignore => continue,
                }
            }

            let mut matrix = DMatrix::zeros(frames, file_names.len());
            for (column, file) in files.iter().enumerate() {
                let values = read_column(file, frames)?;
                for (row, value) in values.into_iter().enumerate() {
                    matrix[(row, column)] = value;
                }
            }
            replicates.push(matrix);
        }
    }
    Ok(replicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_snapshot(root: &Path, index: usize, name: &str, values: &[f64]) {
        let dir = root.join(format!("snapshot_{index}"));
        fs::create_dir_all(&dir).unwrap();
        let body: String = values.iter().map(|v| format!("{v}\n")).collect();
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn loads_and_concatenates_feature_columns() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), 1, "distance.txt", &[1.0, 2.0, 3.0]);
        write_snapshot(dir.path(), 1, "torsion.txt", &[0.1, 0.2, 0.3]);

        let data = load_feature_files(
            &[dir.path().to_path_buf()],
            &["distance.txt".into(), "torsion.txt".into()],
            &[1],
            3,
            MissingDataPolicy::Error,
        )
        .unwrap();

        assert_eq!(data.len(), 1);
        assert_eq!(data[0].shape(), (3, 2));
        assert_eq!(data[0][(1, 0)], 2.0);
        assert_eq!(data[0][(2, 1)], 0.3);
    }

    #[test]
    fn missing_replicate_fails_under_error_policy() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), 1, "distance.txt", &[1.0]);

        let result = load_feature_files(
            &[dir.path().to_path_buf()],
            &["distance.txt".into()],
            &[1, 2],
            1,
            MissingDataPolicy::Error,
        );
        assert!(matches!(result, Err(FeatureError::Missing(_))));
    }

    #[test]
    fn missing_replicate_yields_partial_data_under_warn_policy() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), 1, "distance.txt", &[1.0, 2.0]);
        write_snapshot(dir.path(), 3, "distance.txt", &[3.0, 4.0]);

        let data = load_feature_files(
            &[dir.path().to_path_buf()],
            &["distance.txt".into()],
            &[1, 2, 3],
            2,
            MissingDataPolicy::Warn,
        )
        .unwrap();
        // Replicate 2 is reported and dropped; the rest load in order.
        assert_eq!(data.len(), 2);
        assert_eq!(data[0][(0, 0)], 1.0);
        assert_eq!(data[1][(0, 0)], 3.0);
    }

    #[test]
    fn missing_replicate_is_skipped_under_ignore_policy() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), 1, "distance.txt", &[1.0, 2.0]);
        write_snapshot(dir.path(), 3, "distance.txt", &[3.0, 4.0]);

        let data = load_feature_files(
            &[dir.path().to_path_buf()],
            &["distance.txt".into()],
            &[1, 2, 3],
            2,
            MissingDataPolicy::Ignore,
        )
        .unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1][(0, 0)], 3.0);
    }

    #[test]
    fn short_file_is_an_error_regardless_of_policy() {
        let dir = tempdir().unwrap();
        write_snapshot(dir.path(), 1, "distance.txt", &[1.0, 2.0]);

        let result = load_feature_files(
            &[dir.path().to_path_buf()],
            &["distance.txt".into()],
            &[1],
            5,
            MissingDataPolicy::Ignore,
        );
        assert!(matches!(
            result,
            Err(FeatureError::TooShort {
                expected: 5,
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn unparsable_token_is_reported_with_location() {
        let dir = tempdir().unwrap();
        let snapshot = dir.path().join("snapshot_1");
        fs::create_dir_all(&snapshot).unwrap();
        fs::write(snapshot.join("distance.txt"), "1.0\nnot-a-number\n").unwrap();

        let result = load_feature_files(
            &[dir.path().to_path_buf()],
            &["distance.txt".into()],
            &[1],
            2,
            MissingDataPolicy::Error,
        );
        assert!(matches!(result, Err(FeatureError::Parse { line: 2, .. })));
    }
}
