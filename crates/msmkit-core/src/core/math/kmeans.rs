use nalgebra::DMatrix;
use rand::Rng;
use rand::seq::index::sample;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Cannot cluster into zero microstates")]
    ZeroClusters,
    #[error("No frames supplied for clustering")]
    EmptyData,
    #[error("Fewer pooled frames ({frames}) than requested clusters ({clusters})")]
    TooFewFrames { frames: usize, clusters: usize },
    #[error("Dimension mismatch: expected {expected} features, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

fn pool_frames(data: &[DMatrix<f64>]) -> Result<DMatrix<f64>, ClusterError> {
    let n_dims = data.first().map(|m| m.ncols()).ok_or(ClusterError::EmptyData)?;
    for matrix in data {
        if matrix.ncols() != n_dims {
            return Err(ClusterError::DimensionMismatch {
                expected: n_dims,
                found: matrix.ncols(),
            });
        }
    }
    let total: usize = data.iter().map(|m| m.nrows()).sum();
    if total == 0 {
        return Err(ClusterError::EmptyData);
    }
    let mut pooled = DMatrix::zeros(total, n_dims);
    let mut row = 0;
    for matrix in data {
        pooled.rows_mut(row, matrix.nrows()).copy_from(matrix);
        row += matrix.nrows();
    }
    Ok(pooled)
}

fn nearest_center(frames: &DMatrix<f64>, frame: usize, centers: &DMatrix<f64>) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for c in 0..centers.nrows() {
        let mut dist = 0.0;
        for d in 0..centers.ncols() {
            let delta = centers[(c, d)] - frames[(frame, d)];
            dist += delta * delta;
        }
        if dist < best_dist {
            best_dist = dist;
            best = c;
        }
    }
    best
}

/// Lloyd k-means over the union of all supplied frames.
///
/// `seed_centers`, if given, are used as the initial centroids, which makes
/// re-clustering reproducible; otherwise `k` distinct pooled frames drawn from
/// `rng` seed the iteration. Empty clusters keep their previous centroid.
pub fn kmeans(
    data: &[DMatrix<f64>],
    k: usize,
    max_iter: usize,
    seed_centers: Option<&DMatrix<f64>>,
    rng: &mut impl Rng,
) -> Result<DMatrix<f64>, ClusterError> {
    if k == 0 {
        return Err(ClusterError::ZeroClusters);
    }
    let pooled = pool_frames(data)?;
    let n_frames = pooled.nrows();
    let n_dims = pooled.ncols();
    if n_frames < k {
        return Err(ClusterError::TooFewFrames {
            frames: n_frames,
            clusters: k,
        });
    }

    let mut centers = match seed_centers {
        Some(seeds) => {
            if seeds.ncols() != n_dims {
                return Err(ClusterError::DimensionMismatch {
                    expected: n_dims,
                    found: seeds.ncols(),
                });
            }
            seeds.clone_owned()
        }
        None => {
            let mut initial = DMatrix::zeros(k, n_dims);
            for (c, frame_idx) in sample(rng, n_frames, k).into_iter().enumerate() {
                initial.row_mut(c).copy_from(&pooled.row(frame_idx));
            }
            initial
        }
    };

    let mut labels = vec![usize::MAX; n_frames];
    for _ in 0..max_iter {
        let mut changed = false;
        for f in 0..n_frames {
            let label = nearest_center(&pooled, f, &centers);
            if labels[f] != label {
                labels[f] = label;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums: DMatrix<f64> = DMatrix::zeros(k, n_dims);
        let mut counts = vec![0usize; k];
        for f in 0..n_frames {
            let label = labels[f];
            counts[label] += 1;
            for d in 0..n_dims {
                sums[(label, d)] += pooled[(f, d)];
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                for d in 0..n_dims {
                    centers[(c, d)] = sums[(c, d)] / counts[c] as f64;
                }
            }
        }
    }

    Ok(centers)
}

/// Maps every frame of every replicate to its nearest centroid (Euclidean,
/// ties resolved to the lowest centroid index).
pub fn assign_to_centers(
    data: &[DMatrix<f64>],
    centers: &DMatrix<f64>,
) -> Result<Vec<Vec<usize>>, ClusterError> {
    let n_dims = centers.ncols();
    let mut assignments = Vec::with_capacity(data.len());
    for matrix in data {
        if matrix.ncols() != n_dims {
            return Err(ClusterError::DimensionMismatch {
                expected: n_dims,
                found: matrix.ncols(),
            });
        }
        let mut labels = Vec::with_capacity(matrix.nrows());
        for f in 0..matrix.nrows() {
            labels.push(nearest_center(matrix, f, centers));
        }
        assignments.push(labels);
    }
    Ok(assignments)
}
