use nalgebra::{DMatrix, DVector};
use thiserror::Error;

const HISTOGRAM_BINS: usize = 10;
const MAX_ITERATIONS: usize = 200;
const STEP_TOLERANCE: f64 = 1e-10;
const RESIDUAL_TOLERANCE: f64 = 1e-8;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FitError {
    #[error("Not enough samples to build a histogram")]
    TooFewSamples,
    #[error("Histogram is degenerate (all samples identical)")]
    DegenerateHistogram,
    #[error("Gaussian fit did not converge")]
    NoConvergence,
}

/// Parameters of a fitted Gaussian `A * exp(-(x - mu)^2 / (2 sigma^2))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub amplitude: f64,
    pub mean: f64,
    pub sigma: f64,
}

fn histogram(data: &[f64]) -> Result<(Vec<f64>, Vec<f64>), FitError> {
    if data.len() < 2 {
        return Err(FitError::TooFewSamples);
    }
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !(max - min).is_normal() {
        return Err(FitError::DegenerateHistogram);
    }
    let width = (max - min) / HISTOGRAM_BINS as f64;
    let mut counts = vec![0.0; HISTOGRAM_BINS];
    for &value in data {
        let mut bin = ((value - min) / width) as usize;
        if bin >= HISTOGRAM_BINS {
            bin = HISTOGRAM_BINS - 1; // the right edge is inclusive
        }
        counts[bin] += 1.0;
    }
    let centres = (0..HISTOGRAM_BINS)
        .map(|b| min + width * (b as f64 + 0.5))
        .collect();
    Ok((centres, counts))
}

fn gauss(x: f64, amplitude: f64, mean: f64, sigma: f64) -> f64 {
    amplitude * (-(x - mean) * (x - mean) / (2.0 * sigma * sigma)).exp()
}

/// Fits a Gaussian to a histogram of `data` by Levenberg-Marquardt, seeded
/// with amplitude 10, the sample mean, and sigma 10. A fit that fails to
/// converge is an error; callers treat it as a recoverable "not converged".
pub fn fit_gaussian(data: &[f64]) -> Result<GaussianFit, FitError> {
    let (centres, counts) = histogram(data)?;
    let sample_mean = data.iter().sum::<f64>() / data.len() as f64;

    let mut params = [10.0, sample_mean, 10.0];
    let mut damping = INITIAL_DAMPING;

    let residual_norm = |p: &[f64; 3]| -> f64 {
        centres
            .iter()
            .zip(counts.iter())
            .map(|(&x, &y)| {
                let r = y - gauss(x, p[0], p[1], p[2]);
                r * r
            })
            .sum()
    };

    let mut current_norm = residual_norm(&params);
    for _ in 0..MAX_ITERATIONS {
        let [amplitude, mean, sigma] = params;
        if sigma.abs() < f64::EPSILON {
            return Err(FitError::NoConvergence);
        }

        let mut jacobian = DMatrix::zeros(centres.len(), 3);
        let mut residuals = DVector::zeros(centres.len());
        for (row, (&x, &y)) in centres.iter().zip(counts.iter()).enumerate() {
            let shifted = x - mean;
            let value = gauss(x, amplitude, mean, sigma);
            residuals[row] = y - value;
            jacobian[(row, 0)] = value / amplitude.max(f64::EPSILON);
            jacobian[(row, 1)] = value * shifted / (sigma * sigma);
            jacobian[(row, 2)] = value * shifted * shifted / (sigma * sigma * sigma);
        }

        let jtj = jacobian.transpose() * &jacobian;
        let jtr = jacobian.transpose() * &residuals;
        let mut damped = jtj.clone();
        for d in 0..3 {
            damped[(d, d)] += damping * jtj[(d, d)].max(f64::EPSILON);
        }
        let step = match damped.lu().solve(&jtr) {
            Some(step) => step,
            None => return Err(FitError::NoConvergence),
        };

        let candidate = [
            params[0] + step[0],
            params[1] + step[1],
            params[2] + step[2],
        ];
        let candidate_norm = residual_norm(&candidate);
        if !candidate_norm.is_finite() {
            return Err(FitError::NoConvergence);
        }

        if candidate_norm < current_norm {
            // Accept when the step is negligible or the residual has stopped
            // improving in relative terms (curve_fit's ftol).
            let stagnated = current_norm - candidate_norm
                <= RESIDUAL_TOLERANCE * current_norm.max(f64::MIN_POSITIVE);
            params = candidate;
            current_norm = candidate_norm;
            damping = (damping * 0.5).max(1e-12);
            if step.norm() < STEP_TOLERANCE || stagnated {
                return Ok(GaussianFit {
                    amplitude: params[0],
                    mean: params[1],
                    sigma: params[2].abs(),
                });
            }
        } else {
            damping *= 4.0;
            if damping > MAX_DAMPING {
                return Err(FitError::NoConvergence);
            }
        }
    }

    Err(FitError::NoConvergence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gaussian_samples(mean: f64, sigma: f64, n: usize) -> Vec<f64> {
        // Deterministic quasi-Gaussian sample via the inverse-ish transform of
        // a triangular lattice; close enough for fitting a histogram.
        (0..n)
            .map(|i| {
                let u = (i as f64 + 0.5) / n as f64;
                let centered = (u - 0.5) * 2.0;
                mean + sigma * 1.6 * centered / (1.0 - centered * centered).sqrt().max(0.3)
            })
            .collect()
    }

    #[test]
    fn fit_recovers_the_mode_of_a_peaked_sample() {
        let data = gaussian_samples(50.0, 2.0, 500);
        let fit = fit_gaussian(&data).unwrap();
        assert_relative_eq!(fit.mean, 50.0, epsilon = 1.0);
        assert!(fit.sigma > 0.0);
    }

    #[test]
    fn fit_converges_on_tightly_clustered_values() {
        // Cumulative-window means of a stable bootstrap run: nearly flat,
        // so the residual stagnates long before the step norm vanishes.
        let data: Vec<f64> = (0..60)
            .map(|i| 50.0 + 0.05 * ((i % 7) as f64 - 3.0))
            .collect();
        let fit = fit_gaussian(&data).unwrap();
        assert_relative_eq!(fit.mean, 50.0, epsilon = 0.5);
    }

    #[test]
    fn fit_fails_on_constant_data() {
        let data = vec![5.0; 40];
        assert!(matches!(
            fit_gaussian(&data),
            Err(FitError::DegenerateHistogram)
        ));
    }

    #[test]
    fn fit_fails_on_a_single_sample() {
        assert!(matches!(fit_gaussian(&[1.0]), Err(FitError::TooFewSamples)));
    }

    #[test]
    fn histogram_covers_all_samples() {
        let data: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let (centres, counts) = histogram(&data).unwrap();
        assert_eq!(centres.len(), 10);
        assert_relative_eq!(counts.iter().sum::<f64>(), 100.0);
    }
}
