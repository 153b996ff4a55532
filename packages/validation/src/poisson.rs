//! Poisson regression with a log link, fit by iteratively reweighted
//! least squares.
//!
//! Features are standardized with the training mean and standard
//! deviation before fitting; the same transform is applied at prediction
//! time, so a fitted model carries everything it needs to score new rows.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Bound on the linear predictor to keep `exp` finite.
const ETA_LIMIT: f64 = 30.0;

/// Smallest eigenvalue ratio of the standardized Gram matrix accepted as
/// full rank.
const RANK_TOLERANCE: f64 = 1e-10;

/// Reasons a Poisson fit can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoissonError {
    /// Fewer observations than parameters.
    #[error("{rows} rows cannot identify {parameters} parameters")]
    TooFewRows {
        /// Training rows.
        rows: usize,
        /// Intercept plus features.
        parameters: usize,
    },

    /// A feature has no variance in the training rows.
    #[error("feature '{name}' is constant in the training set")]
    ConstantFeature {
        /// The constant feature.
        name: String,
    },

    /// The standardized design matrix is numerically rank-deficient.
    #[error("design matrix is rank-deficient (eigenvalue ratio {ratio:e})")]
    RankDeficient {
        /// Smallest over largest eigenvalue of the Gram matrix.
        ratio: f64,
    },

    /// The weighted normal equations were not positive definite.
    #[error("normal equations are not positive definite at iteration {iteration}")]
    NotPositiveDefinite {
        /// IRLS iteration that failed.
        iteration: usize,
    },

    /// Coefficients diverged.
    #[error("coefficients became non-finite at iteration {iteration}")]
    NonFinite {
        /// IRLS iteration that failed.
        iteration: usize,
    },

    /// Row lengths do not match the feature list or response.
    #[error("expected {expected} values per row, got {actual}")]
    Shape {
        /// Expected length.
        expected: usize,
        /// Length found.
        actual: usize,
    },
}

/// IRLS settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Relative deviance change that counts as converged.
    pub tolerance: f64,
    /// Ridge added to the non-intercept diagonal.
    pub ridge: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tolerance: 1e-8,
            ridge: 1e-6,
        }
    }
}

/// A fitted Poisson regression.
#[derive(Debug, Clone, PartialEq)]
pub struct PoissonModel {
    features: Vec<String>,
    means: Vec<f64>,
    scales: Vec<f64>,
    /// Intercept first, then one coefficient per standardized feature.
    coefficients: DVector<f64>,
    iterations: usize,
    converged: bool,
}

impl PoissonModel {
    /// Fits `log E[y] = b0 + Σ b_j x_j` to `rows` (one `Vec` per
    /// observation, ordered as `features`) and `response`.
    ///
    /// # Errors
    ///
    /// Returns a [`PoissonError`] if the training data cannot identify the
    /// model or the iteration diverges.
    pub fn fit(
        features: &[String],
        rows: &[Vec<f64>],
        response: &[f64],
        options: FitOptions,
    ) -> Result<Self, PoissonError> {
        let n = rows.len();
        let p = features.len();
        let q = p + 1;

        if response.len() != n {
            return Err(PoissonError::Shape {
                expected: n,
                actual: response.len(),
            });
        }
        if let Some(row) = rows.iter().find(|row| row.len() != p) {
            return Err(PoissonError::Shape {
                expected: p,
                actual: row.len(),
            });
        }
        if n < q {
            return Err(PoissonError::TooFewRows {
                rows: n,
                parameters: q,
            });
        }

        let (means, scales) = standardization(features, rows)?;
        let x = design(rows, &means, &scales);
        check_rank(&x)?;

        let y = DVector::from_column_slice(response);
        #[allow(clippy::cast_precision_loss)]
        let mean_y = y.sum() / n as f64;
        let mut beta = DVector::zeros(q);
        beta[0] = mean_y.max(1e-8).ln();

        let mut deviance = f64::INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < options.max_iterations {
            iterations += 1;

            let eta = (&x * &beta).map(|v| v.clamp(-ETA_LIMIT, ETA_LIMIT));
            let mu = eta.map(f64::exp);
            let z = DVector::from_iterator(
                n,
                eta.iter()
                    .zip(mu.iter())
                    .zip(y.iter())
                    .map(|((e, m), obs)| e + (obs - m) / m),
            );

            let mut weighted = x.clone();
            for (mut row, m) in weighted.row_iter_mut().zip(mu.iter()) {
                row *= *m;
            }

            let mut gram = x.transpose() * &weighted;
            for j in 1..q {
                gram[(j, j)] += options.ridge;
            }
            let rhs = weighted.transpose() * &z;

            let next = gram
                .cholesky()
                .ok_or(PoissonError::NotPositiveDefinite {
                    iteration: iterations,
                })?
                .solve(&rhs);
            if next.iter().any(|b| !b.is_finite()) {
                return Err(PoissonError::NonFinite {
                    iteration: iterations,
                });
            }
            beta = next;

            let fitted = (&x * &beta).map(|v| v.clamp(-ETA_LIMIT, ETA_LIMIT).exp());
            let next_deviance = poisson_deviance(&y, &fitted);
            if (deviance - next_deviance).abs() / (next_deviance.abs() + 0.1) < options.tolerance {
                converged = true;
                break;
            }
            deviance = next_deviance;
        }

        if !converged {
            log::warn!("Poisson fit did not converge after {iterations} iterations");
        }

        Ok(Self {
            features: features.to_vec(),
            means,
            scales,
            coefficients: beta,
            iterations,
            converged,
        })
    }

    /// Predicted mean count for one row of raw (unstandardized) features.
    ///
    /// # Errors
    ///
    /// Returns [`PoissonError::Shape`] if the row length is wrong.
    pub fn predict(&self, row: &[f64]) -> Result<f64, PoissonError> {
        if row.len() != self.features.len() {
            return Err(PoissonError::Shape {
                expected: self.features.len(),
                actual: row.len(),
            });
        }

        let eta = self.coefficients[0]
            + row
                .iter()
                .enumerate()
                .map(|(j, v)| self.coefficients[j + 1] * (v - self.means[j]) / self.scales[j])
                .sum::<f64>();

        Ok(eta.clamp(-ETA_LIMIT, ETA_LIMIT).exp())
    }

    #[must_use]
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Coefficients on the standardized scale, intercept first.
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        self.coefficients.as_slice()
    }

    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    #[must_use]
    pub const fn converged(&self) -> bool {
        self.converged
    }
}

fn standardization(
    features: &[String],
    rows: &[Vec<f64>],
) -> Result<(Vec<f64>, Vec<f64>), PoissonError> {
    #[allow(clippy::cast_precision_loss)]
    let n = rows.len() as f64;
    let mut means = Vec::with_capacity(features.len());
    let mut scales = Vec::with_capacity(features.len());

    for (j, name) in features.iter().enumerate() {
        let mean = rows.iter().map(|row| row[j]).sum::<f64>() / n;
        let sd = (rows.iter().map(|row| (row[j] - mean).powi(2)).sum::<f64>() / n).sqrt();
        if !sd.is_finite() || sd <= 1e-12 * mean.abs().max(1.0) {
            return Err(PoissonError::ConstantFeature { name: name.clone() });
        }
        means.push(mean);
        scales.push(sd);
    }

    Ok((means, scales))
}

fn design(rows: &[Vec<f64>], means: &[f64], scales: &[f64]) -> DMatrix<f64> {
    let q = means.len() + 1;
    DMatrix::from_fn(rows.len(), q, |i, j| {
        if j == 0 {
            1.0
        } else {
            (rows[i][j - 1] - means[j - 1]) / scales[j - 1]
        }
    })
}

fn check_rank(x: &DMatrix<f64>) -> Result<(), PoissonError> {
    let eigenvalues = (x.transpose() * x).symmetric_eigen().eigenvalues;
    let largest = eigenvalues.max();
    let ratio = if largest > 0.0 {
        eigenvalues.min() / largest
    } else {
        0.0
    };

    if ratio < RANK_TOLERANCE {
        return Err(PoissonError::RankDeficient { ratio });
    }
    Ok(())
}

fn poisson_deviance(y: &DVector<f64>, mu: &DVector<f64>) -> f64 {
    2.0 * y
        .iter()
        .zip(mu.iter())
        .map(|(obs, m)| {
            let log_term = if *obs > 0.0 { obs * (obs / m).ln() } else { 0.0 };
            log_term - (obs - m)
        })
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("x{i}")).collect()
    }

    #[test]
    fn recovers_log_linear_mean() {
        // y = exp(0.5 + 0.3 x) exactly, so the fit should reproduce it.
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![f64::from(i) / 2.0]).collect();
        let response: Vec<f64> = rows.iter().map(|r| (0.5 + 0.3 * r[0]).exp()).collect();

        let model = PoissonModel::fit(&names(1), &rows, &response, FitOptions::default()).unwrap();
        assert!(model.converged());
        for (row, expected) in rows.iter().zip(&response) {
            let predicted = model.predict(row).unwrap();
            assert!((predicted - expected).abs() / expected < 1e-4, "{predicted} vs {expected}");
        }
    }

    #[test]
    fn intercept_only_predicts_mean() {
        let rows: Vec<Vec<f64>> = vec![vec![]; 4];
        let response = [1.0, 2.0, 3.0, 6.0];
        let model = PoissonModel::fit(&[], &rows, &response, FitOptions::default()).unwrap();
        assert!((model.predict(&[]).unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn constant_feature_fails() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![f64::from(i), 2.0]).collect();
        let response: Vec<f64> = (0..10).map(f64::from).collect();
        let err =
            PoissonModel::fit(&names(2), &rows, &response, FitOptions::default()).unwrap_err();
        assert_eq!(
            err,
            PoissonError::ConstantFeature {
                name: "x1".to_string()
            }
        );
    }

    #[test]
    fn collinear_features_are_rank_deficient() {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|i| {
                let v = f64::from(i);
                vec![v, 2.0 * v + 1.0]
            })
            .collect();
        let response: Vec<f64> = (0..10).map(|i| f64::from(i % 3)).collect();
        let err =
            PoissonModel::fit(&names(2), &rows, &response, FitOptions::default()).unwrap_err();
        assert!(matches!(err, PoissonError::RankDeficient { .. }));
    }

    #[test]
    fn too_few_rows_fails() {
        let rows = vec![vec![1.0, 2.0], vec![2.0, 1.0]];
        let err =
            PoissonModel::fit(&names(2), &rows, &[1.0, 2.0], FitOptions::default()).unwrap_err();
        assert_eq!(
            err,
            PoissonError::TooFewRows {
                rows: 2,
                parameters: 3
            }
        );
    }

    #[test]
    fn all_zero_response_stays_finite() {
        let rows: Vec<Vec<f64>> = (0..6).map(|i| vec![f64::from(i)]).collect();
        let model = PoissonModel::fit(&names(1), &rows, &[0.0; 6], FitOptions::default()).unwrap();
        let predicted = model.predict(&[2.0]).unwrap();
        assert!(predicted.is_finite());
        assert!(predicted < 1e-3);
    }

    #[test]
    fn predict_checks_row_length() {
        let rows: Vec<Vec<f64>> = (0..6).map(|i| vec![f64::from(i)]).collect();
        let response: Vec<f64> = (0..6).map(f64::from).collect();
        let model = PoissonModel::fit(&names(1), &rows, &response, FitOptions::default()).unwrap();
        assert!(matches!(model.predict(&[1.0, 2.0]), Err(PoissonError::Shape { .. })));
    }
}
