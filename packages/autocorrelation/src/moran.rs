//! Local Moran's I under the randomization assumption.
//!
//! For a connected cell `i` with deviation `z_i = x_i - x̄`:
//!
//! * `I_i = z_i / m2 * Σ_j w_ij z_j` with `m2 = Σ z² / n`
//! * `E[I_i] = -W_i / (n - 1)`
//! * `Var[I_i] = W_i2 (n - b2) / (n - 1)
//!   + (W_i² - W_i2)(2 b2 - n) / ((n - 1)(n - 2)) - W_i² / (n - 1)²`
//!
//! where `W_i = Σ_j w_ij`, `W_i2 = Σ_j w_ij²` and `b2 = m4 / m2²`. The
//! mean and moments are taken over connected cells only; isolated cells
//! take no part in them and get [`LocalMoranOutcome::Isolated`].

use std::collections::BTreeMap;

use rayon::prelude::*;
use risk_map_models::CellId;
use serde::{Deserialize, Serialize};

use crate::AutocorrelationError;
use crate::weights::{SpatialWeights, WeightRow};

/// Local Moran's I for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMoran {
    /// `I_i`.
    pub statistic: f64,
    /// `E[I_i]` under randomization.
    pub expected: f64,
    /// `Var[I_i]` under randomization.
    pub variance: f64,
    /// `(I_i - E[I_i]) / sqrt(Var[I_i])`, zero when the variance is zero.
    pub z_score: f64,
    /// Two-tailed normal p-value of `z_score`.
    pub p_value: f64,
}

/// Per-cell result, tagged so isolated cells are explicit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum LocalMoranOutcome {
    /// The cell has neighbors and a defined statistic.
    Computed(LocalMoran),
    /// The cell has no neighbors.
    Isolated,
}

impl LocalMoranOutcome {
    /// The computed result, if any.
    #[must_use]
    pub const fn computed(&self) -> Option<&LocalMoran> {
        match self {
            Self::Computed(result) => Some(result),
            Self::Isolated => None,
        }
    }

    /// p-value, `NaN` for isolated cells.
    #[must_use]
    pub fn p_value(&self) -> f64 {
        self.computed().map_or(f64::NAN, |r| r.p_value)
    }

    /// Statistic, `NaN` for isolated cells.
    #[must_use]
    pub fn statistic(&self) -> f64 {
        self.computed().map_or(f64::NAN, |r| r.statistic)
    }

    /// `true` if the cell is computed and `p_value <= threshold`.
    #[must_use]
    pub fn is_significant(&self, threshold: f64) -> bool {
        self.computed().is_some_and(|r| r.p_value <= threshold)
    }
}

/// Global quantities shared by every cell's statistic.
struct Moments {
    n: f64,
    mean: f64,
    m2: f64,
    b2: f64,
}

/// Computes local Moran's I for every cell in `weights`.
///
/// # Errors
///
/// * [`AutocorrelationError::MissingValue`] if a cell in the weights has
///   no entry in `values`.
/// * [`AutocorrelationError::InsufficientCells`] if fewer than three cells
///   have neighbors.
pub fn local_moran(
    values: &BTreeMap<CellId, f64>,
    weights: &SpatialWeights,
) -> Result<BTreeMap<CellId, LocalMoranOutcome>, AutocorrelationError> {
    if let Some((cell, _)) = weights.rows().find(|(cell, _)| !values.contains_key(cell)) {
        return Err(AutocorrelationError::MissingValue { cell });
    }

    let connected: Vec<f64> = weights.connected().map(|cell| values[&cell]).collect();
    if connected.len() < 3 {
        return Err(AutocorrelationError::InsufficientCells {
            connected: connected.len(),
        });
    }

    let moments = moments(&connected);
    let rows: Vec<(CellId, &WeightRow)> = weights.rows().collect();

    let outcomes: Vec<(CellId, LocalMoranOutcome)> = rows
        .par_iter()
        .map(|&(cell, row)| {
            let outcome = match row {
                WeightRow::Isolated => LocalMoranOutcome::Isolated,
                WeightRow::Normal(neighbors) => LocalMoranOutcome::Computed(cell_statistic(
                    values[&cell],
                    neighbors.iter().map(|(j, w)| (values[j], *w)),
                    row,
                    &moments,
                )),
            };
            (cell, outcome)
        })
        .collect();

    let significant = outcomes
        .iter()
        .filter(|(_, o)| o.is_significant(0.05))
        .count();
    log::debug!(
        "Local Moran's I over {} cells ({} connected, {significant} at p <= 0.05)",
        outcomes.len(),
        connected.len()
    );

    Ok(outcomes.into_iter().collect())
}

fn moments(values: &[f64]) -> Moments {
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n;
    let b2 = if m2 > 0.0 { m4 / (m2 * m2) } else { 0.0 };

    Moments { n, mean, m2, b2 }
}

fn cell_statistic(
    value: f64,
    neighbors: impl Iterator<Item = (f64, f64)>,
    row: &WeightRow,
    moments: &Moments,
) -> LocalMoran {
    let Moments { n, mean, m2, b2 } = *moments;
    let w_i = row.sum();
    let w_i2 = row.sum_of_squares();
    let expected = -w_i / (n - 1.0);

    if m2.abs() < f64::EPSILON {
        return LocalMoran {
            statistic: 0.0,
            expected,
            variance: 0.0,
            z_score: 0.0,
            p_value: 1.0,
        };
    }

    let lag: f64 = neighbors.map(|(x_j, w)| w * (x_j - mean)).sum();
    let statistic = (value - mean) / m2 * lag;

    let variance = w_i2 * (n - b2) / (n - 1.0)
        + (w_i * w_i - w_i2) * (2.0 * b2 - n) / ((n - 1.0) * (n - 2.0))
        - w_i * w_i / ((n - 1.0) * (n - 1.0));

    let z_score = if variance > 0.0 {
        (statistic - expected) / variance.sqrt()
    } else {
        0.0
    };

    LocalMoran {
        statistic,
        expected,
        variance,
        z_score,
        p_value: two_tailed_p(z_score),
    }
}

/// Two-tailed p-value of a standard normal z-score.
fn two_tailed_p(z: f64) -> f64 {
    (2.0 * normal_cdf(-z.abs())).min(1.0)
}

/// Standard normal CDF (Abramowitz & Stegun 26.2.17, |error| < 7.5e-8).
fn normal_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }

    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let d = 0.398_942_280_401_432_7; // 1/sqrt(2*pi)
    let p = d
        * (-x * x / 2.0).exp()
        * (t * (0.319_381_530
            + t * (-0.356_563_782
                + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429)))));

    if x > 0.0 { 1.0 - p } else { p }
}

#[cfg(test)]
mod tests {
    use geo::{MultiPolygon, Rect, coord};
    use risk_map_models::{Cell, Contiguity};
    use risk_map_spatial::build_grid;

    use super::*;
    use crate::adjacency::build_adjacency;
    use crate::weights::row_standardize;

    fn row_of_three() -> (Vec<Cell>, SpatialWeights) {
        let boundary = MultiPolygon(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 3.0, y: 1.0 }).to_polygon(),
        ]);
        let cells = build_grid(&boundary, 1.0).unwrap();
        let weights = row_standardize(&build_adjacency(&cells, Contiguity::Queen));
        (cells, weights)
    }

    #[test]
    fn matches_hand_computed_reference() {
        let (_, weights) = row_of_three();
        let values: BTreeMap<CellId, f64> =
            [(CellId(0), 1.0), (CellId(1), 2.0), (CellId(2), 6.0)].into_iter().collect();

        let results = local_moran(&values, &weights).unwrap();
        let r0 = results[&CellId(0)].computed().copied().unwrap();
        let r1 = results[&CellId(1)].computed().copied().unwrap();
        let r2 = results[&CellId(2)].computed().copied().unwrap();

        // mean 3, m2 14/3, b2 1.5
        assert!((r0.statistic - 3.0 / 7.0).abs() < 1e-12);
        assert!((r1.statistic - -3.0 / 28.0).abs() < 1e-12);
        assert!((r2.statistic - -9.0 / 14.0).abs() < 1e-12);

        for r in [r0, r1, r2] {
            assert!((r.expected - -0.5).abs() < 1e-12);
        }
        assert!((r0.variance - 0.5).abs() < 1e-12);
        assert!((r1.variance - 0.125).abs() < 1e-12);
        assert!((r2.variance - 0.5).abs() < 1e-12);

        let expected_z0 = (3.0 / 7.0 + 0.5) / 0.5_f64.sqrt();
        assert!((r0.z_score - expected_z0).abs() < 1e-12);
        assert!((r0.p_value - 0.189_1).abs() < 1e-3);
    }

    #[test]
    fn matches_permutation_moments_on_queen_grid() {
        let boundary = MultiPolygon(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 3.0, y: 3.0 }).to_polygon(),
        ]);
        let cells = build_grid(&boundary, 1.0).unwrap();
        let weights = row_standardize(&build_adjacency(&cells, Contiguity::Queen));
        let values: BTreeMap<CellId, f64> = [3.0, 0.0, 1.0, 2.0, 8.0, 4.0, 1.0, 0.0, 5.0]
            .into_iter()
            .enumerate()
            .map(|(i, v)| (CellId(u32::try_from(i).unwrap()), v))
            .collect();

        // mean 8/3, m2 56/9, b2 2157/784, so 2 b2 - n != 0. Expected values
        // are the exact mean and variance of I_i over all 9! permutations.
        // (cell, I, Var, z, p)
        let reference = [
            (0, 1.0 / 28.0, 8917.0 / 43904.0, 0.356_612_977_847_829_4, 0.721_381_560_561_226),
            (1, -0.4, 3979.0 / 43904.0, -0.913_477_320_065_990_1, 0.360_991_556_463_095_1),
            (4, -4.0 / 7.0, 1373.0 / 50176.0, -2.698_762_900_750_023, 0.006_959_774_169_303_294),
        ];

        let results = local_moran(&values, &weights).unwrap();
        for (cell, statistic, variance, z_score, p_value) in reference {
            let r = results[&CellId(cell)].computed().copied().unwrap();
            assert!((r.statistic - statistic).abs() < 1e-12, "cell {cell}: {r:?}");
            assert!((r.expected - -0.125).abs() < 1e-12, "cell {cell}: {r:?}");
            assert!((r.variance - variance).abs() < 1e-12, "cell {cell}: {r:?}");
            assert!((r.z_score - z_score).abs() < 1e-12, "cell {cell}: {r:?}");
            // Bounded by the normal CDF approximation.
            assert!((r.p_value - p_value).abs() < 2e-7, "cell {cell}: {r:?}");
        }
    }

    #[test]
    fn constant_values_are_never_significant() {
        let (cells, weights) = row_of_three();
        let values: BTreeMap<CellId, f64> = cells.iter().map(|c| (c.id(), 4.0)).collect();
        let results = local_moran(&values, &weights).unwrap();
        for outcome in results.values() {
            let r = outcome.computed().unwrap();
            assert!(r.statistic.abs() < f64::EPSILON);
            assert!((r.p_value - 1.0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn isolated_cells_are_tagged_and_excluded() {
        let (mut cells, _) = row_of_three();
        let far = Rect::new(coord! { x: 10.0, y: 10.0 }, coord! { x: 11.0, y: 11.0 }).to_polygon();
        cells.push(Cell::new(CellId(3), far).unwrap());
        let weights = row_standardize(&build_adjacency(&cells, Contiguity::Queen));

        let values: BTreeMap<CellId, f64> = [
            (CellId(0), 1.0),
            (CellId(1), 2.0),
            (CellId(2), 6.0),
            (CellId(3), 1000.0),
        ]
        .into_iter()
        .collect();

        let results = local_moran(&values, &weights).unwrap();
        assert_eq!(results[&CellId(3)], LocalMoranOutcome::Isolated);
        assert!(results[&CellId(3)].p_value().is_nan());
        assert!(!results[&CellId(3)].is_significant(1.0));
        // The isolated outlier does not shift the mean used for the others.
        let r0 = results[&CellId(0)].computed().unwrap();
        assert!((r0.statistic - 3.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn missing_value_is_reported() {
        let (_, weights) = row_of_three();
        let values: BTreeMap<CellId, f64> =
            [(CellId(0), 1.0), (CellId(1), 2.0)].into_iter().collect();
        let err = local_moran(&values, &weights).unwrap_err();
        assert!(matches!(err, AutocorrelationError::MissingValue { cell } if cell == CellId(2)));
    }

    #[test]
    fn normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975_002).abs() < 1e-6);
        assert!((two_tailed_p(3.290_527) - 0.001).abs() < 1e-6);
    }
}
