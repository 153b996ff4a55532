//! Cross-validation engine.

use std::collections::BTreeSet;

use rayon::prelude::*;
use risk_map_models::{Cell, CellId, Prediction};
use serde::Serialize;

use crate::ValidationError;
use crate::folds::{Fold, FoldPolicy, partition};
use crate::poisson::{FitOptions, PoissonError, PoissonModel};

/// One cross-validation run: a fold policy and a feature subset.
#[derive(Debug, Clone, PartialEq)]
pub struct CvRun {
    /// Model label stamped on every prediction, e.g.
    /// `"Spatial Process: LOGO-CV"`.
    pub label: String,
    /// How cells are split into folds.
    pub policy: FoldPolicy,
    /// Regression features, in design-matrix order.
    pub features: Vec<String>,
    /// IRLS settings.
    pub options: FitOptions,
}

/// A fold that was skipped because its model could not be fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoldFailure {
    /// Held-out fold.
    pub fold: String,
    /// Rendered fit error.
    pub reason: String,
}

/// Result of a cross-validation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CvOutput {
    /// Run label.
    pub model: String,
    /// Out-of-fold predictions sorted by cell id.
    pub predictions: Vec<Prediction>,
    /// Folds whose fit failed; their cells have no prediction.
    pub failures: Vec<FoldFailure>,
    /// Total number of folds, failed or not.
    pub folds: usize,
}

impl CvOutput {
    #[must_use]
    pub fn failed_folds(&self) -> usize {
        self.failures.len()
    }
}

/// Splits `cells` into the training and test views of `fold`.
///
/// The test view holds exactly the fold's cells; the training view holds
/// every other cell.
#[must_use]
pub fn train_test_split<'a>(cells: &'a [Cell], fold: &Fold) -> (Vec<&'a Cell>, Vec<&'a Cell>) {
    let held_out: BTreeSet<CellId> = fold.cells.iter().copied().collect();
    cells.iter().partition(|cell| !held_out.contains(&cell.id()))
}

/// Runs `run` over `cells` and collects out-of-fold predictions.
///
/// Each fold trains only on cells outside it. Folds whose fit fails are
/// logged and listed in [`CvOutput::failures`]; the run itself still
/// succeeds.
///
/// # Errors
///
/// * [`ValidationError::MissingTarget`] or [`ValidationError::MissingFeature`]
///   if a cell lacks its response or a regression feature.
/// * Partitioning errors from [`partition`].
pub fn cross_validate(cells: &[Cell], run: &CvRun) -> Result<CvOutput, ValidationError> {
    for cell in cells {
        if cell.target().is_none() {
            return Err(ValidationError::MissingTarget { cell: cell.id() });
        }
        if let Some(name) = run.features.iter().find(|name| cell.feature(name).is_none()) {
            return Err(ValidationError::MissingFeature {
                cell: cell.id(),
                name: name.clone(),
            });
        }
    }

    let folds = partition(cells, run.policy)?;
    log::info!(
        "Cross-validating '{}' over {} cells in {} folds with {} features",
        run.label,
        cells.len(),
        folds.len(),
        run.features.len()
    );

    let results: Vec<(String, Result<Vec<Prediction>, ValidationError>)> = folds
        .par_iter()
        .map(|fold| (fold.name.clone(), predict_fold(cells, fold, run)))
        .collect();

    let mut predictions = Vec::with_capacity(cells.len());
    let mut failures = Vec::new();
    for (fold, result) in results {
        match result {
            Ok(fold_predictions) => predictions.extend(fold_predictions),
            Err(e) => {
                log::warn!("'{}': {e}", run.label);
                failures.push(FoldFailure {
                    fold,
                    reason: e.to_string(),
                });
            }
        }
    }
    predictions.sort_by_key(|p| p.cell);

    if !failures.is_empty() {
        log::warn!(
            "'{}': {} of {} folds failed; their cells have no prediction",
            run.label,
            failures.len(),
            folds.len()
        );
    }

    Ok(CvOutput {
        model: run.label.clone(),
        predictions,
        failures,
        folds: folds.len(),
    })
}

fn feature_row(cell: &Cell, features: &[String]) -> Vec<f64> {
    features
        .iter()
        .map(|name| cell.feature(name).unwrap_or(f64::NAN))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn observed(cell: &Cell) -> f64 {
    cell.target().unwrap_or(0) as f64
}

fn predict_fold(
    cells: &[Cell],
    fold: &Fold,
    run: &CvRun,
) -> Result<Vec<Prediction>, ValidationError> {
    let (train, test) = train_test_split(cells, fold);

    let rows: Vec<Vec<f64>> = train.iter().map(|c| feature_row(c, &run.features)).collect();
    let response: Vec<f64> = train.iter().map(|c| observed(c)).collect();

    let failure = |source: PoissonError| ValidationError::ModelFitFailure {
        fold: fold.name.clone(),
        source,
    };

    let model = PoissonModel::fit(&run.features, &rows, &response, run.options).map_err(failure)?;
    log::debug!(
        "'{}' fold '{}': trained on {} cells in {} iterations, scoring {}",
        run.label,
        fold.name,
        train.len(),
        model.iterations(),
        test.len()
    );

    test.iter()
        .map(|cell| {
            let predicted = model
                .predict(&feature_row(cell, &run.features))
                .map_err(failure)?;
            Ok(Prediction {
                cell: cell.id(),
                predicted,
                observed: observed(cell),
                fold: fold.name.clone(),
                model: run.label.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use geo::{Rect, coord};

    use super::*;

    fn cells() -> Vec<Cell> {
        (0..30u32)
            .map(|i| {
                let x = f64::from(i);
                let rect = Rect::new(coord! { x: x, y: 0.0 }, coord! { x: x + 1.0, y: 1.0 });
                let signal = f64::from(i % 10);
                let target = (0.2 * signal).exp().round() as u64;
                Cell::new(CellId(i), rect.to_polygon())
                    .unwrap()
                    .with_feature("signal", signal)
                    .unwrap()
                    .with_feature("noise", f64::from((i * 7) % 5))
                    .unwrap()
                    .with_target(target)
                    .with_group(format!("g{}", i / 10))
            })
            .collect()
    }

    fn run(policy: FoldPolicy, features: &[&str]) -> CvRun {
        CvRun {
            label: "test".to_string(),
            policy,
            features: features.iter().map(ToString::to_string).collect(),
            options: FitOptions::default(),
        }
    }

    #[test]
    fn every_cell_gets_one_prediction() {
        let cells = cells();
        let output =
            cross_validate(&cells, &run(FoldPolicy::SpatialGroup, &["signal", "noise"])).unwrap();

        assert_eq!(output.folds, 3);
        assert_eq!(output.failed_folds(), 0);
        let ids: Vec<u32> = output.predictions.iter().map(|p| p.cell.0).collect();
        assert_eq!(ids, (0..30).collect::<Vec<_>>());
        assert!(output.predictions.iter().all(|p| p.predicted.is_finite() && p.predicted > 0.0));
        assert_eq!(output.predictions[12].fold, "g1");
    }

    #[test]
    fn degenerate_fold_is_recorded_and_skipped() {
        // "flag" is 1 only in group g0, so holding out g0 leaves it
        // constant in training.
        let cells: Vec<Cell> = cells()
            .into_iter()
            .map(|c| {
                let flag = if c.id().0 < 10 { 1.0 } else { 0.0 };
                c.with_feature("flag", flag).unwrap()
            })
            .collect();

        let output =
            cross_validate(&cells, &run(FoldPolicy::SpatialGroup, &["signal", "flag"])).unwrap();
        assert_eq!(output.failed_folds(), 1);
        assert_eq!(output.failures[0].fold, "g0");
        assert_eq!(output.predictions.len(), 20);
        assert!(output.predictions.iter().all(|p| p.fold != "g0"));
    }

    #[test]
    fn missing_feature_is_terminal() {
        let err =
            cross_validate(&cells(), &run(FoldPolicy::SpatialGroup, &["absent"])).unwrap_err();
        assert!(
            matches!(err, ValidationError::MissingFeature { ref name, .. } if name == "absent")
        );
    }

    #[test]
    fn random_policy_is_reproducible() {
        let cells = cells();
        let policy = FoldPolicy::Random { folds: 5, seed: 9 };
        let a = cross_validate(&cells, &run(policy, &["signal"])).unwrap();
        let b = cross_validate(&cells, &run(policy, &["signal"])).unwrap();
        assert_eq!(a, b);
    }
}
