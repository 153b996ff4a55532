//! Error metrics over out-of-fold predictions.

use std::collections::BTreeMap;

use risk_map_models::Prediction;
use serde::Serialize;

use crate::cv::CvOutput;

/// Errors of one fold's predictions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoldMetrics {
    pub fold: String,
    pub cells: usize,
    /// Mean of `predicted - observed`.
    pub mean_error: f64,
    /// Mean of `|predicted - observed|`.
    pub mean_absolute_error: f64,
}

/// Summary of a cross-validation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub model: String,
    pub folds: usize,
    pub failed_folds: usize,
    pub predicted_cells: usize,
    /// Mean of the per-fold MAEs.
    pub mean_fold_mae: Option<f64>,
    /// Sample standard deviation of the per-fold MAEs.
    pub sd_fold_mae: Option<f64>,
    /// MAE over every prediction.
    pub overall_mae: Option<f64>,
    /// Mean error over every prediction.
    pub overall_mean_error: Option<f64>,
    pub per_fold: Vec<FoldMetrics>,
}

/// Per-fold mean error and MAE, in fold name order.
#[must_use]
pub fn fold_metrics(predictions: &[Prediction]) -> Vec<FoldMetrics> {
    let mut by_fold: BTreeMap<&str, Vec<&Prediction>> = BTreeMap::new();
    for p in predictions {
        by_fold.entry(p.fold.as_str()).or_default().push(p);
    }

    by_fold
        .into_iter()
        .map(|(fold, predictions)| {
            #[allow(clippy::cast_precision_loss)]
            let n = predictions.len() as f64;
            FoldMetrics {
                fold: fold.to_string(),
                cells: predictions.len(),
                mean_error: predictions.iter().map(|p| p.error()).sum::<f64>() / n,
                mean_absolute_error: predictions.iter().map(|p| p.error().abs()).sum::<f64>() / n,
            }
        })
        .collect()
}

/// Reduces a run's predictions to per-fold and overall metrics. Values
/// that need predictions (or, for the deviation, two folds) are `None`
/// when there are too few.
#[must_use]
pub fn summarize(output: &CvOutput) -> RunSummary {
    let per_fold = fold_metrics(&output.predictions);
    let maes: Vec<f64> = per_fold.iter().map(|f| f.mean_absolute_error).collect();

    let mean_fold_mae = mean(&maes);
    let sd_fold_mae = mean_fold_mae.filter(|_| maes.len() > 1).map(|m| {
        #[allow(clippy::cast_precision_loss)]
        let dof = (maes.len() - 1) as f64;
        (maes.iter().map(|v| (v - m).powi(2)).sum::<f64>() / dof).sqrt()
    });

    let errors: Vec<f64> = output.predictions.iter().map(Prediction::error).collect();
    let absolute: Vec<f64> = errors.iter().map(|e| e.abs()).collect();

    RunSummary {
        model: output.model.clone(),
        folds: output.folds,
        failed_folds: output.failed_folds(),
        predicted_cells: output.predictions.len(),
        mean_fold_mae,
        sd_fold_mae,
        overall_mae: mean(&absolute),
        overall_mean_error: mean(&errors),
        per_fold,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    Some(values.iter().sum::<f64>() / n)
}

#[cfg(test)]
mod tests {
    use risk_map_models::CellId;

    use super::*;

    fn prediction(cell: u32, predicted: f64, observed: f64, fold: &str) -> Prediction {
        Prediction {
            cell: CellId(cell),
            predicted,
            observed,
            fold: fold.to_string(),
            model: "m".to_string(),
        }
    }

    #[test]
    fn fold_errors_are_signed_and_absolute() {
        let predictions = vec![
            prediction(0, 2.0, 1.0, "a"),
            prediction(1, 0.0, 2.0, "a"),
            prediction(2, 5.0, 5.0, "b"),
        ];
        let metrics = fold_metrics(&predictions);
        assert_eq!(metrics.len(), 2);
        assert!((metrics[0].mean_error - -0.5).abs() < 1e-12);
        assert!((metrics[0].mean_absolute_error - 1.5).abs() < 1e-12);
        assert!(metrics[1].mean_absolute_error.abs() < 1e-12);
    }

    #[test]
    fn summary_reduces_folds() {
        let output = CvOutput {
            model: "Risk Factors: LOGO-CV".to_string(),
            predictions: vec![
                prediction(0, 2.0, 1.0, "a"),
                prediction(1, 0.0, 2.0, "a"),
                prediction(2, 5.0, 5.0, "b"),
            ],
            failures: vec![],
            folds: 2,
        };
        let summary = summarize(&output);
        assert_eq!(summary.predicted_cells, 3);
        assert!((summary.mean_fold_mae.unwrap() - 0.75).abs() < 1e-12);
        assert!((summary.sd_fold_mae.unwrap() - 1.5 / 2.0_f64.sqrt()).abs() < 1e-12);
        assert!((summary.overall_mae.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_run_has_no_metrics() {
        let output = CvOutput {
            model: "m".to_string(),
            predictions: vec![],
            failures: vec![],
            folds: 0,
        };
        let summary = summarize(&output);
        assert_eq!(summary.mean_fold_mae, None);
        assert_eq!(summary.sd_fold_mae, None);
        assert_eq!(summary.overall_mae, None);
    }
}
