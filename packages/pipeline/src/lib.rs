#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! End-to-end risk surface pipeline.
//!
//! Builds the grid, attaches target counts, risk-factor and
//! spatial-process features, cross-validates every configured regression
//! run, computes the kernel density baselines, and scores the chosen
//! regression run and the baselines against held-out events.

pub mod config;

use std::collections::BTreeMap;

use geo::{MultiPolygon, Point};
use risk_map_autocorrelation::{
    AutocorrelationError, SpatialProcessFeatures, attach_spatial_process,
};
use risk_map_compare::{CompareError, ComparisonRow, compare_models};
use risk_map_density::{DensityError, density_baselines};
use risk_map_models::{Cell, CellId, FeatureSubset, FoldGroupKey, PointEvent};
use risk_map_spatial::{
    GroupPolygon, SpatialError, aggregate_counts, assign_groups, attach_counts,
    attach_nearest_distance, build_grid,
};
use risk_map_validation::{
    CvOutput, CvRun, FitOptions, FoldPolicy, RunSummary, ValidationError, cross_validate, summarize,
};
use serde::Serialize;
use thiserror::Error;

pub use config::{ComparisonConfig, ConfigError, PipelineConfig};

/// Errors from any stage of the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Spatial stage failed: {0}")]
    Spatial(#[from] SpatialError),

    #[error("Autocorrelation stage failed: {0}")]
    Autocorrelation(#[from] AutocorrelationError),

    #[error("Cross-validation stage failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Density stage failed: {0}")]
    Density(#[from] DensityError),

    #[error("Comparison stage failed: {0}")]
    Compare(#[from] CompareError),
}

/// Materialized inputs, all in the same planar projection.
#[derive(Debug, Clone, Copy)]
pub struct PipelineInputs<'a> {
    /// Study-area boundary.
    pub boundary: &'a MultiPolygon<f64>,
    /// Events whose counts are modeled.
    pub events: &'a [PointEvent],
    /// Risk-factor points; each category is one layer.
    pub risk_layers: &'a [PointEvent],
    /// Polygons for spatial-group folds, e.g. neighborhoods.
    pub groups: &'a [GroupPolygon],
    /// Later-period events for the comparison table. May be empty.
    pub held_out: &'a [PointEvent],
}

/// One regression run of the matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub label: String,
    pub fold_group_key: FoldGroupKey,
    pub feature_subset: FeatureSubset,
    pub features: Vec<String>,
    pub summary: RunSummary,
    pub output: CvOutput,
}

/// Everything the pipeline produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub cells: usize,
    /// Name of the response, the target category or `"events"`.
    pub target: String,
    /// Hotspot cells at the final threshold, if spatial-process features
    /// were computed.
    pub hotspots: Option<Vec<CellId>>,
    pub runs: Vec<RunReport>,
    /// Held-out comparison rows, empty without held-out events.
    pub comparison: Vec<ComparisonRow>,
}

impl RiskReport {
    /// The run with the given key and subset.
    #[must_use]
    pub fn run(&self, key: FoldGroupKey, subset: FeatureSubset) -> Option<&RunReport> {
        self.runs
            .iter()
            .find(|r| r.fold_group_key == key && r.feature_subset == subset)
    }
}

/// Label of a regression run, e.g. `"Spatial Process: LOGO-CV"`.
#[must_use]
pub fn run_label(subset: FeatureSubset, key: FoldGroupKey) -> String {
    format!("{}: {}", subset.label(), key.label())
}

fn target_events<'a>(events: &'a [PointEvent], category: Option<&str>) -> Vec<&'a PointEvent> {
    events
        .iter()
        .filter(|e| category.is_none_or(|c| e.category == c))
        .collect()
}

/// Per-cell count of `events` (restricted to `category` when given).
fn cell_totals(
    events: &[PointEvent],
    category: Option<&str>,
    cells: &[Cell],
) -> Result<BTreeMap<CellId, u64>, SpatialError> {
    let selected: Vec<PointEvent> = target_events(events, category).into_iter().cloned().collect();
    let aggregation = aggregate_counts(&selected, cells)?;
    Ok(aggregation
        .counts
        .into_iter()
        .map(|(cell, by_category)| (cell, by_category.values().sum()))
        .collect())
}

fn risk_layers(events: &[PointEvent]) -> BTreeMap<String, Vec<Point<f64>>> {
    let mut layers: BTreeMap<String, Vec<Point<f64>>> = BTreeMap::new();
    for event in events {
        layers
            .entry(event.category.clone())
            .or_default()
            .push(event.location);
    }
    layers
}

/// Runs the whole pipeline.
///
/// # Errors
///
/// Returns the first terminal error of any stage. Failed folds are not
/// terminal; they are listed in each run's output.
pub fn run(
    config: &PipelineConfig,
    inputs: &PipelineInputs<'_>,
) -> Result<RiskReport, PipelineError> {
    config.validate()?;
    let category = config.target_category.as_deref();
    let target = category.unwrap_or("events").to_string();

    let mut cells = build_grid(inputs.boundary, config.cell_size)?;
    log::info!("Built {} cells of size {}", cells.len(), config.cell_size);

    let totals = cell_totals(inputs.events, category, &cells)?;
    cells = cells
        .into_iter()
        .map(|cell| {
            let count = totals.get(&cell.id()).copied().unwrap_or(0);
            cell.with_target(count)
        })
        .collect();

    let layers = risk_layers(inputs.risk_layers);
    let mut risk_features = Vec::new();
    for (layer, points) in &layers {
        let name = format!("{layer}.nn");
        cells = attach_nearest_distance(cells, points, config.k, &name)?;
        risk_features.push(name);
    }
    if config.include_counts {
        let aggregation = aggregate_counts(inputs.risk_layers, &cells)?;
        let names: Vec<String> = layers.keys().cloned().collect();
        cells = attach_counts(cells, &aggregation, &names)?;
        risk_features.extend(names);
    }
    log::info!(
        "Attached {} risk-factor features from {} layers",
        risk_features.len(),
        layers.len()
    );

    if !inputs.groups.is_empty() {
        cells = assign_groups(cells, inputs.groups)?;
    }

    let mut hotspots: Option<Vec<CellId>> = None;
    let mut spatial_features = Vec::new();
    if config.needs_spatial_process() {
        let names = SpatialProcessFeatures {
            target: target.clone(),
            contiguity: config.contiguity,
            significance_threshold: config.significance_threshold,
            exploratory_threshold: config.exploratory_threshold,
        };
        let output = attach_spatial_process(cells, &names)?;
        cells = output.cells;
        hotspots = Some(output.hotspots.cells.into_iter().collect());
        spatial_features = names.regression_features();
    }

    let mut runs = Vec::new();
    for &key in &config.fold_group_keys {
        let (policy, run_cells) = match key {
            FoldGroupKey::Random => (
                FoldPolicy::Random {
                    folds: config.random_folds,
                    seed: config.seed,
                },
                cells.clone(),
            ),
            FoldGroupKey::SpatialGroup => {
                let (grouped, ungrouped): (Vec<Cell>, Vec<Cell>) =
                    cells.iter().cloned().partition(|c| c.group().is_some());
                if !ungrouped.is_empty() {
                    log::warn!(
                        "Dropping {} cells without a spatial group from LOGO-CV",
                        ungrouped.len()
                    );
                }
                (FoldPolicy::SpatialGroup, grouped)
            }
        };

        for &subset in &config.feature_subsets {
            let mut features = risk_features.clone();
            if subset == FeatureSubset::RiskFactorsSpatialProcess {
                features.extend(spatial_features.iter().cloned());
            }

            let label = run_label(subset, key);
            let output = cross_validate(
                &run_cells,
                &CvRun {
                    label: label.clone(),
                    policy,
                    features: features.clone(),
                    options: FitOptions::default(),
                },
            )?;
            let summary = summarize(&output);
            if let Some(mae) = summary.overall_mae {
                log::info!("'{label}': overall MAE {mae:.4}");
            }

            runs.push(RunReport {
                label,
                fold_group_key: key,
                feature_subset: subset,
                features,
                summary,
                output,
            });
        }
    }

    let comparison = if inputs.held_out.is_empty() {
        log::info!("No held-out events; skipping comparison");
        Vec::new()
    } else {
        compare(config, inputs, category, &cells, &runs)?
    };

    Ok(RiskReport {
        cells: cells.len(),
        target,
        hotspots,
        runs,
        comparison,
    })
}

fn compare(
    config: &PipelineConfig,
    inputs: &PipelineInputs<'_>,
    category: Option<&str>,
    cells: &[Cell],
    runs: &[RunReport],
) -> Result<Vec<ComparisonRow>, PipelineError> {
    let held_out = cell_totals(inputs.held_out, category, cells)?;

    let mut models = Vec::new();
    match runs.iter().find(|r| {
        r.fold_group_key == config.comparison.fold_group_key
            && r.feature_subset == config.comparison.feature_subset
    }) {
        Some(chosen) if chosen.output.predictions.is_empty() => {
            log::warn!(
                "'{}' has no predictions ({} of {} folds failed); leaving it out of the comparison",
                chosen.label,
                chosen.summary.failed_folds,
                chosen.output.folds
            );
        }
        Some(chosen) => {
            let scores: BTreeMap<CellId, f64> = chosen
                .output
                .predictions
                .iter()
                .map(|p| (p.cell, p.predicted))
                .collect();
            models.push((chosen.label.clone(), scores));
        }
        None => {}
    }

    let points: Vec<Point<f64>> = target_events(inputs.events, category)
        .into_iter()
        .map(|e| e.location)
        .collect();
    for baseline in density_baselines(cells, &points, &config.bandwidths, config.kde_samples)? {
        models.push((baseline.label, baseline.values));
    }

    Ok(compare_models(&models, &held_out)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_combine_subset_and_key() {
        assert_eq!(
            run_label(FeatureSubset::RiskFactorsSpatialProcess, FoldGroupKey::SpatialGroup),
            "Spatial Process: LOGO-CV"
        );
        assert_eq!(
            run_label(FeatureSubset::RiskFactors, FoldGroupKey::Random),
            "Risk Factors: k-fold"
        );
    }

    #[test]
    fn target_filter_matches_category() {
        let events = vec![
            PointEvent::new(0.0, 0.0, "burglaries"),
            PointEvent::new(1.0, 1.0, "graffiti"),
        ];
        assert_eq!(target_events(&events, Some("burglaries")).len(), 1);
        assert_eq!(target_events(&events, None).len(), 2);
    }

    #[test]
    fn layers_group_by_category() {
        let events = vec![
            PointEvent::new(0.0, 0.0, "liquor"),
            PointEvent::new(1.0, 1.0, "street_lights"),
            PointEvent::new(2.0, 2.0, "liquor"),
        ];
        let layers = risk_layers(&events);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers["liquor"].len(), 2);
    }
}
