//! Hotspot flags and the spatial-process features derived from them.

use std::collections::{BTreeMap, BTreeSet};

use geo::Point;
use rayon::prelude::*;
use risk_map_models::{Cell, CellId, Contiguity};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::AutocorrelationError;
use crate::adjacency::build_adjacency;
use crate::moran::{LocalMoranOutcome, local_moran};
use crate::weights::row_standardize;

/// Cells whose local statistic is significant at `threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspots {
    /// Threshold the cells were flagged at.
    pub threshold: f64,
    /// Flagged cells.
    pub cells: BTreeSet<CellId>,
}

impl Hotspots {
    #[must_use]
    pub fn contains(&self, cell: CellId) -> bool {
        self.cells.contains(&cell)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn check_threshold(threshold: f64) -> Result<(), AutocorrelationError> {
    if threshold > 0.0 && threshold <= 1.0 {
        Ok(())
    } else {
        Err(AutocorrelationError::InvalidThreshold { threshold })
    }
}

/// Flags every computed cell with `p_value <= threshold`. Isolated cells
/// are never flagged.
///
/// # Errors
///
/// Returns [`AutocorrelationError::InvalidThreshold`] if `threshold` is
/// outside (0, 1].
pub fn flag_hotspots(
    results: &BTreeMap<CellId, LocalMoranOutcome>,
    threshold: f64,
) -> Result<Hotspots, AutocorrelationError> {
    check_threshold(threshold)?;

    let cells = results
        .iter()
        .filter(|(_, outcome)| outcome.is_significant(threshold))
        .map(|(cell, _)| *cell)
        .collect();

    Ok(Hotspots { threshold, cells })
}

/// Distance from each cell centroid to the nearest hotspot centroid.
/// Hotspot cells get zero.
///
/// # Errors
///
/// Returns [`AutocorrelationError::NoSignificantClusters`] if there are no
/// hotspots.
pub fn distance_to_hotspots(
    cells: &[Cell],
    hotspots: &Hotspots,
) -> Result<BTreeMap<CellId, f64>, AutocorrelationError> {
    let targets: Vec<GeomWithData<[f64; 2], CellId>> = cells
        .iter()
        .filter(|cell| hotspots.contains(cell.id()))
        .map(|cell| GeomWithData::new(coords(cell.centroid()), cell.id()))
        .collect();

    if targets.is_empty() {
        return Err(AutocorrelationError::NoSignificantClusters {
            threshold: hotspots.threshold,
        });
    }

    let tree = RTree::bulk_load(targets);

    let distances: Vec<(CellId, f64)> = cells
        .par_iter()
        .map(|cell| {
            let origin = coords(cell.centroid());
            let distance = tree
                .nearest_neighbor_iter_with_distance_2(&origin)
                .next()
                .map_or(f64::INFINITY, |(_, d2)| d2.sqrt());
            (cell.id(), distance)
        })
        .collect();

    Ok(distances.into_iter().collect())
}

const fn coords(point: Point<f64>) -> [f64; 2] {
    [point.0.x, point.0.y]
}

/// Names and thresholds for the spatial-process features of one target.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialProcessFeatures {
    /// Base name of the features, normally the target category.
    pub target: String,
    /// Adjacency rule for the weights.
    pub contiguity: Contiguity,
    /// Threshold for `is_sig` and the hotspot distance.
    pub significance_threshold: f64,
    /// Threshold for `is_sig_exploratory`.
    pub exploratory_threshold: f64,
}

impl SpatialProcessFeatures {
    #[must_use]
    pub fn local_i(&self) -> String {
        format!("{}.local_i", self.target)
    }

    #[must_use]
    pub fn p_value(&self) -> String {
        format!("{}.p_value", self.target)
    }

    #[must_use]
    pub fn is_sig(&self) -> String {
        format!("{}.is_sig", self.target)
    }

    #[must_use]
    pub fn is_sig_exploratory(&self) -> String {
        format!("{}.is_sig_exploratory", self.target)
    }

    #[must_use]
    pub fn distance(&self) -> String {
        format!("{}.is_sig.dist", self.target)
    }

    /// Features the spatial-process regression subset adds on top of the
    /// risk factors.
    #[must_use]
    pub fn regression_features(&self) -> Vec<String> {
        vec![self.is_sig(), self.distance()]
    }
}

/// Everything computed while attaching spatial-process features.
#[derive(Debug, Clone)]
pub struct SpatialProcessOutput {
    /// Cells with the five features attached.
    pub cells: Vec<Cell>,
    /// Local Moran's I per cell.
    pub outcomes: BTreeMap<CellId, LocalMoranOutcome>,
    /// Hotspots at the final threshold.
    pub hotspots: Hotspots,
    /// Hotspots at the exploratory threshold.
    pub exploratory: Hotspots,
}

/// Computes local Moran's I of the cells' target counts and attaches the
/// statistic, its p-value, both significance flags, and the distance to
/// the nearest final-threshold hotspot.
///
/// Isolated cells get statistic 0 and p-value 1 as feature values.
///
/// # Errors
///
/// * [`AutocorrelationError::MissingValue`] if a cell has no target.
/// * [`AutocorrelationError::InvalidThreshold`] for thresholds outside (0, 1].
/// * [`AutocorrelationError::NoSignificantClusters`] if nothing passes the
///   final threshold.
/// * Errors of [`local_moran`] and feature attachment.
pub fn attach_spatial_process(
    cells: Vec<Cell>,
    features: &SpatialProcessFeatures,
) -> Result<SpatialProcessOutput, AutocorrelationError> {
    check_threshold(features.significance_threshold)?;
    check_threshold(features.exploratory_threshold)?;

    let values = cells
        .iter()
        .map(|cell| {
            #[allow(clippy::cast_precision_loss)]
            let value = cell
                .target()
                .map(|t| t as f64)
                .ok_or(AutocorrelationError::MissingValue { cell: cell.id() })?;
            Ok((cell.id(), value))
        })
        .collect::<Result<BTreeMap<_, _>, AutocorrelationError>>()?;

    let weights = row_standardize(&build_adjacency(&cells, features.contiguity));
    let outcomes = local_moran(&values, &weights)?;

    let hotspots = flag_hotspots(&outcomes, features.significance_threshold)?;
    let exploratory = flag_hotspots(&outcomes, features.exploratory_threshold)?;
    log::info!(
        "'{}': {} hotspots at p <= {}, {} at p <= {}",
        features.target,
        hotspots.len(),
        hotspots.threshold,
        exploratory.len(),
        exploratory.threshold
    );

    let distances = distance_to_hotspots(&cells, &hotspots)?;

    let cells = cells
        .into_iter()
        .map(|cell| {
            let id = cell.id();
            let (statistic, p_value) = outcomes
                .get(&id)
                .and_then(LocalMoranOutcome::computed)
                .map_or((0.0, 1.0), |r| (r.statistic, r.p_value));
            let flag = |set: &Hotspots| if set.contains(id) { 1.0 } else { 0.0 };

            Ok(cell
                .with_feature(features.local_i(), statistic)?
                .with_feature(features.p_value(), p_value)?
                .with_feature(features.is_sig(), flag(&hotspots))?
                .with_feature(features.is_sig_exploratory(), flag(&exploratory))?
                .with_feature(features.distance(), distances[&id])?)
        })
        .collect::<Result<Vec<_>, AutocorrelationError>>()?;

    Ok(SpatialProcessOutput {
        cells,
        outcomes,
        hotspots,
        exploratory,
    })
}
