//! Gaussian kernel density surface and its cell means.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use geo::{BoundingRect, Point};
use rayon::prelude::*;
use risk_map_models::{Cell, CellId};
use rstar::RTree;

use crate::DensityError;

/// Kernels are truncated at this many bandwidths.
const CUTOFF: f64 = 5.0;

/// Gaussian kernel density estimate over a set of points.
///
/// The density at `x` is `1/n Σ K_h(x - x_i)` where `K_h` is the
/// isotropic bivariate normal with standard deviation `h`, so the surface
/// integrates to 1 over the plane. No edge correction is applied.
pub struct KernelDensity {
    tree: RTree<[f64; 2]>,
    bandwidth: f64,
    count: usize,
}

impl KernelDensity {
    /// # Errors
    ///
    /// * [`DensityError::InvalidBandwidth`] if `bandwidth` is not positive
    ///   and finite.
    /// * [`DensityError::NoEvents`] if `points` is empty.
    pub fn new(points: &[Point<f64>], bandwidth: f64) -> Result<Self, DensityError> {
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            return Err(DensityError::InvalidBandwidth { bandwidth });
        }
        if points.is_empty() {
            return Err(DensityError::NoEvents);
        }

        Ok(Self {
            tree: RTree::bulk_load(points.iter().map(|p| [p.x(), p.y()]).collect()),
            bandwidth,
            count: points.len(),
        })
    }

    #[must_use]
    pub const fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Density at `(x, y)`.
    #[must_use]
    pub fn at(&self, x: f64, y: f64) -> f64 {
        let h2 = self.bandwidth * self.bandwidth;
        let reach = CUTOFF * self.bandwidth;

        let sum: f64 = self
            .tree
            .locate_within_distance([x, y], reach * reach)
            .map(|p| {
                let d2 = (p[0] - x).powi(2) + (p[1] - y).powi(2);
                (-d2 / (2.0 * h2)).exp()
            })
            .sum();

        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        sum / (2.0 * PI * h2 * n)
    }

    /// Mean density over an `samples × samples` lattice of points at the
    /// centers of equal sub-squares of the cell's bounding box.
    #[must_use]
    pub fn cell_mean(&self, cell: &Cell, samples: usize) -> f64 {
        let Some(rect) = cell.polygon().bounding_rect() else {
            return 0.0;
        };
        #[allow(clippy::cast_precision_loss)]
        let s = samples as f64;
        let (dx, dy) = (rect.width() / s, rect.height() / s);

        let mut total = 0.0;
        for i in 0..samples {
            for j in 0..samples {
                #[allow(clippy::cast_precision_loss)]
                let (fi, fj) = (i as f64, j as f64);
                total += self.at(
                    rect.min().x + (fi + 0.5) * dx,
                    rect.min().y + (fj + 0.5) * dy,
                );
            }
        }
        total / (s * s)
    }
}

/// Mean density of every cell.
///
/// # Errors
///
/// Returns [`DensityError::InvalidSamples`] if `samples` is zero.
pub fn cell_density(
    cells: &[Cell],
    density: &KernelDensity,
    samples: usize,
) -> Result<BTreeMap<CellId, f64>, DensityError> {
    if samples == 0 {
        return Err(DensityError::InvalidSamples { samples });
    }

    let values: Vec<(CellId, f64)> = cells
        .par_iter()
        .map(|cell| (cell.id(), density.cell_mean(cell, samples)))
        .collect();

    Ok(values.into_iter().collect())
}

/// Cell densities at one bandwidth.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityBaseline {
    pub bandwidth: f64,
    /// Model label, e.g. `"Kernel Density (bw 1000)"`.
    pub label: String,
    pub values: BTreeMap<CellId, f64>,
}

/// Computes one density baseline per bandwidth, in the order given.
///
/// # Errors
///
/// * [`DensityError::NoBandwidths`] if `bandwidths` is empty.
/// * Errors of [`KernelDensity::new`] and [`cell_density`].
pub fn density_baselines(
    cells: &[Cell],
    events: &[Point<f64>],
    bandwidths: &[f64],
    samples: usize,
) -> Result<Vec<DensityBaseline>, DensityError> {
    if bandwidths.is_empty() {
        return Err(DensityError::NoBandwidths);
    }

    bandwidths
        .iter()
        .map(|&bandwidth| {
            let density = KernelDensity::new(events, bandwidth)?;
            let values = cell_density(cells, &density, samples)?;
            log::debug!(
                "Kernel density at bandwidth {bandwidth}: {} events over {} cells",
                events.len(),
                values.len()
            );
            Ok(DensityBaseline {
                bandwidth,
                label: format!("Kernel Density (bw {bandwidth})"),
                values,
            })
        })
        .collect()
}
