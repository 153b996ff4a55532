#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Local spatial autocorrelation over grid cells.
//!
//! Builds a contiguity graph between cells, row-standardizes it into
//! spatial weights, computes local Moran's I with its expectation and
//! variance under randomization, flags significant hotspots, and derives
//! the distance from every cell to the nearest hotspot.
//!
//! p-values come from the normal approximation to the randomization
//! distribution (two-tailed), not from conditional permutation.

pub mod adjacency;
pub mod hotspot;
pub mod moran;
pub mod weights;

pub use adjacency::{AdjacencyGraph, build_adjacency};
pub use hotspot::{
    Hotspots, SpatialProcessFeatures, SpatialProcessOutput, attach_spatial_process,
    distance_to_hotspots, flag_hotspots,
};
pub use moran::{LocalMoran, LocalMoranOutcome, local_moran};
pub use weights::{SpatialWeights, WeightRow, row_standardize};

use risk_map_models::CellId;
use thiserror::Error;

/// Errors that can occur during autocorrelation analysis.
#[derive(Debug, Error)]
pub enum AutocorrelationError {
    /// No cell passed the significance threshold.
    #[error("No cell is significant at p <= {threshold}; distance to hotspot is undefined")]
    NoSignificantClusters {
        /// Threshold that was applied.
        threshold: f64,
    },

    /// A cell in the weights has no value.
    #[error("No value supplied for {cell}")]
    MissingValue {
        /// The cell without a value.
        cell: CellId,
    },

    /// Too few connected cells for the variance formula.
    #[error("Local Moran's I needs at least 3 connected cells, got {connected}")]
    InsufficientCells {
        /// Number of non-isolated cells.
        connected: usize,
    },

    /// A significance threshold is outside (0, 1].
    #[error("Significance threshold must be in (0, 1], got {threshold}")]
    InvalidThreshold {
        /// The rejected threshold.
        threshold: f64,
    },

    /// Attaching a feature to a cell failed.
    #[error(transparent)]
    Model(#[from] risk_map_models::ModelsError),
}
