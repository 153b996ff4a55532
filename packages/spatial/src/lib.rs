#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Grid construction and cell-level spatial features.
//!
//! Builds a fishnet of square cells over a study-area boundary, assigns
//! point events and group polygons to cells through an R-tree
//! point-in-polygon index, and computes mean nearest-neighbor distances
//! from cell centroids to point layers. All operations take immutable
//! inputs and return new values.

pub mod aggregate;
pub mod grid;
pub mod groups;
pub mod index;
pub mod neighbors;

pub use aggregate::{Aggregation, CellCounts, aggregate_counts, attach_counts};
pub use grid::build_grid;
pub use groups::{GroupPolygon, assign_groups};
pub use index::PolygonIndex;
pub use neighbors::{attach_nearest_distance, mean_nearest_distances};

use thiserror::Error;

/// Errors that can occur during spatial operations.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// Boundary or polygon input is empty, zero-area, or non-finite.
    #[error("Invalid geometry: {reason}")]
    InvalidGeometry {
        /// Description of what is wrong with the geometry.
        reason: String,
    },

    /// A point falls strictly inside more than one polygon.
    #[error("Point ({x}, {y}) falls inside multiple polygons: {}", candidates.join(", "))]
    AmbiguousAssignment {
        /// Point x coordinate.
        x: f64,
        /// Point y coordinate.
        y: f64,
        /// Identifiers of every polygon whose interior contains the point.
        candidates: Vec<String>,
    },

    /// A neighbor-distance source layer has no points.
    #[error("Layer '{layer}' has no points to measure neighbor distances against")]
    InsufficientNeighbors {
        /// Name of the empty layer.
        layer: String,
    },

    /// A numeric parameter is out of range.
    #[error("Invalid parameter {parameter}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        parameter: &'static str,
        /// Description of the violated constraint.
        reason: String,
    },

    /// Attaching a feature to a cell failed.
    #[error(transparent)]
    Model(#[from] risk_map_models::ModelsError),
}
