#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Kernel density baseline.
//!
//! Smooths point events into a continuous Gaussian density surface and
//! averages it over each grid cell, once per bandwidth.

pub mod kde;

pub use kde::{DensityBaseline, KernelDensity, cell_density, density_baselines};

use thiserror::Error;

/// Errors that can occur while estimating densities.
#[derive(Debug, Error)]
pub enum DensityError {
    /// Bandwidth is not a positive finite number.
    #[error("Bandwidth must be positive and finite, got {bandwidth}")]
    InvalidBandwidth {
        /// The rejected bandwidth.
        bandwidth: f64,
    },

    /// No bandwidths were supplied.
    #[error("At least one bandwidth is required")]
    NoBandwidths,

    /// There are no events to smooth.
    #[error("Kernel density needs at least one event")]
    NoEvents,

    /// The per-cell sampling lattice has no points.
    #[error("Sample lattice size must be at least 1, got {samples}")]
    InvalidSamples {
        /// The rejected lattice size.
        samples: usize,
    },
}
