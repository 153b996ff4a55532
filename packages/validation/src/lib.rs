#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Cross-validated count regression.
//!
//! Cells are partitioned into folds either at random (seeded k-fold) or by
//! their spatial group label (leave-one-group-out). For each fold a
//! Poisson regression is fit on every other fold and used to predict the
//! held-out cells. Folds run in parallel; a fold whose fit is degenerate
//! is recorded as failed and the rest continue.

pub mod cv;
pub mod folds;
pub mod metrics;
pub mod poisson;

pub use cv::{CvOutput, CvRun, FoldFailure, cross_validate, train_test_split};
pub use folds::{Fold, FoldPolicy, partition};
pub use metrics::{FoldMetrics, RunSummary, fold_metrics, summarize};
pub use poisson::{FitOptions, PoissonError, PoissonModel};

use risk_map_models::CellId;
use thiserror::Error;

/// Errors that can occur during cross-validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A fold's training set could not be fit.
    #[error("Model fit failed for fold '{fold}': {source}")]
    ModelFitFailure {
        /// Held-out fold whose training set was degenerate.
        fold: String,
        /// Underlying fit error.
        #[source]
        source: PoissonError,
    },

    /// The folds do not form a usable partition.
    #[error("Partition imbalance: {reason}")]
    PartitionImbalance {
        /// What is wrong with the folds.
        reason: String,
    },

    /// Spatial-group partitioning found a cell without a group label.
    #[error("{cell} has no spatial group label")]
    MissingGroup {
        /// The unlabeled cell.
        cell: CellId,
    },

    /// A regression feature is not attached to a cell.
    #[error("{cell} has no feature named '{name}'")]
    MissingFeature {
        /// The cell missing the feature.
        cell: CellId,
        /// Feature name.
        name: String,
    },

    /// A cell has no target count.
    #[error("{cell} has no target count")]
    MissingTarget {
        /// The cell missing its target.
        cell: CellId,
    },
}
