#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Percentile risk bands and held-out scoring.
//!
//! Any cell-level score (a regression prediction or a density) is ranked
//! into 100 percentile buckets and grouped into five [`RiskBand`]s. Each
//! model is then scored by the share of held-out events that land in each
//! of its bands.
//!
//! [`RiskBand`]: risk_map_models::RiskBand

pub mod bands;
pub mod score;

pub use bands::{BandAssignment, assign_bands};
pub use score::{ComparisonRow, compare_models, score_against_holdout};

use risk_map_models::CellId;
use thiserror::Error;

/// Errors that can occur while banding or scoring.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompareError {
    /// A score is NaN or infinite and cannot be ranked.
    #[error("Score for {cell} is not finite ({score})")]
    NonFiniteScore {
        /// The cell with the bad score.
        cell: CellId,
        /// The score itself.
        score: f64,
    },

    /// A model has no scored cells.
    #[error("Model '{model}' has no scored cells")]
    EmptyScores {
        /// The model's label.
        model: String,
    },
}
