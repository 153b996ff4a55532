//! Pipeline configuration, read from TOML.

use risk_map_models::{Contiguity, FeatureSubset, FoldGroupKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML could not be parsed into a configuration.
    #[error("Failed to parse pipeline config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value the pipeline cannot run with.
    #[error("Invalid config field '{field}': {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Which regression run is compared against the density baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComparisonConfig {
    pub fold_group_key: FoldGroupKey,
    pub feature_subset: FeatureSubset,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            fold_group_key: FoldGroupKey::SpatialGroup,
            feature_subset: FeatureSubset::RiskFactorsSpatialProcess,
        }
    }
}

/// Settings for one pipeline run. Every field has a default, so an empty
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Side length of a grid cell, in projection units.
    pub cell_size: f64,
    /// Neighbors averaged by the nearest-distance features.
    pub k: usize,
    pub contiguity: Contiguity,
    /// p-value cutoff for the final hotspot label.
    pub significance_threshold: f64,
    /// p-value cutoff for the exploratory hotspot label.
    pub exploratory_threshold: f64,
    /// Kernel density bandwidths, one baseline each.
    pub bandwidths: Vec<f64>,
    pub fold_group_keys: Vec<FoldGroupKey>,
    /// Fold count for random partitioning.
    pub random_folds: usize,
    /// Seed for random partitioning.
    pub seed: u64,
    pub feature_subsets: Vec<FeatureSubset>,
    /// Also use per-cell risk layer counts as features.
    pub include_counts: bool,
    /// Density samples per cell side.
    pub kde_samples: usize,
    /// Event category used as the response. `None` counts every event.
    pub target_category: Option<String>,
    pub comparison: ComparisonConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cell_size: 500.0,
            k: 3,
            contiguity: Contiguity::Queen,
            significance_threshold: 0.001,
            exploratory_threshold: 0.05,
            bandwidths: vec![1000.0, 1500.0, 2000.0],
            fold_group_keys: vec![FoldGroupKey::Random, FoldGroupKey::SpatialGroup],
            random_folds: 100,
            seed: 42,
            feature_subsets: vec![
                FeatureSubset::RiskFactors,
                FeatureSubset::RiskFactorsSpatialProcess,
            ],
            include_counts: false,
            kde_samples: 4,
            target_category: None,
            comparison: ComparisonConfig::default(),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_threshold(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be in (0, 1], got {value}")))
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::de::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against the ranges the pipeline supports.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(invalid(
                "cell_size",
                format!("must be positive, got {}", self.cell_size),
            ));
        }
        if self.k == 0 {
            return Err(invalid("k", "must be at least 1"));
        }
        check_threshold("significance_threshold", self.significance_threshold)?;
        check_threshold("exploratory_threshold", self.exploratory_threshold)?;

        if self.bandwidths.is_empty() {
            return Err(invalid("bandwidths", "at least one bandwidth is required"));
        }
        if let Some(bad) = self
            .bandwidths
            .iter()
            .find(|b| !b.is_finite() || **b <= 0.0)
        {
            return Err(invalid("bandwidths", format!("must be positive, got {bad}")));
        }

        if self.fold_group_keys.is_empty() {
            return Err(invalid("fold_group_keys", "at least one key is required"));
        }
        if self.feature_subsets.is_empty() {
            return Err(invalid("feature_subsets", "at least one subset is required"));
        }
        if self.fold_group_keys.contains(&FoldGroupKey::Random) && self.random_folds < 2 {
            return Err(invalid(
                "random_folds",
                format!("must be at least 2, got {}", self.random_folds),
            ));
        }
        if self.kde_samples == 0 {
            return Err(invalid("kde_samples", "must be at least 1"));
        }

        if !self.fold_group_keys.contains(&self.comparison.fold_group_key)
            || !self.feature_subsets.contains(&self.comparison.feature_subset)
        {
            return Err(invalid(
                "comparison",
                format!(
                    "{} with {} is not among the configured runs",
                    self.comparison.feature_subset, self.comparison.fold_group_key
                ),
            ));
        }

        Ok(())
    }

    /// `true` if any run needs the spatial-process features.
    #[must_use]
    pub fn needs_spatial_process(&self) -> bool {
        self.feature_subsets
            .contains(&FeatureSubset::RiskFactorsSpatialProcess)
    }
}
