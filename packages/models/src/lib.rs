#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core data model for the risk surface pipeline.
//!
//! Defines the grid [`Cell`] with its additive [`FeatureSet`], the
//! categorized [`PointEvent`], out-of-fold [`Prediction`] rows, and the
//! small enums that select contiguity rules, fold grouping, feature
//! subsets, and percentile risk bands. Every other crate in the workspace
//! speaks in these types.

use std::collections::BTreeMap;

use geo::{Centroid, Point, Polygon};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Errors raised while building or extending the data model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelsError {
    /// A feature with this name is already attached to the cell.
    #[error("cell {cell} already has a feature named '{name}'")]
    DuplicateFeature {
        /// Cell the feature was being attached to.
        cell: CellId,
        /// The feature name that already exists.
        name: String,
    },

    /// The cell polygon has no centroid (empty exterior ring).
    #[error("cell {cell} has a degenerate polygon")]
    DegeneratePolygon {
        /// The offending cell.
        cell: CellId,
    },
}

/// Stable identifier of a grid cell.
///
/// Assigned row-major by the grid builder, so ordering by id is ordering
/// by position (bottom row first, west to east).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CellId(pub u32);

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell-{}", self.0)
    }
}

/// Named numeric feature values attached to a cell.
///
/// Attachment is additive: a name can be inserted once and never
/// overwritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeMap<String, f64>);

impl FeatureSet {
    /// Returns the value of the named feature, if attached.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Returns `true` if a feature with this name is attached.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Number of attached features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no features are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates features in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// A single grid cell.
///
/// Geometry, id and centroid are fixed at construction. Features, the
/// target count and the group label are attached through the consuming
/// `with_*` builders, which return a new cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    id: CellId,
    polygon: Polygon<f64>,
    centroid: Point<f64>,
    group: Option<String>,
    target: Option<u64>,
    features: FeatureSet,
}

impl Cell {
    /// Creates a cell from its polygon.
    ///
    /// # Errors
    ///
    /// Returns [`ModelsError::DegeneratePolygon`] if the polygon has no
    /// centroid.
    pub fn new(id: CellId, polygon: Polygon<f64>) -> Result<Self, ModelsError> {
        let centroid = polygon
            .centroid()
            .ok_or(ModelsError::DegeneratePolygon { cell: id })?;

        Ok(Self {
            id,
            polygon,
            centroid,
            group: None,
            target: None,
            features: FeatureSet::default(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> CellId {
        self.id
    }

    #[must_use]
    pub const fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    #[must_use]
    pub const fn centroid(&self) -> Point<f64> {
        self.centroid
    }

    /// Spatial group label (e.g. containing neighborhood), if assigned.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Observed event count used as the regression response.
    #[must_use]
    pub const fn target(&self) -> Option<u64> {
        self.target
    }

    #[must_use]
    pub const fn features(&self) -> &FeatureSet {
        &self.features
    }

    /// Shorthand for `self.features().get(name)`.
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name)
    }

    /// Attaches a new named feature.
    ///
    /// # Errors
    ///
    /// Returns [`ModelsError::DuplicateFeature`] if the name is taken.
    pub fn with_feature(
        mut self,
        name: impl Into<String>,
        value: f64,
    ) -> Result<Self, ModelsError> {
        let name = name.into();
        if self.features.contains(&name) {
            return Err(ModelsError::DuplicateFeature {
                cell: self.id,
                name,
            });
        }
        self.features.0.insert(name, value);
        Ok(self)
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub const fn with_target(mut self, target: u64) -> Self {
        self.target = Some(target);
        self
    }
}

/// A categorized point event (e.g. one reported burglary).
#[derive(Debug, Clone, PartialEq)]
pub struct PointEvent {
    /// Location in the shared planar projection.
    pub location: Point<f64>,
    /// Category label such as `"burglaries"` or `"graffiti"`.
    pub category: String,
}

impl PointEvent {
    #[must_use]
    pub fn new(x: f64, y: f64, category: impl Into<String>) -> Self {
        Self {
            location: Point::new(x, y),
            category: category.into(),
        }
    }
}

/// One out-of-fold prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    /// Cell the prediction is for.
    pub cell: CellId,
    /// Predicted mean count.
    pub predicted: f64,
    /// Observed count.
    pub observed: f64,
    /// Fold (group value) the cell was held out in.
    pub fold: String,
    /// Label of the model run that produced it.
    pub model: String,
}

impl Prediction {
    /// `predicted - observed`.
    #[must_use]
    pub fn error(&self) -> f64 {
        self.predicted - self.observed
    }
}

/// Rule deciding which cells are neighbors.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Contiguity {
    /// Neighbors share any boundary point (edge or corner).
    #[default]
    Queen,
    /// Neighbors share an edge of positive length.
    Rook,
}

/// How cells are grouped into cross-validation folds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FoldGroupKey {
    /// Synthetic random group ids (k-fold).
    Random,
    /// Each cell's spatial group label (leave-one-group-out).
    SpatialGroup,
}

impl FoldGroupKey {
    /// Short label used in model run names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Random => "k-fold",
            Self::SpatialGroup => "LOGO-CV",
        }
    }
}

/// Which features enter the regression.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeatureSubset {
    /// Risk-factor features only.
    RiskFactors,
    /// Risk-factor features plus local spatial-process features.
    RiskFactorsSpatialProcess,
}

impl FeatureSubset {
    /// Short label used in model run names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::RiskFactors => "Risk Factors",
            Self::RiskFactorsSpatialProcess => "Spatial Process",
        }
    }
}

/// Five ordered percentile bands, lowest risk first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    /// Percentiles 1 through 29.
    Lowest,
    /// Percentiles 30 through 49.
    Low,
    /// Percentiles 50 through 69.
    Moderate,
    /// Percentiles 70 through 89.
    High,
    /// Percentiles 90 through 100.
    Highest,
}

impl RiskBand {
    /// All bands, lowest risk first.
    pub const ALL: [Self; 5] = [
        Self::Lowest,
        Self::Low,
        Self::Moderate,
        Self::High,
        Self::Highest,
    ];

    /// Maps a 1-100 percentile bucket onto its band.
    #[must_use]
    pub const fn from_percentile(percentile: u8) -> Self {
        match percentile {
            90.. => Self::Highest,
            70..=89 => Self::High,
            50..=69 => Self::Moderate,
            30..=49 => Self::Low,
            _ => Self::Lowest,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Lowest => "1% to 29%",
            Self::Low => "30% to 49%",
            Self::Moderate => "50% to 69%",
            Self::High => "70% to 89%",
            Self::Highest => "90% to 100%",
        }
    }
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
