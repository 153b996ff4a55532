//! Fold partitioning.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use risk_map_models::{Cell, CellId, FoldGroupKey};

use crate::ValidationError;

/// How cells are assigned to folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldPolicy {
    /// Shuffle cells with a seeded generator and deal them round-robin
    /// into `folds` folds of near-equal size.
    Random {
        /// Number of folds.
        folds: usize,
        /// Shuffle seed.
        seed: u64,
    },
    /// One fold per distinct group label.
    SpatialGroup,
}

impl FoldPolicy {
    #[must_use]
    pub const fn key(self) -> FoldGroupKey {
        match self {
            Self::Random { .. } => FoldGroupKey::Random,
            Self::SpatialGroup => FoldGroupKey::SpatialGroup,
        }
    }
}

/// Held-out cells of one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    /// Group value identifying the fold.
    pub name: String,
    /// Cells in the fold, in id order.
    pub cells: Vec<CellId>,
}

/// Partitions `cells` into folds. Every cell lands in exactly one fold and
/// no fold is empty. Folds are returned in name order.
///
/// # Errors
///
/// * [`ValidationError::MissingGroup`] if `SpatialGroup` meets an
///   unlabeled cell.
/// * [`ValidationError::PartitionImbalance`] if fewer than two non-empty
///   folds result.
pub fn partition(cells: &[Cell], policy: FoldPolicy) -> Result<Vec<Fold>, ValidationError> {
    let mut groups: BTreeMap<String, Vec<CellId>> = BTreeMap::new();

    match policy {
        FoldPolicy::Random { folds, seed } => {
            if folds < 2 {
                return Err(ValidationError::PartitionImbalance {
                    reason: format!("random partitioning needs at least 2 folds, got {folds}"),
                });
            }
            if folds > cells.len() {
                return Err(ValidationError::PartitionImbalance {
                    reason: format!("{folds} folds requested for {} cells", cells.len()),
                });
            }

            let mut ids: Vec<CellId> = cells.iter().map(Cell::id).collect();
            ids.sort_unstable();
            ids.shuffle(&mut StdRng::seed_from_u64(seed));

            let width = folds.to_string().len();
            for (i, id) in ids.into_iter().enumerate() {
                let name = format!("{:0width$}", i % folds + 1);
                groups.entry(name).or_default().push(id);
            }
        }
        FoldPolicy::SpatialGroup => {
            for cell in cells {
                let group = cell
                    .group()
                    .ok_or(ValidationError::MissingGroup { cell: cell.id() })?;
                groups.entry(group.to_string()).or_default().push(cell.id());
            }
        }
    }

    if groups.len() < 2 {
        return Err(ValidationError::PartitionImbalance {
            reason: format!(
                "{} distinct fold value(s) over {} cells; a single fold would hold every cell",
                groups.len(),
                cells.len()
            ),
        });
    }

    let folds: Vec<Fold> = groups
        .into_iter()
        .map(|(name, mut cells)| {
            cells.sort_unstable();
            Fold { name, cells }
        })
        .collect();

    log::debug!(
        "Partitioned {} cells into {} {} folds",
        cells.len(),
        folds.len(),
        policy.key().label()
    );

    Ok(folds)
}
