//! Point-to-cell aggregation.
//!
//! Counts point events per cell and per category. Every cell carries a
//! count for every category seen, zero when no point landed in it.

use std::collections::{BTreeMap, BTreeSet};

use geo::MultiPolygon;
use risk_map_models::{Cell, CellId, PointEvent};

use crate::SpatialError;
use crate::index::PolygonIndex;

/// Cell id -> category -> count.
pub type CellCounts = BTreeMap<CellId, BTreeMap<String, u64>>;

/// Result of assigning a set of point events to cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    /// Per-cell, per-category counts. Contains every cell and every
    /// category in `categories`.
    pub counts: CellCounts,
    /// Every category present in the input events.
    pub categories: BTreeSet<String>,
    /// Points that fell outside every cell.
    pub dropped: usize,
}

impl Aggregation {
    /// Count for one cell and category (zero when absent).
    #[must_use]
    pub fn count(&self, cell: CellId, category: &str) -> u64 {
        self.counts
            .get(&cell)
            .and_then(|by_category| by_category.get(category))
            .copied()
            .unwrap_or(0)
    }

    /// Total number of points assigned to some cell.
    #[must_use]
    pub fn assigned(&self) -> u64 {
        self.counts.values().flat_map(BTreeMap::values).sum()
    }
}

/// Builds an index over the cell polygons for repeated lookups.
#[must_use]
pub fn cell_index(cells: &[Cell]) -> PolygonIndex<CellId> {
    PolygonIndex::new(
        cells
            .iter()
            .map(|cell| (cell.id(), MultiPolygon(vec![cell.polygon().clone()]))),
    )
}

/// Assigns each event to its containing cell and counts per category.
///
/// Points outside all cells are dropped (and counted in
/// [`Aggregation::dropped`]). Points on a shared cell boundary go to the
/// smallest adjoining cell id.
///
/// # Errors
///
/// Returns [`SpatialError::AmbiguousAssignment`] if a point lies inside the
/// interiors of more than one cell.
pub fn aggregate_counts(
    events: &[PointEvent],
    cells: &[Cell],
) -> Result<Aggregation, SpatialError> {
    let index = cell_index(cells);

    let categories: BTreeSet<String> = events.iter().map(|e| e.category.clone()).collect();

    let mut counts: CellCounts = cells
        .iter()
        .map(|cell| {
            let zeros = categories.iter().map(|c| (c.clone(), 0u64)).collect();
            (cell.id(), zeros)
        })
        .collect();

    let mut dropped = 0usize;

    for event in events {
        let Some(cell_id) = index.locate(event.location)? else {
            dropped += 1;
            continue;
        };
        if let Some(count) = counts
            .get_mut(cell_id)
            .and_then(|by_category| by_category.get_mut(&event.category))
        {
            *count += 1;
        }
    }

    if dropped > 0 {
        log::warn!(
            "Dropped {dropped} of {} points that fall outside every cell",
            events.len()
        );
    }

    Ok(Aggregation {
        counts,
        categories,
        dropped,
    })
}

/// Attaches one count feature per category to each cell.
///
/// Categories with no points still get a zero feature, so the caller can
/// list the categories it expects rather than the ones that happened to
/// occur.
///
/// # Errors
///
/// Returns [`SpatialError::Model`] if a cell already carries a feature
/// with one of the category names.
pub fn attach_counts(
    cells: Vec<Cell>,
    aggregation: &Aggregation,
    categories: &[String],
) -> Result<Vec<Cell>, SpatialError> {
    cells
        .into_iter()
        .map(|cell| {
            let id = cell.id();
            categories.iter().try_fold(cell, |cell, category| {
                #[allow(clippy::cast_precision_loss)]
                let count = aggregation.count(id, category) as f64;
                cell.with_feature(category.clone(), count)
                    .map_err(SpatialError::from)
            })
        })
        .collect()
}
