//! Row-standardized spatial weights.

use std::collections::BTreeMap;

use risk_map_models::CellId;

use crate::adjacency::AdjacencyGraph;

/// Weights of one cell toward its neighbors.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightRow {
    /// Neighbor weights summing to 1.
    Normal(Vec<(CellId, f64)>),
    /// The cell has no neighbors; its row is all zero.
    Isolated,
}

impl WeightRow {
    /// Sum of the row's weights (`W_i`).
    #[must_use]
    pub fn sum(&self) -> f64 {
        match self {
            Self::Normal(row) => row.iter().map(|(_, w)| w).sum(),
            Self::Isolated => 0.0,
        }
    }

    /// Sum of squared weights (`W_i2`).
    #[must_use]
    pub fn sum_of_squares(&self) -> f64 {
        match self {
            Self::Normal(row) => row.iter().map(|(_, w)| w * w).sum(),
            Self::Isolated => 0.0,
        }
    }
}

/// Row-standardized weights for every cell of an adjacency graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialWeights {
    rows: BTreeMap<CellId, WeightRow>,
}

impl SpatialWeights {
    #[must_use]
    pub fn row(&self, cell: CellId) -> Option<&WeightRow> {
        self.rows.get(&cell)
    }

    /// Rows in cell id order.
    pub fn rows(&self) -> impl Iterator<Item = (CellId, &WeightRow)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    /// Cells with at least one neighbor.
    pub fn connected(&self) -> impl Iterator<Item = CellId> + '_ {
        self.rows
            .iter()
            .filter(|(_, row)| matches!(row, WeightRow::Normal(_)))
            .map(|(id, _)| *id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Row-standardizes the graph: each neighbor of a cell with `d`
/// neighbors gets weight `1 / d`. Isolated cells get
/// [`WeightRow::Isolated`].
#[must_use]
pub fn row_standardize(graph: &AdjacencyGraph) -> SpatialWeights {
    let rows = graph
        .cells()
        .map(|cell| {
            let degree = graph.degree(cell);
            let row = if degree == 0 {
                WeightRow::Isolated
            } else {
                #[allow(clippy::cast_precision_loss)]
                let weight = 1.0 / degree as f64;
                WeightRow::Normal(graph.neighbors(cell).map(|n| (n, weight)).collect())
            };
            (cell, row)
        })
        .collect();

    SpatialWeights { rows }
}
