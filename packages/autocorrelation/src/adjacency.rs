//! Contiguity graph between cells.

use std::collections::{BTreeMap, BTreeSet};

use geo::{BoundingRect, Intersects, Line, Polygon};
use risk_map_models::{Cell, CellId, Contiguity};
use rstar::{AABB, RTree, RTreeObject};

/// Relative tolerance for collinearity and overlap in the rook test.
const EDGE_TOLERANCE: f64 = 1e-9;

/// Symmetric neighbor relation over cell ids.
///
/// Every cell passed to [`build_adjacency`] has an entry, possibly empty.
/// No cell is its own neighbor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjacencyGraph {
    neighbors: BTreeMap<CellId, BTreeSet<CellId>>,
}

impl AdjacencyGraph {
    /// Neighbors of `cell`, empty if it is isolated or unknown.
    pub fn neighbors(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        self.neighbors.get(&cell).into_iter().flatten().copied()
    }

    /// Number of neighbors of `cell`.
    #[must_use]
    pub fn degree(&self, cell: CellId) -> usize {
        self.neighbors.get(&cell).map_or(0, BTreeSet::len)
    }

    /// Every cell in the graph, in id order.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.neighbors.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Cells with no neighbors.
    pub fn isolated(&self) -> impl Iterator<Item = CellId> + '_ {
        self.neighbors
            .iter()
            .filter(|(_, n)| n.is_empty())
            .map(|(id, _)| *id)
    }
}

struct CellEnvelope<'a> {
    id: CellId,
    polygon: &'a Polygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for CellEnvelope<'_> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Builds the contiguity graph for `cells`.
///
/// Candidate pairs come from an R-tree over cell bounding boxes (touching
/// boxes count as intersecting); each candidate is then checked against
/// the contiguity rule.
#[must_use]
pub fn build_adjacency(cells: &[Cell], contiguity: Contiguity) -> AdjacencyGraph {
    let entries: Vec<CellEnvelope<'_>> = cells
        .iter()
        .filter_map(|cell| {
            let rect = cell.polygon().bounding_rect()?;
            Some(CellEnvelope {
                id: cell.id(),
                polygon: cell.polygon(),
                envelope: AABB::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                ),
            })
        })
        .collect();
    let tree = RTree::bulk_load(entries);

    let mut neighbors: BTreeMap<CellId, BTreeSet<CellId>> =
        cells.iter().map(|cell| (cell.id(), BTreeSet::new())).collect();

    for entry in tree.iter() {
        for candidate in tree.locate_in_envelope_intersecting(&entry.envelope) {
            if candidate.id <= entry.id {
                continue;
            }
            let touching = match contiguity {
                Contiguity::Queen => entry.polygon.intersects(candidate.polygon),
                Contiguity::Rook => shares_edge(entry.polygon, candidate.polygon),
            };
            if touching {
                neighbors.entry(entry.id).or_default().insert(candidate.id);
                neighbors.entry(candidate.id).or_default().insert(entry.id);
            }
        }
    }

    let graph = AdjacencyGraph { neighbors };
    let isolated = graph.isolated().count();
    log::debug!(
        "Built {contiguity} contiguity over {} cells ({isolated} isolated)",
        graph.len()
    );
    graph
}

fn shares_edge(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    a.exterior().lines().any(|edge_a| {
        b.exterior()
            .lines()
            .any(|edge_b| collinear_overlap(edge_a, edge_b) > 0.0)
    })
}

/// Length of the overlap between two segments lying on the same line, or
/// zero if they are not collinear.
fn collinear_overlap(a: Line<f64>, b: Line<f64>) -> f64 {
    let d = a.delta();
    let length = d.x.hypot(d.y);
    if length == 0.0 {
        return 0.0;
    }
    let tolerance = EDGE_TOLERANCE * length.max(1.0);

    let offset = |p: geo::Coord<f64>| (d.x * (p.y - a.start.y) - d.y * (p.x - a.start.x)) / length;
    if offset(b.start).abs() > tolerance || offset(b.end).abs() > tolerance {
        return 0.0;
    }

    let along = |p: geo::Coord<f64>| ((p.x - a.start.x) * d.x + (p.y - a.start.y) * d.y) / length;
    let (t0, t1) = {
        let (s, e) = (along(b.start), along(b.end));
        if s <= e { (s, e) } else { (e, s) }
    };

    let overlap = t1.min(length) - t0.max(0.0);
    if overlap > tolerance { overlap } else { 0.0 }
}
