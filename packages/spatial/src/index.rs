//! In-memory R-tree over keyed polygons.
//!
//! Backs both point-to-cell aggregation and centroid-to-group
//! assignment. Lookups resolve a point to exactly one polygon key with a
//! deterministic rule for points that sit on shared boundaries.

use std::fmt::Display;

use geo::{BoundingRect, Contains, Intersects, MultiPolygon, Point};
use rstar::{AABB, RTree, RTreeObject};

use crate::SpatialError;

/// A polygon stored in the R-tree with its key.
struct PolygonEntry<K> {
    key: K,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl<K> RTreeObject for PolygonEntry<K> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over a set of keyed polygons.
pub struct PolygonIndex<K> {
    tree: RTree<PolygonEntry<K>>,
}

impl<K: Ord + Display> PolygonIndex<K> {
    /// Bulk-loads the polygons into an R-tree.
    ///
    /// Polygons without a bounding box (empty geometry) are skipped.
    #[must_use]
    pub fn new(polygons: impl IntoIterator<Item = (K, MultiPolygon<f64>)>) -> Self {
        let entries: Vec<PolygonEntry<K>> = polygons
            .into_iter()
            .filter_map(|(key, polygon)| {
                let Some(envelope) = compute_envelope(&polygon) else {
                    log::warn!("Skipping empty polygon {key} while building spatial index");
                    return None;
                };
                Some(PolygonEntry {
                    key,
                    envelope,
                    polygon,
                })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed polygons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Resolves the polygon containing `point`.
    ///
    /// A point strictly inside one polygon belongs to it. A point on the
    /// shared boundary of several polygons (and inside none) belongs to the
    /// smallest key among them. A point touching no polygon yields
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::AmbiguousAssignment`] if the interiors of two
    /// or more polygons contain the point.
    pub fn locate(&self, point: Point<f64>) -> Result<Option<&K>, SpatialError> {
        let query_env = AABB::from_point([point.x(), point.y()]);

        let mut interior: Vec<&K> = Vec::new();
        let mut on_boundary: Option<&K> = None;

        for entry in self.tree.locate_in_envelope_intersecting(&query_env) {
            if entry.polygon.contains(&point) {
                interior.push(&entry.key);
            } else if entry.polygon.intersects(&point) {
                match on_boundary {
                    Some(current) if current <= &entry.key => {}
                    _ => on_boundary = Some(&entry.key),
                }
            }
        }

        match interior.len() {
            0 => Ok(on_boundary),
            1 => Ok(Some(interior[0])),
            _ => {
                interior.sort();
                Err(SpatialError::AmbiguousAssignment {
                    x: point.x(),
                    y: point.y(),
                    candidates: interior.iter().map(ToString::to_string).collect(),
                })
            }
        }
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

#[cfg(test)]
mod tests {
    use geo::{Rect, coord};

    use super::*;

    fn square(x: f64, y: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![
            Rect::new(coord! { x: x, y: y }, coord! { x: x + 1.0, y: y + 1.0 }).to_polygon(),
        ])
    }

    fn two_by_two() -> PolygonIndex<u32> {
        PolygonIndex::new(vec![
            (0, square(0.0, 0.0)),
            (1, square(1.0, 0.0)),
            (2, square(0.0, 1.0)),
            (3, square(1.0, 1.0)),
        ])
    }

    #[test]
    fn interior_point_resolves_to_its_polygon() {
        let index = two_by_two();
        assert_eq!(index.locate(Point::new(1.5, 0.5)).unwrap(), Some(&1));
    }

    #[test]
    fn shared_edge_goes_to_smallest_key() {
        let index = two_by_two();
        assert_eq!(index.locate(Point::new(1.0, 0.5)).unwrap(), Some(&0));
        assert_eq!(index.locate(Point::new(1.5, 1.0)).unwrap(), Some(&1));
    }

    #[test]
    fn shared_corner_goes_to_smallest_key() {
        let index = two_by_two();
        assert_eq!(index.locate(Point::new(1.0, 1.0)).unwrap(), Some(&0));
    }

    #[test]
    fn outside_point_is_unassigned() {
        let index = two_by_two();
        assert_eq!(index.locate(Point::new(5.0, 5.0)).unwrap(), None);
    }

    #[test]
    fn overlapping_interiors_are_ambiguous() {
        let index = PolygonIndex::new(vec![(7, square(0.0, 0.0)), (4, square(0.5, 0.5))]);
        let err = index.locate(Point::new(0.75, 0.75)).unwrap_err();
        match err {
            SpatialError::AmbiguousAssignment { candidates, .. } => {
                assert_eq!(candidates, vec!["4".to_string(), "7".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
