//! Fishnet grid construction.
//!
//! Lays a lattice of square cells over the boundary's bounding box,
//! starting at its lower-left corner, and keeps every cell that
//! intersects the boundary. Ids are assigned row-major (south to north,
//! west to east) over the retained cells, so identical inputs always
//! produce identical ids.

use geo::{Area, BoundingRect, Intersects, MultiPolygon, Rect, coord};
use risk_map_models::{Cell, CellId};

use crate::SpatialError;

/// Upper bound on the number of lattice positions scanned.
const MAX_LATTICE_CELLS: usize = 25_000_000;

/// Builds the clipped fishnet for `boundary`.
///
/// # Errors
///
/// * [`SpatialError::InvalidParameter`] if `cell_size` is not a positive
///   finite number or the lattice would be unreasonably large.
/// * [`SpatialError::InvalidGeometry`] if the boundary is empty,
///   zero-area, or has non-finite coordinates.
pub fn build_grid(boundary: &MultiPolygon<f64>, cell_size: f64) -> Result<Vec<Cell>, SpatialError> {
    if !cell_size.is_finite() || cell_size <= 0.0 {
        return Err(SpatialError::InvalidParameter {
            parameter: "cell_size",
            reason: format!("must be a positive finite number, got {cell_size}"),
        });
    }

    let area = boundary.unsigned_area();
    if !area.is_finite() || area <= 0.0 {
        return Err(SpatialError::InvalidGeometry {
            reason: format!("boundary must have positive finite area, got {area}"),
        });
    }

    let Some(bounds) = boundary.bounding_rect() else {
        return Err(SpatialError::InvalidGeometry {
            reason: "boundary is empty".to_string(),
        });
    };

    let cols = lattice_extent(bounds.width(), cell_size);
    let rows = lattice_extent(bounds.height(), cell_size);

    if rows.saturating_mul(cols) > MAX_LATTICE_CELLS {
        return Err(SpatialError::InvalidParameter {
            parameter: "cell_size",
            reason: format!("{cell_size} yields a {rows}x{cols} lattice, which is too large"),
        });
    }

    let origin = bounds.min();
    let mut cells = Vec::new();
    let mut next_id = 0u32;

    for row in 0..rows {
        #[allow(clippy::cast_precision_loss)]
        let y0 = origin.y + row as f64 * cell_size;
        #[allow(clippy::cast_precision_loss)]
        let y1 = origin.y + (row + 1) as f64 * cell_size;

        for col in 0..cols {
            #[allow(clippy::cast_precision_loss)]
            let x0 = origin.x + col as f64 * cell_size;
            #[allow(clippy::cast_precision_loss)]
            let x1 = origin.x + (col + 1) as f64 * cell_size;

            let polygon = Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon();
            if !boundary.intersects(&polygon) {
                continue;
            }

            cells.push(Cell::new(CellId(next_id), polygon)?);
            next_id += 1;
        }
    }

    log::debug!(
        "Built fishnet: {} of {} lattice cells intersect the boundary (cell size {cell_size})",
        cells.len(),
        rows * cols
    );

    Ok(cells)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lattice_extent(span: f64, cell_size: f64) -> usize {
    ((span / cell_size).ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use geo::{LineString, Polygon};

    use super::*;

    fn square_boundary(size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: size, y: size }).to_polygon(),
        ])
    }

    #[test]
    fn square_boundary_yields_full_lattice() {
        let cells = build_grid(&square_boundary(10.0), 1.0).unwrap();
        assert_eq!(cells.len(), 100);
        assert_eq!(cells[0].id(), CellId(0));
        assert!((cells[0].centroid().x() - 0.5).abs() < 1e-12);
        assert!((cells[0].centroid().y() - 0.5).abs() < 1e-12);
        assert!((cells[10].centroid().y() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn triangle_keeps_only_intersecting_cells() {
        let triangle = MultiPolygon(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (0.0, 4.0), (0.0, 0.0)]),
            vec![],
        )]);
        let cells = build_grid(&triangle, 1.0).unwrap();
        assert!(cells.len() < 16);
        assert!(cells.iter().all(|c| triangle.intersects(c.polygon())));
    }

    #[test]
    fn ids_are_stable_across_calls() {
        let boundary = square_boundary(7.5);
        let a: Vec<CellId> = build_grid(&boundary, 2.0).unwrap().iter().map(Cell::id).collect();
        let b: Vec<CellId> = build_grid(&boundary, 2.0).unwrap().iter().map(Cell::id).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_boundary_is_invalid() {
        let err = build_grid(&MultiPolygon(vec![]), 1.0).unwrap_err();
        assert!(matches!(err, SpatialError::InvalidGeometry { .. }));
    }

    #[test]
    fn zero_area_boundary_is_invalid() {
        let sliver = MultiPolygon(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (5.0, 0.0), (10.0, 0.0), (0.0, 0.0)]),
            vec![],
        )]);
        let err = build_grid(&sliver, 1.0).unwrap_err();
        assert!(matches!(err, SpatialError::InvalidGeometry { .. }));
    }

    #[test]
    fn non_positive_cell_size_is_rejected() {
        let err = build_grid(&square_boundary(1.0), 0.0).unwrap_err();
        assert!(matches!(err, SpatialError::InvalidParameter { .. }));
    }
}
