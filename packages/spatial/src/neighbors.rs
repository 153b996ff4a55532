//! Mean nearest-neighbor distance features.
//!
//! For each cell centroid, averages the planar distances to the `k`
//! nearest points of a layer. Layers with fewer than `k` points use all
//! of them.

use geo::Point;
use rayon::prelude::*;
use risk_map_models::Cell;
use rstar::RTree;

use crate::SpatialError;

/// Mean distance from each origin to its `k` nearest layer points.
///
/// The result is index-aligned with `origins`.
///
/// # Errors
///
/// * [`SpatialError::InvalidParameter`] if `k` is zero.
/// * [`SpatialError::InsufficientNeighbors`] if `layer` is empty.
pub fn mean_nearest_distances(
    origins: &[Point<f64>],
    layer: &[Point<f64>],
    k: usize,
    layer_name: &str,
) -> Result<Vec<f64>, SpatialError> {
    if k == 0 {
        return Err(SpatialError::InvalidParameter {
            parameter: "k",
            reason: "neighbor count must be at least 1".to_string(),
        });
    }
    if layer.is_empty() {
        return Err(SpatialError::InsufficientNeighbors {
            layer: layer_name.to_string(),
        });
    }

    let take = k.min(layer.len());
    if take < k {
        log::debug!(
            "Layer '{layer_name}' has {} points; averaging over all of them instead of k={k}",
            layer.len()
        );
    }

    let tree = RTree::bulk_load(layer.iter().map(|p| [p.x(), p.y()]).collect::<Vec<_>>());

    Ok(origins
        .par_iter()
        .map(|origin| {
            let total: f64 = tree
                .nearest_neighbor_iter_with_distance_2(&[origin.x(), origin.y()])
                .take(take)
                .map(|(_, distance_2)| distance_2.sqrt())
                .sum();
            #[allow(clippy::cast_precision_loss)]
            let mean = total / take as f64;
            mean
        })
        .collect())
}

/// Attaches the mean `k`-nearest distance from each cell centroid to
/// `layer` as the feature `feature_name`.
///
/// # Errors
///
/// Propagates the errors of [`mean_nearest_distances`], plus
/// [`SpatialError::Model`] if the feature name is already taken.
pub fn attach_nearest_distance(
    cells: Vec<Cell>,
    layer: &[Point<f64>],
    k: usize,
    feature_name: &str,
) -> Result<Vec<Cell>, SpatialError> {
    let centroids: Vec<Point<f64>> = cells.iter().map(Cell::centroid).collect();
    let distances = mean_nearest_distances(&centroids, layer, k, feature_name)?;

    cells
        .into_iter()
        .zip(distances)
        .map(|(cell, distance)| {
            cell.with_feature(feature_name, distance)
                .map_err(SpatialError::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_k_nearest() {
        let layer = vec![
            Point::new(1.0, 0.0),
            Point::new(0.0, 2.0),
            Point::new(-3.0, 0.0),
            Point::new(10.0, 10.0),
        ];
        let d =
            mean_nearest_distances(&[Point::new(0.0, 0.0)], &layer, 3, "abandoned_cars").unwrap();
        assert!((d[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn short_layer_uses_all_points() {
        let layer = vec![Point::new(3.0, 4.0), Point::new(0.0, 1.0)];
        let d = mean_nearest_distances(&[Point::new(0.0, 0.0)], &layer, 5, "liquor").unwrap();
        assert!((d[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_layer_is_insufficient() {
        let err =
            mean_nearest_distances(&[Point::new(0.0, 0.0)], &[], 3, "street_lights").unwrap_err();
        match err {
            SpatialError::InsufficientNeighbors { layer } => assert_eq!(layer, "street_lights"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_k_is_rejected() {
        let err = mean_nearest_distances(&[Point::new(0.0, 0.0)], &[Point::new(1.0, 1.0)], 0, "x")
            .unwrap_err();
        assert!(matches!(err, SpatialError::InvalidParameter { .. }));
    }
}
