//! Cell-to-group crosswalk.
//!
//! Labels each cell with the group polygon (neighborhood, police
//! district, ...) that contains its centroid.

use geo::MultiPolygon;
use risk_map_models::Cell;

use crate::SpatialError;
use crate::index::PolygonIndex;

/// A named polygon used for spatial grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPolygon {
    /// Group label, e.g. the neighborhood name.
    pub name: String,
    /// Group geometry.
    pub polygon: MultiPolygon<f64>,
}

/// Assigns every cell the name of the group containing its centroid.
///
/// Cells whose centroid falls in no group are returned unlabeled.
///
/// # Errors
///
/// Returns [`SpatialError::AmbiguousAssignment`] if two group interiors
/// contain the same centroid.
pub fn assign_groups(cells: Vec<Cell>, groups: &[GroupPolygon]) -> Result<Vec<Cell>, SpatialError> {
    let index = PolygonIndex::new(groups.iter().map(|g| (g.name.clone(), g.polygon.clone())));

    let mut unassigned = 0usize;
    let labeled = cells
        .into_iter()
        .map(|cell| match index.locate(cell.centroid())? {
            Some(name) => {
                let name = name.clone();
                Ok(cell.with_group(name))
            }
            None => {
                unassigned += 1;
                Ok(cell)
            }
        })
        .collect::<Result<Vec<_>, SpatialError>>()?;

    log::info!(
        "Assigned {} of {} cells to {} groups",
        labeled.len() - unassigned,
        labeled.len(),
        index.len()
    );

    Ok(labeled)
}
