//! `GeoJSON` input loading.
//!
//! Every input is a `FeatureCollection` (a bare `Feature` or geometry is
//! accepted too). Coordinates must already be in the planar projection
//! the pipeline runs in.

use std::path::Path;

use geo::{Geometry, MultiPolygon};
use geojson::{Feature, GeoJson};
use risk_map_models::PointEvent;
use risk_map_spatial::GroupPolygon;
use thiserror::Error;

/// Errors raised while reading an input file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("Feature {index} has no geometry")]
    MissingGeometry { index: usize },

    #[error("Feature {index} is not a {expected}")]
    UnexpectedGeometry { index: usize, expected: &'static str },

    #[error("Feature {index} has no string '{property}' property")]
    MissingProperty {
        index: usize,
        property: &'static str,
    },

    #[error("Boundary contains no polygons")]
    EmptyBoundary,
}

/// Reads a whole file, naming the path on failure.
///
/// # Errors
///
/// Returns [`LoadError::Io`] if the file cannot be read.
pub fn read(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn features(content: &str) -> Result<Vec<Feature>, LoadError> {
    let geojson: GeoJson = content.parse()?;
    Ok(match geojson {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    })
}

fn geometry(index: usize, feature: &Feature) -> Result<Geometry<f64>, LoadError> {
    let geometry = feature
        .geometry
        .clone()
        .ok_or(LoadError::MissingGeometry { index })?;
    let converted: Geometry<f64> = geometry.try_into()?;
    Ok(converted)
}

fn string_property<'a>(feature: &'a Feature, property: &str) -> Option<&'a str> {
    feature.property(property).and_then(|value| value.as_str())
}

/// Parses point features into events. The category comes from each
/// feature's `category` property, else `fallback`. `MultiPoint` features
/// yield one event per point.
///
/// # Errors
///
/// Returns [`LoadError`] for malformed `GeoJSON` or non-point features.
pub fn points(content: &str, fallback: &str) -> Result<Vec<PointEvent>, LoadError> {
    let mut events = Vec::new();
    for (index, feature) in features(content)?.iter().enumerate() {
        let category = string_property(feature, "category").unwrap_or(fallback);
        match geometry(index, feature)? {
            Geometry::Point(point) => events.push(PointEvent::new(point.x(), point.y(), category)),
            Geometry::MultiPoint(multi) => {
                events.extend(multi.iter().map(|p| PointEvent::new(p.x(), p.y(), category)));
            }
            _ => {
                return Err(LoadError::UnexpectedGeometry {
                    index,
                    expected: "Point or MultiPoint",
                });
            }
        }
    }
    Ok(events)
}

fn polygons(index: usize, feature: &Feature) -> Result<MultiPolygon<f64>, LoadError> {
    match geometry(index, feature)? {
        Geometry::MultiPolygon(multi) => Ok(multi),
        Geometry::Polygon(polygon) => Ok(MultiPolygon(vec![polygon])),
        _ => Err(LoadError::UnexpectedGeometry {
            index,
            expected: "Polygon or MultiPolygon",
        }),
    }
}

/// Merges every polygon feature into one boundary.
///
/// # Errors
///
/// Returns [`LoadError::EmptyBoundary`] if there are no polygons, and
/// other [`LoadError`]s for malformed input.
pub fn boundary(content: &str) -> Result<MultiPolygon<f64>, LoadError> {
    let mut merged = Vec::new();
    for (index, feature) in features(content)?.iter().enumerate() {
        merged.extend(polygons(index, feature)?.0);
    }
    if merged.is_empty() {
        return Err(LoadError::EmptyBoundary);
    }
    Ok(MultiPolygon(merged))
}

/// Parses named group polygons. Each feature needs a string `name`.
///
/// # Errors
///
/// Returns [`LoadError::MissingProperty`] for unnamed features, and other
/// [`LoadError`]s for malformed input.
pub fn groups(content: &str) -> Result<Vec<GroupPolygon>, LoadError> {
    features(content)?
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            let name = string_property(feature, "name").ok_or(LoadError::MissingProperty {
                index,
                property: "name",
            })?;
            Ok(GroupPolygon {
                name: name.to_string(),
                polygon: polygons(index, feature)?,
            })
        })
        .collect()
}
