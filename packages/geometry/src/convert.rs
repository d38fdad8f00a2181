//! Conversions between `GeoJSON` and `geo` multi-polygons.

use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson};

use crate::GeometryError;

/// Converts a `GeoJSON` geometry into a [`MultiPolygon`].
///
/// `Polygon` and `MultiPolygon` are accepted directly; polygons inside a
/// `GeometryCollection` are gathered into one multi-polygon.
///
/// # Errors
///
/// * [`GeometryError::InvalidGeoJson`] if the coordinates are malformed
/// * [`GeometryError::UnsupportedType`] for point or line geometries
pub fn multipolygon_from_geometry(
    geometry: geojson::Geometry,
) -> Result<MultiPolygon<f64>, GeometryError> {
    let geo_geom: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e: geojson::Error| GeometryError::InvalidGeoJson(e.to_string()))?;
    into_multipolygon(geo_geom)
}

fn into_multipolygon(geometry: geo::Geometry<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
    match geometry {
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        geo::Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
        geo::Geometry::Rect(r) => Ok(MultiPolygon::new(vec![r.to_polygon()])),
        geo::Geometry::GeometryCollection(collection) => {
            let mut parts = Vec::new();
            for member in collection {
                parts.extend(into_multipolygon(member)?.0);
            }
            if parts.is_empty() {
                return Err(GeometryError::Empty);
            }
            Ok(MultiPolygon::new(parts))
        }
        other => Err(GeometryError::UnsupportedType(kind(&other).to_string())),
    }
}

const fn kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

/// Gathers every polygon in a feature collection into one multi-polygon.
///
/// Features without a geometry are skipped. Polygons are concatenated, not
/// unioned, so overlapping features stay overlapping.
///
/// Returns `Ok(None)` when the collection holds no polygons at all.
///
/// # Errors
///
/// Returns the first feature geometry that fails to convert.
pub fn multipolygon_from_feature_collection(
    collection: FeatureCollection,
) -> Result<Option<MultiPolygon<f64>>, GeometryError> {
    let mut parts = Vec::new();
    for feature in collection.features {
        if let Some(geometry) = feature.geometry {
            parts.extend(multipolygon_from_geometry(geometry)?.0);
        }
    }
    Ok((!parts.is_empty()).then(|| MultiPolygon::new(parts)))
}

/// Converts any `GeoJSON` object into a multi-polygon.
///
/// Returns `Ok(None)` for a feature without geometry or an empty
/// collection.
///
/// # Errors
///
/// Returns [`GeometryError`] when a geometry is malformed or not areal.
pub fn multipolygon_from_geojson(
    geojson: GeoJson,
) -> Result<Option<MultiPolygon<f64>>, GeometryError> {
    match geojson {
        GeoJson::Geometry(geometry) => multipolygon_from_geometry(geometry).map(Some),
        GeoJson::Feature(feature) => feature
            .geometry
            .map(multipolygon_from_geometry)
            .transpose(),
        GeoJson::FeatureCollection(collection) => multipolygon_from_feature_collection(collection),
    }
}

/// Converts a multi-polygon into a `GeoJSON` geometry.
#[must_use]
pub fn geojson_geometry(polygon: &MultiPolygon<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(polygon))
}

/// Wraps a multi-polygon in a `GeoJSON` feature with `properties`.
#[must_use]
pub fn feature_from_multipolygon(
    polygon: &MultiPolygon<f64>,
    properties: serde_json::Map<String, serde_json::Value>,
) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geojson_geometry(polygon)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}
