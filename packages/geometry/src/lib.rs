#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polygon operations used by the coverage analysis.
//!
//! [`GeometrySource`] is the seam between the analysis crates and the
//! polygon library. Every operation is pure and reports malformed input as
//! a [`GeometryError`] so callers can drop the offending ward or facility
//! and carry on with the rest of the batch.
//!
//! [`SphericalEngine`] is the default implementation. It works directly on
//! WGS84 longitude/latitude:
//!
//! * buffers are 64-vertex circles whose vertices are Haversine
//!   destination points, so the radius is exact along each bearing and the
//!   polygon area is about 0.16% below the true circle,
//! * boolean operations are the `geo` crate's `BooleanOps` (planar in
//!   degree space, which is adequate at the equatorial latitudes of the
//!   county),
//! * areas use the Chamberlain-Duquette spherical approximation, within a
//!   fraction of a percent of the geodesic area for ward-sized polygons.
//!
//! Results whose area is below [`EMPTY_AREA_KM2`] are treated as empty.

mod convert;
mod engine;
mod index;
mod validate;

use geo::{MultiPolygon, Point, Polygon};
use thiserror::Error;

pub use convert::{
    feature_from_multipolygon, geojson_geometry, multipolygon_from_feature_collection,
    multipolygon_from_geojson, multipolygon_from_geometry,
};
pub use engine::SphericalEngine;
pub use index::WardIndex;
pub use validate::{check_coordinate, check_ring_simple, check_structure};

/// Areas below this many km² count as empty.
pub const EMPTY_AREA_KM2: f64 = 1e-9;

/// Vertices in a buffer circle.
pub const BUFFER_VERTICES: u32 = 64;

/// Malformed or degenerate geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// The geometry has no polygons.
    #[error("Geometry is empty")]
    Empty,

    /// A coordinate is NaN, infinite, or outside the WGS84 range.
    #[error("Invalid coordinate ({x}, {y})")]
    InvalidCoordinate {
        /// Longitude.
        x: f64,
        /// Latitude.
        y: f64,
    },

    /// A ring's first and last coordinates differ.
    #[error("Ring is not closed")]
    UnclosedRing,

    /// A ring has too few coordinates to enclose an area.
    #[error("Ring has {points} coordinates, at least 4 are required")]
    DegenerateRing {
        /// Coordinates in the ring, including the closing one.
        points: usize,
    },

    /// Two edges of the same ring cross or overlap.
    #[error("Ring self-intersects near ({x}, {y})")]
    SelfIntersection {
        /// Longitude of the crossing.
        x: f64,
        /// Latitude of the crossing.
        y: f64,
    },

    /// The polygon encloses no area.
    #[error("Polygon has zero area")]
    ZeroArea,

    /// A buffer radius is zero, negative, or not finite.
    #[error("Buffer radius must be positive, got {radius_km} km")]
    InvalidRadius {
        /// The rejected radius.
        radius_km: f64,
    },

    /// The geometry is not a polygon or multi-polygon.
    #[error("Unsupported geometry type: {0}")]
    UnsupportedType(String),

    /// The `GeoJSON` could not be parsed.
    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),
}

/// A polygon engine.
///
/// `union`, `intersect`, and `difference` return `Ok(None)` when the result
/// is empty: `intersect` for disjoint inputs, `difference` when `a` lies
/// entirely inside `b`.
pub trait GeometrySource: Send + Sync {
    /// Builds a circle of `radius_km` around `center`.
    ///
    /// # Errors
    ///
    /// * [`GeometryError::InvalidCoordinate`] for a bad center
    /// * [`GeometryError::InvalidRadius`] for a non-positive radius
    fn buffer(&self, center: Point<f64>, radius_km: f64) -> Result<Polygon<f64>, GeometryError>;

    /// Union of `a` and `b`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if either input is malformed.
    fn union(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> Result<Option<MultiPolygon<f64>>, GeometryError>;

    /// Intersection of `a` and `b`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if either input is malformed.
    fn intersect(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> Result<Option<MultiPolygon<f64>>, GeometryError>;

    /// The part of `a` outside `b`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if either input is malformed.
    fn difference(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> Result<Option<MultiPolygon<f64>>, GeometryError>;

    /// Area in km².
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::ZeroArea`] for a polygon enclosing nothing,
    /// or another variant if the input is malformed.
    fn area_km2(&self, polygon: &MultiPolygon<f64>) -> Result<f64, GeometryError>;

    /// Centroid of `polygon`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Empty`] for an empty multi-polygon.
    fn centroid(&self, polygon: &MultiPolygon<f64>) -> Result<Point<f64>, GeometryError>;

    /// Whether `point` lies inside `polygon`.
    fn contains_point(&self, polygon: &MultiPolygon<f64>, point: Point<f64>) -> bool;

    /// Full validity check, including ring self-intersection.
    ///
    /// The boolean operations only run the cheap structural checks, so
    /// callers validate untrusted input (ward boundaries) once up front.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    fn validate(&self, polygon: &MultiPolygon<f64>) -> Result<(), GeometryError>;
}
