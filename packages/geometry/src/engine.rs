use geo::{
    BooleanOps, Centroid, ChamberlainDuquetteArea, Contains, Coord, Destination, Haversine,
    LineString, MultiPolygon, Point, Polygon,
};

use crate::validate::{check_coordinate, check_ring_simple, check_structure};
use crate::{BUFFER_VERTICES, EMPTY_AREA_KM2, GeometryError, GeometrySource};

const M2_PER_KM2: f64 = 1_000_000.0;

/// Default [`GeometrySource`] working on WGS84 coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalEngine;

impl SphericalEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn km2(polygon: &MultiPolygon<f64>) -> f64 {
        polygon.chamberlain_duquette_unsigned_area() / M2_PER_KM2
    }

    /// Drops slivers left behind by the overlay and maps an empty result to
    /// `None`.
    fn non_empty(result: MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
        let parts: Vec<Polygon<f64>> = result
            .0
            .into_iter()
            .filter(|part| part.chamberlain_duquette_unsigned_area() / M2_PER_KM2 >= EMPTY_AREA_KM2)
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(MultiPolygon::new(parts))
        }
    }
}

impl GeometrySource for SphericalEngine {
    fn buffer(&self, center: Point<f64>, radius_km: f64) -> Result<Polygon<f64>, GeometryError> {
        check_coordinate(center.x(), center.y())?;
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(GeometryError::InvalidRadius { radius_km });
        }

        let meters = radius_km * 1000.0;
        let step = 360.0 / f64::from(BUFFER_VERTICES);

        // Bearings run clockwise; walk them backwards for a CCW exterior.
        let coords: Vec<Coord<f64>> = (0..BUFFER_VERTICES)
            .rev()
            .map(|i| Coord::from(Haversine.destination(center, f64::from(i) * step, meters)))
            .collect();

        Ok(Polygon::new(LineString::from(coords), vec![]))
    }

    fn union(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> Result<Option<MultiPolygon<f64>>, GeometryError> {
        check_structure(a)?;
        check_structure(b)?;
        Ok(Self::non_empty(a.union(b)))
    }

    fn intersect(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> Result<Option<MultiPolygon<f64>>, GeometryError> {
        check_structure(a)?;
        check_structure(b)?;
        Ok(Self::non_empty(a.intersection(b)))
    }

    fn difference(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> Result<Option<MultiPolygon<f64>>, GeometryError> {
        check_structure(a)?;
        check_structure(b)?;
        Ok(Self::non_empty(a.difference(b)))
    }

    fn area_km2(&self, polygon: &MultiPolygon<f64>) -> Result<f64, GeometryError> {
        check_structure(polygon)?;
        let area = Self::km2(polygon);
        if area < EMPTY_AREA_KM2 {
            return Err(GeometryError::ZeroArea);
        }
        Ok(area)
    }

    fn centroid(&self, polygon: &MultiPolygon<f64>) -> Result<Point<f64>, GeometryError> {
        polygon.centroid().ok_or(GeometryError::Empty)
    }

    fn contains_point(&self, polygon: &MultiPolygon<f64>, point: Point<f64>) -> bool {
        polygon.contains(&point)
    }

    fn validate(&self, polygon: &MultiPolygon<f64>) -> Result<(), GeometryError> {
        check_structure(polygon)?;
        for part in &polygon.0 {
            check_ring_simple(part.exterior())?;
            for interior in part.interiors() {
                check_ring_simple(interior)?;
            }
        }
        Ok(())
    }
}
