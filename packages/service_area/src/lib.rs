#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Facility service areas.
//!
//! The merged service area is the union of a buffer around every facility.
//! The GIS server can return it precomputed; when it cannot, the same area
//! is built locally from per-facility buffers. [`ServiceAreaBuilder::resolve`]
//! hides which path was taken, so coverage classification only ever sees a
//! [`ServiceArea`].

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use geo::{MultiPolygon, Polygon};
use geojson::GeoJson;
use health_access_analysis_models::{ServiceArea, ServiceAreaOrigin};
use health_access_config::{ServiceAreaConfig, SuitabilityConfig};
use health_access_facility_models::{Facility, FacilityType};
use health_access_fetch::{ApiClient, FetchFailure, MERGED_SERVICE_AREAS_PATH};
use health_access_geometry::{GeometryError, GeometrySource, multipolygon_from_geojson};
use serde_json::Value;

/// Remote source of a precomputed merged service area.
#[async_trait]
pub trait PrecomputedSource: Send + Sync {
    /// Returns the raw merged-service-areas payload.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] if the server cannot provide one.
    async fn merged_service_areas(&self) -> Result<Value, FetchFailure>;
}

#[async_trait]
impl PrecomputedSource for ApiClient {
    async fn merged_service_areas(&self) -> Result<Value, FetchFailure> {
        self.get_json(MERGED_SERVICE_AREAS_PATH).await
    }
}

/// Selects which facilities count as existing coverage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FacilityFilter {
    excluded: BTreeSet<FacilityType>,
}

impl FacilityFilter {
    /// Accepts every facility.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Rejects the given facility types.
    #[must_use]
    pub fn excluding(types: impl IntoIterator<Item = FacilityType>) -> Self {
        Self {
            excluded: types.into_iter().collect(),
        }
    }

    /// Builds the filter from the configured exclusion list.
    #[must_use]
    pub fn from_config(config: &SuitabilityConfig) -> Self {
        Self::excluding(config.excluded_facility_types.iter().copied())
    }

    /// Whether `facility` passes the filter.
    #[must_use]
    pub fn accepts(&self, facility: &Facility) -> bool {
        !self.excluded.contains(&facility.facility_type)
    }

    /// The facilities that pass the filter.
    pub fn apply<'a>(&'a self, facilities: &'a [Facility]) -> impl Iterator<Item = &'a Facility> {
        facilities.iter().filter(|facility| self.accepts(facility))
    }
}

/// One facility's buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityBuffer {
    /// Facility id.
    pub facility_id: String,
    /// Facility name.
    pub facility_name: String,
    /// Radius used for the buffer.
    pub radius_km: f64,
    /// The buffer polygon.
    pub polygon: Polygon<f64>,
}

/// A service area and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedServiceArea {
    /// The merged service area.
    pub area: ServiceArea,
    /// Diagnostic only; consumers never branch on it.
    pub origin: ServiceAreaOrigin,
}

/// Builds merged service areas from facilities.
#[derive(Clone)]
pub struct ServiceAreaBuilder {
    geometry: Arc<dyn GeometrySource>,
    boundary: Option<MultiPolygon<f64>>,
}

impl ServiceAreaBuilder {
    /// Creates a builder on top of `geometry`.
    #[must_use]
    pub fn new(geometry: Arc<dyn GeometrySource>) -> Self {
        Self {
            geometry,
            boundary: None,
        }
    }

    /// Clips locally built areas to `boundary`.
    ///
    /// The server clips its precomputed area to the county boundary, so
    /// locally built areas are clipped the same way when one is known.
    #[must_use]
    pub fn with_boundary(mut self, boundary: MultiPolygon<f64>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    fn facility_buffer(
        &self,
        facility: &Facility,
        config: &ServiceAreaConfig,
    ) -> Result<FacilityBuffer, GeometryError> {
        let radius_km = config.radius_for(facility.facility_type);
        let polygon = self.geometry.buffer(facility.location.to_point(), radius_km)?;
        Ok(FacilityBuffer {
            facility_id: facility.id.clone(),
            facility_name: facility.name.clone(),
            radius_km,
            polygon,
        })
    }

    /// Buffers every facility individually.
    ///
    /// Facilities whose buffer cannot be built are logged and skipped.
    pub fn build_per_facility<'a, I>(&self, facilities: I, config: &ServiceAreaConfig) -> Vec<FacilityBuffer>
    where
        I: IntoIterator<Item = &'a Facility>,
    {
        facilities
            .into_iter()
            .filter_map(|facility| match self.facility_buffer(facility, config) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    log::warn!("Skipping buffer for {}: {e}", facility.name);
                    None
                }
            })
            .collect()
    }

    /// Unions the buffers of every facility into one service area.
    ///
    /// A facility whose buffer or union step fails is logged and left out.
    /// When no buffer survives the result is [`ServiceArea::Empty`].
    pub fn build_for_facilities<'a, I>(&self, facilities: I, config: &ServiceAreaConfig) -> ServiceArea
    where
        I: IntoIterator<Item = &'a Facility>,
    {
        let mut merged: Option<MultiPolygon<f64>> = None;
        let mut total = 0_usize;
        let mut included = 0_usize;

        for facility in facilities {
            total += 1;
            let buffer = match self.facility_buffer(facility, config) {
                Ok(buffer) => MultiPolygon::new(vec![buffer.polygon]),
                Err(e) => {
                    log::warn!("Skipping buffer for {}: {e}", facility.name);
                    continue;
                }
            };

            merged = match merged {
                None => Some(buffer),
                Some(current) => match self.geometry.union(&current, &buffer) {
                    Ok(Some(union)) => Some(union),
                    Ok(None) => Some(current),
                    Err(e) => {
                        log::warn!("Skipping {} in service area union: {e}", facility.name);
                        merged = Some(current);
                        continue;
                    }
                },
            };
            included += 1;
        }

        log::info!("Built service area from {included} of {total} facility buffers");

        match merged {
            None => ServiceArea::Empty,
            Some(area) => self.clip(ServiceArea::Covered(area)),
        }
    }

    /// Clips `area` to the builder's boundary, if any.
    ///
    /// A clip that fails keeps the unclipped area.
    #[must_use]
    pub fn clip(&self, area: ServiceArea) -> ServiceArea {
        let Some(boundary) = &self.boundary else {
            return area;
        };
        let ServiceArea::Covered(polygon) = area else {
            return ServiceArea::Empty;
        };
        match self.geometry.intersect(&polygon, boundary) {
            Ok(Some(clipped)) => ServiceArea::Covered(clipped),
            Ok(None) => {
                log::warn!("Service area lies entirely outside the boundary");
                ServiceArea::Empty
            }
            Err(e) => {
                log::warn!("Could not clip service area to boundary: {e}");
                ServiceArea::Covered(polygon)
            }
        }
    }

    /// Parses a merged-service-areas payload.
    ///
    /// Accepts any `GeoJSON` object. Several polygons (one feature per
    /// facility, for example) are unioned so overlaps are not counted
    /// twice. A payload without polygons is a legitimately empty area.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure::Payload`] when the payload is not `GeoJSON`
    /// or its geometry is unusable.
    pub fn parse_precomputed(&self, body: Value) -> Result<ServiceArea, FetchFailure> {
        let payload = |e: &dyn std::fmt::Display| FetchFailure::Payload {
            message: format!("merged service area: {e}"),
        };

        let geojson = GeoJson::from_json_value(body).map_err(|e| payload(&e))?;
        let Some(polygon) = multipolygon_from_geojson(geojson).map_err(|e| payload(&e))? else {
            return Ok(ServiceArea::Empty);
        };

        let mut parts = polygon.0.into_iter().map(|part| MultiPolygon::new(vec![part]));
        let Some(mut merged) = parts.next() else {
            return Ok(ServiceArea::Empty);
        };
        for part in parts {
            if let Some(union) = self.geometry.union(&merged, &part).map_err(|e| payload(&e))? {
                merged = union;
            }
        }

        self.geometry.area_km2(&merged).map_err(|e| payload(&e))?;
        Ok(ServiceArea::Covered(merged))
    }

    /// Fetches the server's merged service area.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] on any transport, status, envelope, or
    /// payload problem. An empty area is `Ok(ServiceArea::Empty)`.
    pub async fn fetch_precomputed(
        &self,
        source: &dyn PrecomputedSource,
    ) -> Result<ServiceArea, FetchFailure> {
        let body = source.merged_service_areas().await?;
        self.parse_precomputed(body)
    }

    /// Returns the precomputed service area when available, otherwise
    /// builds one from the facilities that pass `filter`.
    pub async fn resolve(
        &self,
        source: Option<&dyn PrecomputedSource>,
        facilities: &[Facility],
        filter: &FacilityFilter,
        config: &ServiceAreaConfig,
    ) -> ResolvedServiceArea {
        if let Some(source) = source {
            match self.fetch_precomputed(source).await {
                Ok(area) => {
                    log::info!("Using precomputed service area");
                    return ResolvedServiceArea {
                        area,
                        origin: ServiceAreaOrigin::Precomputed,
                    };
                }
                Err(e) => {
                    log::warn!("Precomputed service area unavailable ({e}), building locally");
                }
            }
        }

        ResolvedServiceArea {
            area: self.build_for_facilities(filter.apply(facilities), config),
            origin: ServiceAreaOrigin::LocalBuffers,
        }
    }
}
