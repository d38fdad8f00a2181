#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Population density sources.
//!
//! The GIS server samples a `WorldPop` raster inside an arbitrary polygon
//! and returns density statistics. When it is unreachable, slow, or has no
//! raster cells inside the polygon, [`lookup_with_fallback`] substitutes the
//! area-weighted [`SimplifiedEstimator`] instead of failing the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Datelike as _;
use geo::{Centroid as _, MultiPolygon, Point};
use health_access_analysis_models::{DensityPercentiles, EstimateSource, PopulationDensitySample};
use health_access_config::{DensityConfig, EstimateBounds};
use health_access_fetch::{ApiClient, FetchFailure, POPULATION_DENSITY_PATH, number, round_population};
use health_access_geometry::feature_from_multipolygon;
use serde_json::Value;

/// Base people per km² of the offline estimate when nothing else is known.
pub const DEFAULT_FALLBACK_DENSITY: f64 = 500.0;

/// A source of population density statistics for arbitrary polygons.
#[async_trait]
pub trait DensitySource: Send + Sync {
    /// Samples population density inside `area`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] if no sample could be obtained.
    async fn sample(&self, area: &MultiPolygon<f64>) -> Result<PopulationDensitySample, FetchFailure>;
}

/// Density sampled by the GIS server's population-density-for-area
/// endpoint.
pub struct HttpDensitySource {
    client: ApiClient,
}

impl HttpDensitySource {
    /// Creates a source backed by `client`.
    #[must_use]
    pub const fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DensitySource for HttpDensitySource {
    async fn sample(&self, area: &MultiPolygon<f64>) -> Result<PopulationDensitySample, FetchFailure> {
        let feature = feature_from_multipolygon(area, serde_json::Map::new());
        let body = self
            .client
            .post_json(POPULATION_DENSITY_PATH, &serde_json::json!({ "area": feature }))
            .await?;
        parse_density_response(&body, current_year())
    }
}

/// Parses a population-density-for-area response.
///
/// `mean_density` is required. Missing statistics default to zero, a
/// missing `estimated_population` is derived from mean density and area,
/// and a missing `year` becomes `default_year`. Percentiles are kept only
/// when all four are present.
///
/// # Errors
///
/// Returns [`FetchFailure::Payload`] if the body is not an object or has no
/// numeric `mean_density`.
pub fn parse_density_response(
    body: &Value,
    default_year: i32,
) -> Result<PopulationDensitySample, FetchFailure> {
    if !body.is_object() {
        return Err(FetchFailure::Payload {
            message: "density response is not an object".to_string(),
        });
    }

    let mean_density = number(body, "mean_density").ok_or_else(|| FetchFailure::Payload {
        message: "density response has no mean_density".to_string(),
    })?;
    let area_km2 = number(body, "area_km2").unwrap_or(0.0);

    let percentiles = match (
        number(body, "percentile_25"),
        number(body, "percentile_50"),
        number(body, "percentile_75"),
        number(body, "percentile_90"),
    ) {
        (Some(p25), Some(p50), Some(p75), Some(p90)) => Some(DensityPercentiles { p25, p50, p75, p90 }),
        _ => None,
    };

    let year = body
        .get("year")
        .and_then(Value::as_i64)
        .and_then(|year| i32::try_from(year).ok())
        .unwrap_or(default_year);

    Ok(PopulationDensitySample {
        mean_density,
        min_density: number(body, "min_density").unwrap_or(0.0),
        max_density: number(body, "max_density").unwrap_or(0.0),
        median_density: number(body, "median_density").unwrap_or(0.0),
        percentiles,
        area_km2,
        estimated_population: number(body, "estimated_population")
            .map_or_else(|| round_population(mean_density * area_km2), round_population),
        year,
    })
}

fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// Area in km² at which the estimate equals its base density.
const REFERENCE_AREA_KM2: f64 = 10.0;

/// Scale applied to the base density for an area of `area_km2`:
/// `clamp(10 / area_km2, 0.5, 1.5)`. Smaller areas are assumed denser.
///
/// Empty or unknown areas get the largest factor.
#[must_use]
pub fn area_size_factor(area_km2: f64) -> f64 {
    if area_km2 > 0.0 {
        (REFERENCE_AREA_KM2 / area_km2).clamp(0.5, 1.5)
    } else {
        1.5
    }
}

/// Offline density estimate used when the density service is unavailable.
///
/// Without bounds the estimate is the base density scaled by
/// [`area_size_factor`]. With [`EstimateBounds`] the starting point falls
/// linearly from the maximum density at the bounds' center to the minimum
/// plus 30% of the range at 0.05° away. It is then scaled by the area
/// factor and clamped into the range.
#[derive(Debug, Clone, Copy)]
pub struct SimplifiedEstimator {
    base_density: f64,
    bounds: Option<EstimateBounds>,
}

impl SimplifiedEstimator {
    /// Creates an estimator around `base_density` people per km².
    #[must_use]
    pub const fn new(base_density: f64) -> Self {
        Self {
            base_density,
            bounds: None,
        }
    }

    /// Creates the estimator described by `config`.
    #[must_use]
    pub const fn from_config(config: &DensityConfig) -> Self {
        Self {
            base_density: config.fallback_density_per_km2,
            bounds: config.estimate_bounds,
        }
    }

    /// Shapes the estimate with a known density range.
    #[must_use]
    pub const fn with_bounds(mut self, bounds: EstimateBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Density before the area factor, when no bounds are set.
    #[must_use]
    pub const fn base_density(&self) -> f64 {
        self.base_density
    }

    /// Builds a sample for an area of `area_km2` at an unknown location.
    #[must_use]
    pub fn estimate(&self, area_km2: f64) -> PopulationDensitySample {
        self.estimate_at(area_km2, None)
    }

    /// Builds a sample for an area of `area_km2` centred on `centroid`.
    ///
    /// A missing centroid counts as being at the bounds' center. No
    /// percentiles are reported, so consumers classify the estimate with
    /// absolute breakpoints.
    #[must_use]
    pub fn estimate_at(&self, area_km2: f64, centroid: Option<Point<f64>>) -> PopulationDensitySample {
        let area_km2 = if area_km2.is_finite() { area_km2.max(0.0) } else { 0.0 };
        let density = self.density_for(area_km2, centroid);
        PopulationDensitySample {
            mean_density: density,
            min_density: density * 0.5,
            max_density: density * 1.5,
            median_density: density,
            percentiles: None,
            area_km2,
            estimated_population: round_population(area_km2 * density),
            year: current_year(),
        }
    }

    fn density_for(&self, area_km2: f64, centroid: Option<Point<f64>>) -> f64 {
        let factor = area_size_factor(area_km2);
        let Some(bounds) = self.bounds else {
            return self.base_density * factor;
        };

        let closeness = centroid.map_or(1.0, |point| {
            let distance = (point.x() - bounds.center[0]).hypot(point.y() - bounds.center[1]);
            (distance * 20.0).min(1.0).mul_add(-0.7, 1.0)
        });
        let start = (bounds.max_density - bounds.min_density).mul_add(closeness, bounds.min_density);
        (start * factor).max(bounds.min_density).min(bounds.max_density)
    }
}

impl Default for SimplifiedEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_DENSITY)
    }
}

/// A density sample and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityLookup {
    /// The sample.
    pub sample: PopulationDensitySample,
    /// Whether the sample is from the density service or the estimate.
    pub source: EstimateSource,
}

/// Samples `area` from `source`, falling back to `estimator` on failure or
/// after `timeout`.
///
/// `area_km2` is the caller's own area for `area`; it sizes the fallback
/// estimate, which is placed at the centroid of `area`. With no `source`
/// the estimate is used directly.
pub async fn lookup_with_fallback(
    source: Option<&Arc<dyn DensitySource>>,
    estimator: SimplifiedEstimator,
    area: &MultiPolygon<f64>,
    area_km2: f64,
    timeout: Duration,
) -> DensityLookup {
    let Some(source) = source else {
        return DensityLookup {
            sample: estimator.estimate_at(area_km2, area.centroid()),
            source: EstimateSource::Heuristic,
        };
    };

    let failure = match tokio::time::timeout(timeout, source.sample(area)).await {
        Ok(Ok(sample)) => {
            return DensityLookup {
                sample,
                source: EstimateSource::DensityService,
            };
        }
        Ok(Err(e)) => e,
        Err(_) => FetchFailure::Timeout { after: timeout },
    };

    log::warn!("Density lookup failed ({failure}), using simplified estimate");
    DensityLookup {
        sample: estimator.estimate_at(area_km2, area.centroid()),
        source: EstimateSource::Heuristic,
    }
}
