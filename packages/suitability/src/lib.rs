#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Site suitability search.
//!
//! Looks for places to put a new facility. The county boundary minus the
//! area already served is the underserved region; a regular grid of
//! candidate points is laid over it, each candidate's service circle is
//! sampled for population density, and the candidates are ranked by a
//! composite of population reached, existing ward coverage, and density.
//! The final list is spread out so that recommended sites do not cluster.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;

use futures::stream::{self, StreamExt as _};
use geo::{BoundingRect as _, MultiPolygon, Point};
use health_access_analysis_models::{PreconditionError, ServiceArea, SiteCandidate};
use health_access_config::{DensityConfig, SuitabilityConfig};
use health_access_coverage::intersection_ratio;
use health_access_density::{DensitySource, SimplifiedEstimator, lookup_with_fallback};
use health_access_facility_models::{Coordinate, Ward};
use health_access_fetch::{ApiClient, FetchFailure, SITE_SUITABILITY_PATH, number, round_population};
use health_access_geometry::{
    EMPTY_AREA_KM2, GeometryError, GeometrySource, WardIndex, multipolygon_from_geometry,
};
use health_access_needs::ProgressCallback;
use health_access_scoring::{composite_site_score, site_rating};
use serde_json::Value;
use thiserror::Error;

/// Why a suitability search could not run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SuitabilityError {
    /// The county boundary is not loaded.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// The underserved region could not be derived.
    #[error("Could not derive the underserved region: {0}")]
    Geometry(#[from] GeometryError),
}

/// Outcome of a suitability search.
#[derive(Debug, Clone, PartialEq)]
pub struct SuitabilityResult {
    /// Recommended sites, best first.
    pub sites: Vec<SiteCandidate>,
    /// Part of the boundary outside every eligible service area.
    pub underserved_area: Option<MultiPolygon<f64>>,
    /// Candidates that were scored before selection.
    pub candidates_analyzed: usize,
    /// Explanation when no sites could be proposed.
    pub message: Option<String>,
}

impl SuitabilityResult {
    fn without_sites(underserved_area: Option<MultiPolygon<f64>>, message: &str) -> Self {
        Self {
            sites: Vec::new(),
            underserved_area,
            candidates_analyzed: 0,
            message: Some(message.to_string()),
        }
    }
}

/// Searches the underserved region for new facility sites.
pub struct SiteSuitabilityAnalyzer {
    geometry: Arc<dyn GeometrySource>,
    density: Option<Arc<dyn DensitySource>>,
    estimator: SimplifiedEstimator,
    density_config: DensityConfig,
    config: SuitabilityConfig,
}

impl SiteSuitabilityAnalyzer {
    /// Creates an analyzer. Without a density source every candidate uses
    /// the offline density estimate.
    #[must_use]
    pub fn new(
        geometry: Arc<dyn GeometrySource>,
        density: Option<Arc<dyn DensitySource>>,
        density_config: DensityConfig,
        config: SuitabilityConfig,
    ) -> Self {
        Self {
            geometry,
            density,
            estimator: SimplifiedEstimator::from_config(&density_config),
            density_config,
            config,
        }
    }

    /// Runs the search.
    ///
    /// `served` is the merged service area of the facilities that count as
    /// existing coverage.
    ///
    /// # Errors
    ///
    /// * [`PreconditionError::BoundaryMissing`] without a boundary
    /// * [`SuitabilityError::Geometry`] if the boundary and service area
    ///   cannot be differenced
    #[allow(clippy::cast_possible_truncation)]
    pub async fn analyze(
        &self,
        boundary: Option<&MultiPolygon<f64>>,
        served: &ServiceArea,
        wards: &[Ward],
        progress: &Arc<dyn ProgressCallback>,
    ) -> Result<SuitabilityResult, SuitabilityError> {
        let boundary = boundary.ok_or(PreconditionError::BoundaryMissing)?;

        let underserved = match served {
            ServiceArea::Empty => Some(boundary.clone()),
            ServiceArea::Covered(area) => self.geometry.difference(boundary, area)?,
        };
        let Some(underserved) = underserved.filter(|region| {
            self.geometry
                .area_km2(region)
                .is_ok_and(|km2| km2 > EMPTY_AREA_KM2)
        }) else {
            log::info!("The whole boundary is within reach of an existing facility");
            return Ok(SuitabilityResult::without_sites(
                None,
                "No underserved areas found: the whole county is within reach of an existing facility",
            ));
        };

        let points = self.grid_points(&underserved);
        log::info!(
            "Created {} candidate points at {}° spacing",
            points.len(),
            self.config.grid_step_deg
        );
        if points.is_empty() {
            return Ok(SuitabilityResult::without_sites(
                Some(underserved),
                "No candidate points fall inside the underserved areas",
            ));
        }

        let index = WardIndex::from_wards(wards);
        let mut ward_coverage: HashMap<String, Option<f64>> = HashMap::new();
        let placed: Vec<(Point<f64>, Option<(String, Option<f64>)>)> = points
            .into_iter()
            .map(|point| {
                let ward = index.ward_at(point).map(|(name, polygon)| {
                    let pct = *ward_coverage
                        .entry(name.to_string())
                        .or_insert_with(|| self.ward_coverage_pct(name, polygon, served));
                    (name.to_string(), pct)
                });
                (point, ward)
            })
            .collect();

        let total = placed.len();
        progress.set_total(total as u64);
        progress.set_message(format!("Scoring {total} candidate sites"));

        let mut scored = Vec::with_capacity(total);
        let mut lookups = pin!(
            stream::iter(
                placed
                    .into_iter()
                    .map(|(point, ward)| self.score_point(point, ward))
            )
            .buffer_unordered(self.density_config.max_concurrent_lookups.max(1))
        );
        while let Some(candidate) = lookups.next().await {
            progress.inc(1);
            if let Some(candidate) = candidate {
                scored.push(candidate);
            }
        }

        rank(&mut scored);
        let candidates_analyzed = scored.len();
        let sites = select_distributed(scored, &self.config);

        log::info!("Selected {} of {candidates_analyzed} candidate sites", sites.len());
        progress.finish(format!(
            "Selected {} of {candidates_analyzed} candidate sites",
            sites.len()
        ));

        Ok(SuitabilityResult {
            sites,
            underserved_area: Some(underserved),
            candidates_analyzed,
            message: None,
        })
    }

    /// Grid points strictly inside `region`, stepping from the south-west
    /// corner of its bounding box. The east and north edges are exclusive.
    #[must_use]
    pub fn grid_points(&self, region: &MultiPolygon<f64>) -> Vec<Point<f64>> {
        let step = self.config.grid_step_deg;
        let Some(bounds) = region.bounding_rect() else {
            return Vec::new();
        };
        if !(step > 0.0) {
            return Vec::new();
        }
        let (min, max) = (bounds.min(), bounds.max());

        let mut points = Vec::new();
        let mut column = 0_u32;
        loop {
            let x = f64::from(column).mul_add(step, min.x);
            if x >= max.x {
                break;
            }
            let mut row = 0_u32;
            loop {
                let y = f64::from(row).mul_add(step, min.y);
                if y >= max.y {
                    break;
                }
                let point = Point::new(x, y);
                if self.geometry.contains_point(region, point) {
                    points.push(point);
                }
                row += 1;
            }
            column += 1;
        }
        points
    }

    fn ward_coverage_pct(
        &self,
        name: &str,
        ward: &MultiPolygon<f64>,
        served: &ServiceArea,
    ) -> Option<f64> {
        let ward_km2 = match self.geometry.area_km2(ward) {
            Ok(km2) => km2,
            Err(e) => {
                log::warn!("Ward {name}: cannot measure area ({e}), coverage ignored");
                return None;
            }
        };
        let covered_km2 = match served {
            ServiceArea::Empty => 0.0,
            ServiceArea::Covered(area) => match self.geometry.intersect(ward, area) {
                Ok(Some(overlap)) => self.geometry.area_km2(&overlap).unwrap_or(0.0),
                Ok(None) => 0.0,
                Err(e) => {
                    log::warn!("Ward {name}: cannot intersect with service area ({e}), coverage ignored");
                    return None;
                }
            },
        };
        Some(intersection_ratio(covered_km2, ward_km2) * 100.0)
    }

    async fn score_point(
        &self,
        point: Point<f64>,
        ward: Option<(String, Option<f64>)>,
    ) -> Option<SiteCandidate> {
        let circle = match self.geometry.buffer(point, self.config.candidate_radius_km) {
            Ok(polygon) => MultiPolygon::new(vec![polygon]),
            Err(e) => {
                log::debug!("Skipping candidate ({}, {}): {e}", point.x(), point.y());
                return None;
            }
        };
        let area_km2 = match self.geometry.area_km2(&circle) {
            Ok(km2) => km2,
            Err(e) => {
                log::debug!("Skipping candidate ({}, {}): {e}", point.x(), point.y());
                return None;
            }
        };

        let lookup = lookup_with_fallback(
            self.density.as_ref(),
            self.estimator,
            &circle,
            area_km2,
            self.density_config.lookup_timeout(),
        )
        .await;
        let mean_density = lookup.sample.mean_density;
        let population = population_served(mean_density, area_km2);

        let (ward, coverage_pct) = match ward {
            Some((name, pct)) => (Some(name), pct),
            None => (None, None),
        };
        let score = composite_site_score(population, coverage_pct, mean_density);

        Some(SiteCandidate {
            location: Coordinate::new(point.x(), point.y()),
            ward,
            population_served: population,
            area_km2,
            mean_density,
            density_score: score.density_score,
            coverage_score: score.coverage_score,
            population_score: score.population_score,
            composite_score: score.composite_score,
            rating: site_rating(score.composite_score),
        })
    }
}

/// People reached by a circle: `mean_density * area_km2`, truncated.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn population_served(mean_density: f64, area_km2: f64) -> u64 {
    let value = mean_density * area_km2;
    if value.is_finite() && value > 0.0 {
        value.trunc() as u64
    } else {
        0
    }
}

/// Sorts candidates best first. Ties fall back to population, then
/// location, so the order is deterministic.
pub fn rank(candidates: &mut [SiteCandidate]) {
    candidates.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| b.population_served.cmp(&a.population_served))
            .then_with(|| a.location.longitude.total_cmp(&b.location.longitude))
            .then_with(|| a.location.latitude.total_cmp(&b.location.latitude))
    });
}

fn separation_deg(a: &SiteCandidate, b: &SiteCandidate) -> f64 {
    (a.location.longitude - b.location.longitude).hypot(a.location.latitude - b.location.latitude)
}

/// Greedy spread-out selection from `ranked` (best first).
///
/// The best candidate is always taken. After that, the best remaining
/// candidate at least `min_separation_deg` from every selected site is
/// taken. When none qualifies the separation shrinks by
/// `separation_decay`, and once it is below `min_separation_floor_deg` the
/// best remaining candidate is taken regardless of distance.
#[must_use]
pub fn select_distributed(ranked: Vec<SiteCandidate>, config: &SuitabilityConfig) -> Vec<SiteCandidate> {
    let mut remaining = ranked;
    let mut selected: Vec<SiteCandidate> = Vec::with_capacity(config.max_sites.min(remaining.len()));
    if remaining.is_empty() || config.max_sites == 0 {
        return selected;
    }
    selected.push(remaining.remove(0));

    let decay = if config.separation_decay > 0.0 && config.separation_decay < 1.0 {
        config.separation_decay
    } else {
        0.0
    };
    let mut separation = config.min_separation_deg;

    while selected.len() < config.max_sites && !remaining.is_empty() {
        let spaced = remaining.iter().position(|candidate| {
            selected
                .iter()
                .all(|site| separation_deg(candidate, site) >= separation)
        });
        if let Some(position) = spaced {
            selected.push(remaining.remove(position));
            continue;
        }

        separation *= decay;
        log::debug!("No candidate qualifies, separation reduced to {separation:.4}°");
        if separation < config.min_separation_floor_deg {
            selected.push(remaining.remove(0));
        }
    }
    selected
}

/// Runs the server-side suitability search.
///
/// # Errors
///
/// Returns [`FetchFailure`] if the request fails or the body is not an
/// object.
pub async fn fetch_remote(client: &ApiClient) -> Result<SuitabilityResult, FetchFailure> {
    let body = client.get_json(SITE_SUITABILITY_PATH).await?;
    let result = parse_remote(body)?;
    log::info!(
        "Server proposed {} sites from {} candidates",
        result.sites.len(),
        result.candidates_analyzed
    );
    Ok(result)
}

/// Parses a server suitability response: a feature collection of
/// candidate points plus `underserved_area` and `total_locations_analyzed`,
/// or a `message` when nothing is underserved.
///
/// Features without a point location are skipped.
///
/// # Errors
///
/// Returns [`FetchFailure::Payload`] if the body is not an object.
pub fn parse_remote(body: Value) -> Result<SuitabilityResult, FetchFailure> {
    let Value::Object(mut object) = body else {
        return Err(FetchFailure::Payload {
            message: "site suitability response is not an object".to_string(),
        });
    };

    let features = match object.remove("features") {
        Some(Value::Array(features)) => features,
        _ => Vec::new(),
    };
    let sites: Vec<SiteCandidate> = features
        .iter()
        .enumerate()
        .filter_map(|(index, feature)| {
            let site = site_from_feature(feature);
            if site.is_none() {
                log::warn!("Skipping suitability feature {index} without a point location");
            }
            site
        })
        .collect();

    let underserved_area = match object.remove("underserved_area") {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value::<geojson::Geometry>(value)
            .map_err(|e| GeometryError::InvalidGeoJson(e.to_string()))
            .and_then(multipolygon_from_geometry)
        {
            Ok(area) => Some(area),
            Err(e) => {
                log::warn!("Ignoring unreadable underserved area: {e}");
                None
            }
        },
    };

    let candidates_analyzed = object
        .get("total_locations_analyzed")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(sites.len());

    Ok(SuitabilityResult {
        sites,
        underserved_area,
        candidates_analyzed,
        message: object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn site_from_feature(feature: &Value) -> Option<SiteCandidate> {
    let coordinates = feature.get("geometry")?.get("coordinates")?.as_array()?;
    let longitude = coordinates.first()?.as_f64()?;
    let latitude = coordinates.get(1)?.as_f64()?;

    let properties = feature.get("properties").unwrap_or(&Value::Null);
    let score = |key: &str| number(properties, key).unwrap_or(0.0);

    Some(SiteCandidate {
        location: Coordinate::new(longitude, latitude),
        ward: properties
            .get("ward")
            .and_then(Value::as_str)
            .map(str::to_string),
        population_served: number(properties, "population_served").map_or(0, round_population),
        area_km2: score("area_km2"),
        mean_density: score("mean_density"),
        density_score: score("density_score"),
        coverage_score: score("coverage_score"),
        population_score: score("population_score"),
        composite_score: score("composite_score"),
        rating: site_rating(score("composite_score")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use geo::{CoordsIter as _, Rect, coord};
    use health_access_analysis_models::{PopulationDensitySample, SiteRating};
    use health_access_facility_models::CensusPopulation;
    use health_access_geometry::SphericalEngine;
    use health_access_needs::null_progress;
    use serde_json::json;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![
            Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }).to_polygon(),
        ])
    }

    fn boundary() -> MultiPolygon<f64> {
        rect(34.5, -0.25, 34.75, 0.0)
    }

    fn suitability_config() -> SuitabilityConfig {
        SuitabilityConfig {
            grid_step_deg: 0.0625,
            candidate_radius_km: 5.0,
            max_sites: 20,
            min_separation_deg: 0.045,
            separation_decay: 0.9,
            min_separation_floor_deg: 0.01,
            excluded_facility_types: Vec::new(),
        }
    }

    fn density_config() -> DensityConfig {
        DensityConfig {
            fallback_density_per_km2: 500.0,
            lookup_timeout_secs: 5,
            max_concurrent_lookups: 4,
            estimate_bounds: None,
        }
    }

    /// Density rising eastwards with the west edge of the sampled area.
    struct EastwardDensity;

    #[async_trait]
    impl DensitySource for EastwardDensity {
        async fn sample(&self, area: &MultiPolygon<f64>) -> Result<PopulationDensitySample, FetchFailure> {
            let west = area.coords_iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
            let mean = 1000.0 * (west - 34.4);
            Ok(PopulationDensitySample {
                mean_density: mean,
                min_density: 0.0,
                max_density: mean,
                median_density: mean,
                percentiles: None,
                area_km2: 78.5,
                estimated_population: 0,
                year: 2020,
            })
        }
    }

    fn analyzer(density: Option<Arc<dyn DensitySource>>) -> SiteSuitabilityAnalyzer {
        SiteSuitabilityAnalyzer::new(
            Arc::new(SphericalEngine::new()),
            density,
            density_config(),
            suitability_config(),
        )
    }

    fn candidate(longitude: f64, latitude: f64, composite_score: f64) -> SiteCandidate {
        SiteCandidate {
            location: Coordinate::new(longitude, latitude),
            ward: None,
            population_served: 10_000,
            area_km2: 78.5,
            mean_density: 130.0,
            density_score: 0.13,
            coverage_score: 0.0,
            population_score: 0.2,
            composite_score,
            rating: site_rating(composite_score),
        }
    }

    fn longitudes(sites: &[SiteCandidate]) -> Vec<f64> {
        sites.iter().map(|s| s.location.longitude).collect()
    }

    #[test]
    fn grid_excludes_east_and_north_edges() {
        let points = analyzer(None).grid_points(&boundary());
        assert_eq!(points.len(), 9);
        assert!(points.iter().all(|p| p.x() > 34.5 && p.x() < 34.75));
        assert!(points.iter().all(|p| p.y() > -0.25 && p.y() < 0.0));
    }

    #[test]
    fn population_served_truncates() {
        assert_eq!(population_served(200.0, 78.5), 15_700);
        assert_eq!(population_served(3.0, 2.5), 7);
        assert_eq!(population_served(-3.0, 10.0), 0);
        assert_eq!(population_served(f64::NAN, 10.0), 0);
    }

    #[test]
    fn selection_skips_crowded_candidates() {
        let ranked = vec![
            candidate(0.0, 0.0, 0.9),
            candidate(0.01, 0.0, 0.8),
            candidate(0.05, 0.0, 0.7),
            candidate(0.02, 0.0, 0.6),
        ];
        let config = SuitabilityConfig {
            max_sites: 3,
            ..suitability_config()
        };
        let sites = select_distributed(ranked, &config);
        assert_eq!(longitudes(&sites), [0.0, 0.05, 0.02]);
    }

    #[test]
    fn selection_takes_best_remaining_below_floor() {
        let ranked = vec![
            candidate(0.0, 0.0, 0.9),
            candidate(0.0, 0.0, 0.8),
            candidate(0.0, 0.0, 0.7),
        ];
        let sites = select_distributed(ranked, &suitability_config());
        let scores: Vec<f64> = sites.iter().map(|s| s.composite_score).collect();
        assert_eq!(scores, [0.9, 0.8, 0.7]);
    }

    #[test]
    fn selection_caps_at_max_sites() {
        let ranked: Vec<SiteCandidate> = (0..25_u32)
            .map(|i| candidate(f64::from(i) * 0.1, 0.0, 1.0 - f64::from(i) * 0.01))
            .collect();
        assert_eq!(select_distributed(ranked, &suitability_config()).len(), 20);
        assert!(select_distributed(Vec::new(), &suitability_config()).is_empty());
    }

    #[tokio::test]
    async fn missing_boundary_is_a_precondition_error() {
        let result = analyzer(None)
            .analyze(None, &ServiceArea::Empty, &[], &null_progress())
            .await;
        assert_eq!(
            result,
            Err(SuitabilityError::Precondition(PreconditionError::BoundaryMissing))
        );
    }

    #[tokio::test]
    async fn fully_served_boundary_has_no_sites() {
        let served = ServiceArea::Covered(rect(34.4, -0.3, 34.9, 0.1));
        let result = analyzer(None)
            .analyze(Some(&boundary()), &served, &[], &null_progress())
            .await
            .unwrap();
        assert!(result.sites.is_empty());
        assert!(result.underserved_area.is_none());
        assert!(result.message.is_some());
    }

    #[tokio::test]
    async fn unserved_county_prefers_dense_east() {
        let density: Arc<dyn DensitySource> = Arc::new(EastwardDensity);
        let result = analyzer(Some(density))
            .analyze(Some(&boundary()), &ServiceArea::Empty, &[], &null_progress())
            .await
            .unwrap();

        assert_eq!(result.candidates_analyzed, 9);
        assert_eq!(result.sites.len(), 9);
        assert!((result.sites[0].location.longitude - 34.6875).abs() < 1e-9);
        assert!(result.sites[0].population_served > 15_000);
        assert!(
            result
                .sites
                .iter()
                .all(|site| site.rating == site_rating(site.composite_score))
        );
        assert!(result.sites[0].ward.is_none());
        assert!(result.sites[0].coverage_score.abs() < f64::EPSILON);
        assert!(result.message.is_none());
    }

    #[tokio::test]
    async fn partly_served_ward_raises_coverage_score() {
        let ward = Ward::new(
            "Central",
            CensusPopulation {
                pop2009: None,
                pop2019: Some(40_000),
            },
            Some(boundary()),
        );
        let served = ServiceArea::Covered(rect(34.5, -0.25, 34.6, 0.0));
        let result = analyzer(None)
            .analyze(Some(&boundary()), &served, &[ward], &null_progress())
            .await
            .unwrap();

        assert!(!result.sites.is_empty());
        for site in &result.sites {
            assert!(site.location.longitude >= 34.6 - 1e-9);
            assert_eq!(site.ward.as_deref(), Some("Central"));
            assert!((site.coverage_score - 0.6).abs() < 1e-3);
        }
    }

    #[test]
    fn parses_server_response() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [34.81, -0.12] },
                    "properties": {
                        "population_served": 23_400,
                        "area_km2": 78.4,
                        "mean_density": 298.5,
                        "ward": "Kolwa East",
                        "density_score": 0.2985,
                        "coverage_score": 0.62,
                        "population_score": 0.468,
                        "composite_score": 0.6345
                    }
                },
                { "type": "Feature", "geometry": null, "properties": {} }
            ],
            "underserved_area": {
                "type": "Polygon",
                "coordinates": [[[34.7, -0.2], [34.9, -0.2], [34.9, 0.0], [34.7, -0.2]]]
            },
            "total_locations_analyzed": 412
        });

        let result = parse_remote(body).unwrap();
        assert_eq!(result.sites.len(), 1);
        assert_eq!(result.sites[0].ward.as_deref(), Some("Kolwa East"));
        assert_eq!(result.sites[0].population_served, 23_400);
        assert_eq!(result.sites[0].rating, SiteRating::VeryGood);
        assert_eq!(result.candidates_analyzed, 412);
        assert!(result.underserved_area.is_some());
        assert!(result.message.is_none());
    }

    #[test]
    fn parses_nothing_underserved_message() {
        let result = parse_remote(json!({ "message": "No underserved areas found." })).unwrap();
        assert!(result.sites.is_empty());
        assert_eq!(result.candidates_analyzed, 0);
        assert_eq!(result.message.as_deref(), Some("No underserved areas found."));
        assert!(matches!(parse_remote(json!([])), Err(FetchFailure::Payload { .. })));
    }
}
