#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ward coverage classification.
//!
//! Given the merged service area, every ward is classified as served or
//! underserved by the share of its area inside the service area, and the
//! part of each ward left outside becomes a coverage gap when it is large
//! enough.
//!
//! Wards without a boundary are skipped. A ward whose boundary is invalid,
//! or whose overlay fails, is left out of every result with a warning; it is
//! never counted as served or as a gap.

use std::sync::Arc;

use futures::stream::{self, StreamExt as _};
use geo::MultiPolygon;
use health_access_analysis_models::{
    CoverageGap, CoverageOverview, CoverageResult, EstimateSource, ServiceArea,
};
use health_access_config::{CoverageConfig, DensityConfig};
use health_access_density::DensitySource;
use health_access_facility_models::Ward;
use health_access_fetch::round_population;
use health_access_geometry::{GeometryError, GeometrySource};
use health_access_scoring::coverage_score;

/// Covered share of a ward, clamped into `[0, 1]`.
#[must_use]
pub fn intersection_ratio(covered_km2: f64, ward_km2: f64) -> f64 {
    let ratio = covered_km2 / ward_km2;
    if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) }
}

/// A ward covered at exactly the threshold is still underserved.
#[must_use]
pub fn is_underserved(ratio: f64, cover_threshold: f64) -> bool {
    ratio <= cover_threshold
}

/// Uncovered share of a ward in percent, clamped into `[0, 100]`.
#[must_use]
pub fn uncovered_percentage(uncovered_km2: f64, ward_km2: f64) -> f64 {
    intersection_ratio(uncovered_km2, ward_km2) * 100.0
}

/// A ward uncovered at exactly the threshold has no gap.
#[must_use]
pub fn exceeds_gap_threshold(uncovered_pct: f64, gap_threshold_pct: f64) -> bool {
    uncovered_pct > gap_threshold_pct
}

/// Ward population living in the uncovered part, assuming an even spread.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn proportional_population(population: Option<u64>, uncovered_km2: f64, ward_km2: f64) -> u64 {
    population.map_or(0, |population| {
        round_population(population as f64 * intersection_ratio(uncovered_km2, ward_km2))
    })
}

/// A ward with a validated boundary and its area.
struct WardShape<'a> {
    ward: &'a Ward,
    geometry: &'a MultiPolygon<f64>,
    area_km2: f64,
}

/// Classifies wards against a service area.
#[derive(Clone)]
pub struct CoverageClassifier {
    geometry: Arc<dyn GeometrySource>,
    config: CoverageConfig,
}

impl CoverageClassifier {
    /// Creates a classifier using `config`'s thresholds.
    #[must_use]
    pub fn new(geometry: Arc<dyn GeometrySource>, config: CoverageConfig) -> Self {
        Self { geometry, config }
    }

    /// The thresholds in use.
    #[must_use]
    pub const fn config(&self) -> CoverageConfig {
        self.config
    }

    fn shapes<'a>(&self, wards: &'a [Ward]) -> Vec<WardShape<'a>> {
        wards
            .iter()
            .filter_map(|ward| {
                let Some(geometry) = &ward.geometry else {
                    log::debug!("Ward {} has no boundary, skipped", ward.name);
                    return None;
                };
                let checked = self
                    .geometry
                    .validate(geometry)
                    .and_then(|()| self.geometry.area_km2(geometry));
                match checked {
                    Ok(area_km2) => Some(WardShape {
                        ward,
                        geometry,
                        area_km2,
                    }),
                    Err(e) => {
                        log::warn!("Excluding ward {}: {e}", ward.name);
                        None
                    }
                }
            })
            .collect()
    }

    /// Area of `polygon`, with a zero-area sliver counting as nothing.
    fn area_or_zero(&self, polygon: &MultiPolygon<f64>) -> Result<f64, GeometryError> {
        match self.geometry.area_km2(polygon) {
            Err(GeometryError::ZeroArea) => Ok(0.0),
            other => other,
        }
    }

    fn covered_km2(&self, shape: &WardShape<'_>, service_area: &ServiceArea) -> Result<f64, GeometryError> {
        let ServiceArea::Covered(area) = service_area else {
            return Ok(0.0);
        };
        match self.geometry.intersect(shape.geometry, area)? {
            None => Ok(0.0),
            Some(intersection) => self.area_or_zero(&intersection),
        }
    }

    fn uncovered(
        &self,
        shape: &WardShape<'_>,
        service_area: &ServiceArea,
    ) -> Result<Option<(MultiPolygon<f64>, f64)>, GeometryError> {
        let ServiceArea::Covered(area) = service_area else {
            return Ok(Some((shape.geometry.clone(), shape.area_km2)));
        };
        let Some(difference) = self.geometry.difference(shape.geometry, area)? else {
            return Ok(None);
        };
        let uncovered_km2 = self.area_or_zero(&difference)?;
        Ok((uncovered_km2 > 0.0).then_some((difference, uncovered_km2)))
    }

    /// Classifies each ward as served or underserved.
    #[must_use]
    pub fn classify_wards(&self, wards: &[Ward], service_area: &ServiceArea) -> Vec<CoverageResult> {
        let results: Vec<CoverageResult> = self
            .shapes(wards)
            .into_iter()
            .filter_map(|shape| match self.covered_km2(&shape, service_area) {
                Ok(covered_km2) => {
                    let ratio = intersection_ratio(covered_km2, shape.area_km2);
                    Some(CoverageResult {
                        ward_name: shape.ward.name.clone(),
                        is_underserved: is_underserved(ratio, self.config.cover_threshold),
                        intersection_ratio: ratio,
                    })
                }
                Err(e) => {
                    log::warn!("Coverage of ward {} could not be resolved: {e}", shape.ward.name);
                    None
                }
            })
            .collect();

        log::info!(
            "{} of {} classified wards are underserved",
            results.iter().filter(|r| r.is_underserved).count(),
            results.len()
        );
        results
    }

    /// Finds the uncovered part of each ward above the gap threshold.
    ///
    /// Affected population is the ward's census population scaled by the
    /// uncovered share; see [`Self::refine_gap_populations`] for sampled
    /// figures.
    #[must_use]
    pub fn find_gaps(&self, wards: &[Ward], service_area: &ServiceArea) -> Vec<CoverageGap> {
        let gaps: Vec<CoverageGap> = self
            .shapes(wards)
            .into_iter()
            .filter_map(|shape| {
                let (geometry, uncovered_km2) = match self.uncovered(&shape, service_area) {
                    Ok(Some(uncovered)) => uncovered,
                    Ok(None) => return None,
                    Err(e) => {
                        log::warn!("Gap of ward {} could not be resolved: {e}", shape.ward.name);
                        return None;
                    }
                };

                let uncovered_pct = uncovered_percentage(uncovered_km2, shape.area_km2);
                if !exceeds_gap_threshold(uncovered_pct, self.config.gap_threshold_pct) {
                    return None;
                }

                let ward = shape.ward;
                Some(CoverageGap {
                    ward_name: ward.name.clone(),
                    geometry,
                    uncovered_percentage: uncovered_pct,
                    estimated_population_affected: proportional_population(
                        ward.population,
                        uncovered_km2,
                        shape.area_km2,
                    ),
                    population_source: EstimateSource::Heuristic,
                    density_sample: None,
                    ward_population: ward.population,
                    coverage_priority_score: coverage_score(ward.population, uncovered_pct),
                })
            })
            .collect();

        log::info!("Found {} coverage gaps", gaps.len());
        gaps
    }

    /// County-wide covered area across all resolvable wards.
    #[must_use]
    pub fn coverage_overview(&self, wards: &[Ward], service_area: &ServiceArea) -> CoverageOverview {
        let mut overview = CoverageOverview::default();

        for shape in self.shapes(wards) {
            let covered_km2 = match self.covered_km2(&shape, service_area) {
                Ok(covered_km2) => covered_km2.min(shape.area_km2),
                Err(e) => {
                    log::warn!("Coverage of ward {} could not be resolved: {e}", shape.ward.name);
                    continue;
                }
            };
            overview.wards_analyzed += 1;
            overview.total_area_km2 += shape.area_km2;
            overview.covered_area_km2 += covered_km2;
            if is_underserved(
                intersection_ratio(covered_km2, shape.area_km2),
                self.config.cover_threshold,
            ) {
                overview.underserved_wards += 1;
            }
        }

        if overview.total_area_km2 > 0.0 {
            overview.coverage_percent = overview.covered_area_km2 / overview.total_area_km2 * 100.0;
        }
        overview
    }

    /// Replaces proportional population estimates with density samples of
    /// each gap polygon. The sample is kept on the gap for later scoring.
    ///
    /// A gap whose lookup fails or outlasts the configured timeout keeps
    /// its proportional estimate. Gaps are returned in their input order.
    pub async fn refine_gap_populations(
        &self,
        gaps: Vec<CoverageGap>,
        source: &dyn DensitySource,
        density: &DensityConfig,
    ) -> Vec<CoverageGap> {
        let timeout = density.lookup_timeout();

        let refined: Vec<CoverageGap> = stream::iter(gaps.into_iter().map(|mut gap| async move {
            let outcome = tokio::time::timeout(timeout, source.sample(&gap.geometry)).await;
            match outcome {
                Ok(Ok(sample)) => {
                    gap.estimated_population_affected = sample.estimated_population;
                    gap.population_source = EstimateSource::DensityService;
                    gap.density_sample = Some(sample);
                }
                Ok(Err(e)) => {
                    log::warn!("Density lookup for gap in {} failed: {e}", gap.ward_name);
                }
                Err(_) => {
                    log::warn!(
                        "Density lookup for gap in {} timed out after {timeout:?}",
                        gap.ward_name
                    );
                }
            }
            gap
        }))
        .buffered(density.max_concurrent_lookups.max(1))
        .collect()
        .await;

        let sampled = refined
            .iter()
            .filter(|gap| gap.population_source == EstimateSource::DensityService)
            .count();
        log::info!("Sampled population for {sampled} of {} gaps", refined.len());
        refined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use geo::{Rect, coord};
    use health_access_analysis_models::{PopulationDensitySample, Recommendation};
    use health_access_facility_models::CensusPopulation;
    use health_access_fetch::FetchFailure;
    use health_access_geometry::SphericalEngine;
    use health_access_scoring::recommendation;
    use proptest::prelude::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![
            Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon(),
        ])
    }

    fn ward(name: &str, population: Option<u64>, geometry: Option<MultiPolygon<f64>>) -> Ward {
        Ward::new(
            name,
            CensusPopulation {
                pop2019: population,
                pop2009: None,
            },
            geometry,
        )
    }

    /// Ward A spans 34.7..34.8 by -0.1..0.0.
    fn ward_a(population: Option<u64>) -> Ward {
        ward("A", population, Some(rect(34.7, -0.1, 34.8, 0.0)))
    }

    /// Covers the western `fraction` of ward A.
    fn strip(fraction: f64) -> ServiceArea {
        ServiceArea::Covered(rect(34.6, -0.2, 34.7 + 0.1 * fraction, 0.1))
    }

    fn classifier() -> CoverageClassifier {
        CoverageClassifier::new(
            Arc::new(SphericalEngine::new()),
            CoverageConfig {
                cover_threshold: 0.3,
                gap_threshold_pct: 40.0,
            },
        )
    }

    fn density_config() -> DensityConfig {
        DensityConfig {
            fallback_density_per_km2: 500.0,
            lookup_timeout_secs: 10,
            max_concurrent_lookups: 4,
            estimate_bounds: None,
        }
    }

    #[test]
    fn ten_percent_coverage_scenario() {
        let wards = [ward_a(Some(12_000))];
        let area = strip(0.1);

        let results = classifier().classify_wards(&wards, &area);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_underserved);
        assert!((results[0].intersection_ratio - 0.10).abs() < 1e-3);

        let gaps = classifier().find_gaps(&wards, &area);
        assert_eq!(gaps.len(), 1);
        let gap = &gaps[0];
        assert!((gap.uncovered_percentage - 90.0).abs() < 0.1);
        assert_eq!(gap.coverage_priority_score, 76);
        assert_eq!(recommendation(gap.coverage_priority_score), Recommendation::High);
        assert!(gap.estimated_population_affected.abs_diff(10_800) <= 12);
        assert_eq!(gap.ward_population, Some(12_000));
        assert_eq!(gap.population_source, EstimateSource::Heuristic);
        assert!(gap.density_sample.is_none());
    }

    #[test]
    fn full_coverage_has_no_gap() {
        let wards = [ward_a(Some(12_000))];
        let area = ServiceArea::Covered(rect(34.6, -0.2, 34.9, 0.1));

        let results = classifier().classify_wards(&wards, &area);
        assert!((results[0].intersection_ratio - 1.0).abs() < 1e-9);
        assert!(!results[0].is_underserved);
        assert!(classifier().find_gaps(&wards, &area).is_empty());
    }

    #[test]
    fn empty_service_area_makes_whole_ward_a_gap() {
        let wards = [ward_a(None)];

        let results = classifier().classify_wards(&wards, &ServiceArea::Empty);
        assert!(results[0].intersection_ratio.abs() < f64::EPSILON);
        assert!(results[0].is_underserved);

        let gaps = classifier().find_gaps(&wards, &ServiceArea::Empty);
        assert_eq!(gaps.len(), 1);
        assert!((gaps[0].uncovered_percentage - 100.0).abs() < 1e-9);
        assert_eq!(gaps[0].estimated_population_affected, 0);
        assert_eq!(gaps[0].coverage_priority_score, 40);
    }

    #[test]
    fn disjoint_service_area_gives_zero_ratio() {
        let wards = [ward_a(Some(3_000))];
        let far = ServiceArea::Covered(rect(35.5, 0.5, 35.6, 0.6));
        let results = classifier().classify_wards(&wards, &far);
        assert!(results[0].intersection_ratio.abs() < f64::EPSILON);
    }

    #[test]
    fn threshold_boundaries_are_exact() {
        assert!(is_underserved(0.3, 0.3));
        assert!(!is_underserved(0.300_000_1, 0.3));
        assert!(!exceeds_gap_threshold(40.0, 40.0));
        assert!(exceeds_gap_threshold(40.000_01, 40.0));
    }

    #[test]
    fn ratio_helpers_clamp() {
        assert!((intersection_ratio(1.2, 1.0) - 1.0).abs() < f64::EPSILON);
        assert!(intersection_ratio(0.0, 0.0).abs() < f64::EPSILON);
        assert!((uncovered_percentage(0.5, 2.0) - 25.0).abs() < f64::EPSILON);
        assert_eq!(proportional_population(Some(1_000), 1.0, 4.0), 250);
        assert_eq!(proportional_population(None, 1.0, 4.0), 0);
    }

    #[test]
    fn wards_without_usable_geometry_are_excluded() {
        let bowtie = MultiPolygon::new(vec![geo::Polygon::new(
            geo::LineString::from(vec![
                (34.7, -0.1),
                (34.8, 0.0),
                (34.8, -0.1),
                (34.7, 0.0),
                (34.7, -0.1),
            ]),
            vec![],
        )]);
        let wards = [
            ward("NoGeometry", Some(5_000), None),
            ward("Bowtie", Some(5_000), Some(bowtie)),
            ward_a(Some(5_000)),
        ];

        let results = classifier().classify_wards(&wards, &ServiceArea::Empty);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ward_name, "A");

        let gaps = classifier().find_gaps(&wards, &ServiceArea::Empty);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].ward_name, "A");
    }

    #[test]
    fn classification_is_idempotent() {
        let wards = [
            ward_a(Some(12_000)),
            ward("B", Some(25_000), Some(rect(34.8, -0.1, 34.9, 0.0))),
        ];
        let area = strip(1.5);

        assert_eq!(
            classifier().classify_wards(&wards, &area),
            classifier().classify_wards(&wards, &area)
        );
        assert_eq!(
            classifier().find_gaps(&wards, &area),
            classifier().find_gaps(&wards, &area)
        );
    }

    #[test]
    fn overview_sums_ward_areas() {
        let wards = [
            ward_a(Some(12_000)),
            ward("B", Some(25_000), Some(rect(34.8, -0.1, 34.9, 0.0))),
        ];
        let overview = classifier().coverage_overview(&wards, &strip(1.0));
        assert_eq!(overview.wards_analyzed, 2);
        assert_eq!(overview.underserved_wards, 1);
        assert!((overview.coverage_percent - 50.0).abs() < 0.1);
        assert!((overview.covered_area_km2 * 2.0 - overview.total_area_km2).abs() < 1.0);

        assert_eq!(
            classifier().coverage_overview(&[], &ServiceArea::Empty),
            CoverageOverview::default()
        );
    }

    enum Behaviour {
        Population(u64),
        Fail,
        Hang,
    }

    struct FakeSource(Behaviour);

    #[async_trait]
    impl DensitySource for FakeSource {
        async fn sample(
            &self,
            _area: &MultiPolygon<f64>,
        ) -> Result<PopulationDensitySample, FetchFailure> {
            match self.0 {
                Behaviour::Population(estimated_population) => Ok(PopulationDensitySample {
                    mean_density: 900.0,
                    min_density: 10.0,
                    max_density: 4_000.0,
                    median_density: 700.0,
                    percentiles: None,
                    area_km2: 100.0,
                    estimated_population,
                    year: 2020,
                }),
                Behaviour::Fail => Err(FetchFailure::Server {
                    message: "No population data found".to_string(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    Err(FetchFailure::NotConfigured)
                }
            }
        }
    }

    #[tokio::test]
    async fn refinement_prefers_sampled_population() {
        let gaps = classifier().find_gaps(&[ward_a(Some(12_000))], &strip(0.1));
        let refined = classifier()
            .refine_gap_populations(gaps, &FakeSource(Behaviour::Population(31_000)), &density_config())
            .await;
        assert_eq!(refined[0].estimated_population_affected, 31_000);
        assert_eq!(refined[0].population_source, EstimateSource::DensityService);
        assert_eq!(refined[0].coverage_priority_score, 76);
        let sample = refined[0].density_sample.as_ref().unwrap();
        assert!((sample.mean_density - 900.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn refinement_keeps_estimate_on_failure() {
        let gaps = classifier().find_gaps(&[ward_a(Some(12_000))], &strip(0.1));
        let before = gaps.clone();
        let refined = classifier()
            .refine_gap_populations(gaps, &FakeSource(Behaviour::Fail), &density_config())
            .await;
        assert_eq!(refined, before);
    }

    #[tokio::test(start_paused = true)]
    async fn refinement_keeps_estimate_on_timeout() {
        let gaps = classifier().find_gaps(&[ward_a(Some(12_000))], &strip(0.1));
        let before = gaps.clone();
        let refined = classifier()
            .refine_gap_populations(gaps, &FakeSource(Behaviour::Hang), &density_config())
            .await;
        assert_eq!(refined, before);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn classification_respects_thresholds(fraction in 0.0f64..1.0) {
            let wards = [ward_a(Some(8_000))];
            let area = strip(fraction);

            let results = classifier().classify_wards(&wards, &area);
            prop_assert_eq!(results.len(), 1);
            let ratio = results[0].intersection_ratio;
            prop_assert!((0.0..=1.0).contains(&ratio));
            prop_assert_eq!(results[0].is_underserved, ratio <= 0.3);
            prop_assert!((ratio - fraction).abs() < 1e-3);

            let gaps = classifier().find_gaps(&wards, &area);
            let uncovered = (1.0 - fraction) * 100.0;
            if uncovered > 40.1 {
                prop_assert_eq!(gaps.len(), 1);
                prop_assert!(gaps[0].uncovered_percentage > 40.0);
                prop_assert!(gaps[0].uncovered_percentage <= 100.0);
            } else if uncovered < 39.9 {
                prop_assert!(gaps.is_empty());
            }
        }
    }
}
