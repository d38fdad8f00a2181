#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result types produced by the coverage analysis pipeline.
//!
//! Everything in this crate is derived data: it is recomputed on every
//! analysis run and handed to the presentation and report layers as plain
//! structured values. Analysis values are never recovered from rendered
//! text.

use std::collections::BTreeMap;

use geo::MultiPolygon;
use health_access_facility_models::Coordinate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Service areas
// ---------------------------------------------------------------------------

/// The merged area considered "served" by the facility network.
///
/// An explicit [`ServiceArea::Empty`] sentinel stands in for "no buffer
/// could be built" so downstream code never has to handle a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceArea {
    /// No facility produced a usable buffer.
    Empty,
    /// The union of all facility buffers (or the server's equivalent).
    Covered(MultiPolygon<f64>),
}

impl ServiceArea {
    /// Returns `true` for the [`ServiceArea::Empty`] sentinel.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the covered geometry, if any.
    #[must_use]
    pub const fn geometry(&self) -> Option<&MultiPolygon<f64>> {
        match self {
            Self::Empty => None,
            Self::Covered(geometry) => Some(geometry),
        }
    }
}

/// Where a [`ServiceArea`] came from. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceAreaOrigin {
    /// Downloaded from the merged-service-areas endpoint.
    Precomputed,
    /// Built locally from per-facility buffers.
    LocalBuffers,
}

// ---------------------------------------------------------------------------
// Coverage
// ---------------------------------------------------------------------------

/// Served/underserved classification of one ward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageResult {
    /// Ward name.
    pub ward_name: String,
    /// `true` when the covered share is at or below the cover threshold.
    pub is_underserved: bool,
    /// Covered area divided by ward area, in `[0, 1]`.
    pub intersection_ratio: f64,
}

/// How a population or density figure was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EstimateSource {
    /// Sampled from the population density raster service.
    DensityService,
    /// Derived locally (area proportion or the offline density estimate).
    Heuristic,
}

/// The uncovered part of a ward, emitted only above the gap threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageGap {
    /// Ward the gap belongs to.
    pub ward_name: String,
    /// Uncovered polygon (ward minus service area).
    pub geometry: MultiPolygon<f64>,
    /// Uncovered share of the ward, in percent. Always above the gap
    /// threshold that produced it.
    pub uncovered_percentage: f64,
    /// People living in the uncovered polygon.
    pub estimated_population_affected: u64,
    /// How `estimated_population_affected` was obtained.
    pub population_source: EstimateSource,
    /// Density sample of the gap polygon, when it has been looked up.
    pub density_sample: Option<PopulationDensitySample>,
    /// Census population of the whole ward, when known.
    pub ward_population: Option<u64>,
    /// Coverage priority score (population + uncovered share), `0..=100`.
    pub coverage_priority_score: u8,
}

/// County-wide coverage overview used by the dashboard summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageOverview {
    /// Wards that took part in the analysis.
    pub wards_analyzed: u64,
    /// Wards classified as underserved.
    pub underserved_wards: u64,
    /// Total ward area in km².
    pub total_area_km2: f64,
    /// Ward area inside the service area, in km².
    pub covered_area_km2: f64,
    /// `covered_area_km2 / total_area_km2 * 100`, or 0 with no area.
    pub coverage_percent: f64,
}

// ---------------------------------------------------------------------------
// Population density
// ---------------------------------------------------------------------------

/// Distribution percentiles reported by the density service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityPercentiles {
    /// 25th percentile density (people/km²).
    pub p25: f64,
    /// 50th percentile density.
    pub p50: f64,
    /// 75th percentile density.
    pub p75: f64,
    /// 90th percentile density.
    pub p90: f64,
}

/// Population density statistics for an arbitrary polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationDensitySample {
    /// Mean density (people/km²).
    pub mean_density: f64,
    /// Minimum cell density.
    pub min_density: f64,
    /// Maximum cell density.
    pub max_density: f64,
    /// Median cell density.
    pub median_density: f64,
    /// Percentiles, present only when the service computed them.
    pub percentiles: Option<DensityPercentiles>,
    /// Area of the sampled polygon in km².
    pub area_km2: f64,
    /// People living in the polygon.
    pub estimated_population: u64,
    /// Raster year.
    pub year: i32,
}

/// Density class of an area.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum DensityCategory {
    /// Lowest class.
    #[serde(rename = "Very Low")]
    #[strum(serialize = "Very Low")]
    VeryLow,
    /// Low density.
    #[strum(serialize = "Low")]
    Low,
    /// Medium density.
    #[strum(serialize = "Medium")]
    Medium,
    /// High density.
    #[strum(serialize = "High")]
    High,
    /// Highest class.
    #[serde(rename = "Very High")]
    #[strum(serialize = "Very High")]
    VeryHigh,
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Recommendation band derived from a priority score.
///
/// Ordered from most to least urgent.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Recommendation {
    /// Score 90 and above.
    Critical,
    /// Score 75 to 89.
    High,
    /// Score 60 to 74.
    Moderate,
    /// Score 45 to 59.
    Low,
    /// Below 45.
    VeryLow,
}

impl Recommendation {
    /// All bands, most urgent first.
    pub const ALL: &[Self] = &[
        Self::Critical,
        Self::High,
        Self::Moderate,
        Self::Low,
        Self::VeryLow,
    ];

    /// The action shown to planners for this band.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::Critical => "Critical need for new healthcare facility",
            Self::High => "High priority for new healthcare facility",
            Self::Moderate => "Consider mobile clinic deployment",
            Self::Low => "Evaluate for outreach services",
            Self::VeryLow => "Monitor access metrics",
        }
    }
}

// ---------------------------------------------------------------------------
// Needs analysis
// ---------------------------------------------------------------------------

/// Final per-area needs assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedsRecord {
    /// Ward (area) name.
    pub area_name: String,
    /// Combined priority score, `0..=100`.
    pub priority_score: u8,
    /// Band for `priority_score`.
    pub recommendation: Recommendation,
    /// People living in the gap.
    pub estimated_population: u64,
    /// Mean density (people/km²).
    pub population_density: f64,
    /// Density class.
    pub density_category: DensityCategory,
    /// Uncovered share of the ward, in percent.
    pub uncovered_percentage: f64,
    /// Gap area in km².
    pub area_km2: f64,
    /// Whether the density figures came from the service or the fallback.
    pub density_source: EstimateSource,
}

/// Aggregate statistics over a set of [`NeedsRecord`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Number of records summarized.
    pub area_count: u64,
    /// Record count per recommendation band. Every band is present.
    pub band_counts: BTreeMap<Recommendation, u64>,
    /// Sum of `estimated_population`.
    pub total_estimated_population: u64,
    /// Sum of `area_km2`.
    pub total_area_km2: f64,
    /// Mean `priority_score`, 0 for an empty set.
    pub mean_priority_score: f64,
}

impl ReportSummary {
    /// Count for one band (0 when absent).
    #[must_use]
    pub fn count(&self, band: Recommendation) -> u64 {
        self.band_counts.get(&band).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Site suitability and travel time
// ---------------------------------------------------------------------------

/// Planner-facing rating of a candidate site's composite score.
///
/// Ordered from best to worst.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum SiteRating {
    /// Composite score 0.8 and above.
    #[strum(serialize = "Excellent")]
    Excellent,
    /// 0.6 up to 0.8.
    #[serde(rename = "Very Good")]
    #[strum(serialize = "Very Good")]
    VeryGood,
    /// 0.4 up to 0.6.
    #[strum(serialize = "Good")]
    Good,
    /// 0.2 up to 0.4.
    #[strum(serialize = "Fair")]
    Fair,
    /// Below 0.2.
    #[strum(serialize = "Poor")]
    Poor,
}

impl SiteRating {
    /// All ratings, best first.
    pub const ALL: &[Self] = &[Self::Excellent, Self::VeryGood, Self::Good, Self::Fair, Self::Poor];
}

/// A scored candidate location for a new facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteCandidate {
    /// Candidate location.
    pub location: Coordinate,
    /// Ward containing the location, when found.
    pub ward: Option<String>,
    /// People within the candidate's service radius.
    pub population_served: u64,
    /// Area of the candidate's service area in km².
    pub area_km2: f64,
    /// Mean density inside the service area.
    pub mean_density: f64,
    /// `min(mean_density / 1000, 1)`.
    pub density_score: f64,
    /// One minus the existing coverage share of the ward.
    pub coverage_score: f64,
    /// `min(population_served / 50000, 1)`.
    pub population_score: f64,
    /// Weighted blend used for ranking.
    pub composite_score: f64,
    /// Band for `composite_score`.
    pub rating: SiteRating,
}

/// Population reached within one travel-time band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsochroneCoverage {
    /// People reachable.
    pub estimated_population: u64,
    /// Share of the county population, in percent.
    pub coverage_percentage: f64,
    /// Isochrone area in km².
    pub area_km2: f64,
}

/// Server-computed travel-time analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelTimeAnalysis {
    /// Isochrone features as returned by the server.
    pub isochrones: Vec<serde_json::Value>,
    /// Coverage keyed by travel time in minutes.
    pub population_coverage: BTreeMap<u32, IsochroneCoverage>,
    /// Free-form server statistics.
    pub stats: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Errors shared across the pipeline
// ---------------------------------------------------------------------------

/// An analysis was requested before its prerequisite layer was available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionError {
    /// Needs analysis without coverage gaps.
    #[error("Coverage gaps are not available: enable coverage gaps first")]
    CoverageGapsDisabled,
    /// Needs analysis without population density.
    #[error("Population density is not available: enable population density first")]
    PopulationDensityDisabled,
    /// Site suitability without a county boundary.
    #[error("County boundary is not loaded: load the county boundary first")]
    BoundaryMissing,
}

/// Input data is missing a field the analysis requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Structural error in {item}: {message}")]
pub struct StructuralError {
    /// The offending item (ward or gap name, or feature index).
    pub item: String,
    /// What is wrong with it.
    pub message: String,
}

impl StructuralError {
    /// Creates a structural error for `item`.
    #[must_use]
    pub fn new(item: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            message: message.into(),
        }
    }
}
