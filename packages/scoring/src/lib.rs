#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Priority scoring.
//!
//! All scores are integers in `[0, 100]`. The formulas are the dashboard's
//! heuristics and are kept exactly as published so existing reports stay
//! comparable:
//!
//! * [`coverage_score`] ranks a coverage gap by ward population and the
//!   uncovered share of the ward,
//! * [`needs_score`] blends that with population density and the number of
//!   people in the gap,
//! * [`recommendation`] maps a score to one of five action bands.
//!
//! Candidate sites for new facilities are scored on a `[0, 1.3]` scale by
//! [`composite_site_score`] and rated by [`site_rating`].

use health_access_analysis_models::{DensityCategory, DensityPercentiles, Recommendation, SiteRating};

/// Highest possible score.
pub const MAX_SCORE: u8 = 100;

/// Rounds half away from zero and clamps into `[0, 100]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, f64::from(MAX_SCORE)) as u8
}

/// Population term of [`coverage_score`].
///
/// Unknown or zero population contributes nothing.
#[must_use]
pub const fn coverage_population_factor(population: Option<u64>) -> u8 {
    match population {
        None | Some(0) => 0,
        Some(p) if p < 5_000 => 20,
        Some(p) if p < 10_000 => 30,
        Some(p) if p < 20_000 => 40,
        Some(p) if p < 30_000 => 50,
        Some(_) => 60,
    }
}

/// Uncovered-percentage term of [`coverage_score`]: `min(40, round(pct * 0.4))`.
///
/// Negative or NaN percentages contribute nothing.
#[must_use]
pub fn coverage_factor(uncovered_pct: f64) -> u8 {
    if !(uncovered_pct > 0.0) {
        return 0;
    }
    clamp_score(uncovered_pct * 0.4).min(40)
}

/// Priority of a coverage gap.
///
/// ```
/// use health_access_scoring::coverage_score;
///
/// assert_eq!(coverage_score(Some(12_000), 90.0), 76);
/// ```
#[must_use]
pub fn coverage_score(population: Option<u64>, uncovered_pct: f64) -> u8 {
    (coverage_population_factor(population) + coverage_factor(uncovered_pct)).min(MAX_SCORE)
}

/// Density term of [`needs_score`]. Unknown density scores as medium.
#[must_use]
pub const fn density_factor(category: Option<DensityCategory>) -> u8 {
    match category {
        Some(DensityCategory::VeryLow) => 20,
        Some(DensityCategory::Low) => 40,
        Some(DensityCategory::Medium) => 60,
        Some(DensityCategory::High) => 80,
        Some(DensityCategory::VeryHigh) => 100,
        None => 50,
    }
}

/// Population term of [`needs_score`].
#[must_use]
pub const fn needs_population_factor(estimated_population: u64) -> u8 {
    match estimated_population {
        p if p < 1_000 => 20,
        p if p < 5_000 => 40,
        p if p < 10_000 => 60,
        p if p < 20_000 => 80,
        _ => 100,
    }
}

/// Needs priority of an area:
/// `round(existing * 0.4 + density * 0.3 + population * 0.3)`.
#[must_use]
pub fn needs_score(
    existing_score: u8,
    category: Option<DensityCategory>,
    estimated_population: u64,
) -> u8 {
    let existing = f64::from(existing_score.min(MAX_SCORE));
    clamp_score(
        existing.mul_add(
            0.4,
            f64::from(density_factor(category))
                .mul_add(0.3, f64::from(needs_population_factor(estimated_population)) * 0.3),
        ),
    )
}

/// Recommendation band for a score.
///
/// Lower bounds are inclusive: 90 is critical, 89 is high.
#[must_use]
pub const fn recommendation(score: u8) -> Recommendation {
    match score {
        90.. => Recommendation::Critical,
        75..=89 => Recommendation::High,
        60..=74 => Recommendation::Moderate,
        45..=59 => Recommendation::Low,
        _ => Recommendation::VeryLow,
    }
}

/// Classifies density against the sample's own percentiles.
#[must_use]
pub fn relative_density_category(mean: f64, percentiles: &DensityPercentiles) -> DensityCategory {
    if mean < percentiles.p25 {
        DensityCategory::VeryLow
    } else if mean < percentiles.p50 {
        DensityCategory::Low
    } else if mean < percentiles.p75 {
        DensityCategory::Medium
    } else if mean < percentiles.p90 {
        DensityCategory::High
    } else {
        DensityCategory::VeryHigh
    }
}

/// Classifies density against fixed people/km² breakpoints.
#[must_use]
pub fn absolute_density_category(mean: f64) -> DensityCategory {
    if mean > 1_000.0 {
        DensityCategory::VeryHigh
    } else if mean > 500.0 {
        DensityCategory::High
    } else if mean > 100.0 {
        DensityCategory::Medium
    } else if mean > 20.0 {
        DensityCategory::Low
    } else {
        DensityCategory::VeryLow
    }
}

/// Relative classification when percentiles are available, absolute
/// otherwise.
#[must_use]
pub fn density_category(mean: f64, percentiles: Option<&DensityPercentiles>) -> DensityCategory {
    percentiles.map_or_else(
        || absolute_density_category(mean),
        |p| relative_density_category(mean, p),
    )
}

/// Breakdown of a candidate site's suitability. Each part is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteScore {
    /// `min(population_served / 50000, 1)`.
    pub population_score: f64,
    /// `1 - min(ward_coverage_pct / 100, 1)`; zero when the ward is unknown.
    pub coverage_score: f64,
    /// `min(mean_density / 1000, 1)`.
    pub density_score: f64,
    /// `0.7 * population + 0.4 * coverage + 0.2 * density`, in `[0, 1.3]`.
    pub composite_score: f64,
}

/// Scores a candidate site for a new facility.
///
/// `ward_coverage_pct` is the covered percentage of the ward the site lies
/// in, or `None` when the site is outside every ward.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn composite_site_score(
    population_served: u64,
    ward_coverage_pct: Option<f64>,
    mean_density: f64,
) -> SiteScore {
    let unit = |value: f64| if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };

    let population_score = unit(population_served as f64 / 50_000.0);
    let coverage_score = ward_coverage_pct.map_or(0.0, |pct| 1.0 - unit(pct / 100.0));
    let density_score = unit(mean_density / 1_000.0);

    SiteScore {
        population_score,
        coverage_score,
        density_score,
        composite_score: 0.7f64.mul_add(
            population_score,
            0.4f64.mul_add(coverage_score, 0.2 * density_score),
        ),
    }
}

/// Rating for a composite site score. Lower bounds are inclusive and NaN
/// rates as poor.
#[must_use]
pub fn site_rating(composite_score: f64) -> SiteRating {
    if composite_score >= 0.8 {
        SiteRating::Excellent
    } else if composite_score >= 0.6 {
        SiteRating::VeryGood
    } else if composite_score >= 0.4 {
        SiteRating::Good
    } else if composite_score >= 0.2 {
        SiteRating::Fair
    } else {
        SiteRating::Poor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn coverage_scenario_twelve_thousand_at_ninety_percent() {
        assert_eq!(coverage_score(Some(12_000), 90.0), 76);
        assert_eq!(recommendation(76), Recommendation::High);
        assert_eq!(
            recommendation(76).action(),
            "High priority for new healthcare facility"
        );
    }

    #[test]
    fn coverage_score_population_buckets() {
        assert_eq!(coverage_score(None, 50.0), 20);
        assert_eq!(coverage_score(Some(0), 50.0), 20);
        assert_eq!(coverage_score(Some(4_999), 0.0), 20);
        assert_eq!(coverage_score(Some(5_000), 0.0), 30);
        assert_eq!(coverage_score(Some(19_999), 0.0), 40);
        assert_eq!(coverage_score(Some(29_999), 0.0), 50);
        assert_eq!(coverage_score(Some(30_000), 100.0), 100);
    }

    #[test]
    fn coverage_factor_edge_cases() {
        assert_eq!(coverage_factor(f64::NAN), 0);
        assert_eq!(coverage_factor(-20.0), 0);
        assert_eq!(coverage_factor(41.25), 17);
        assert_eq!(coverage_factor(250.0), 40);
    }

    #[test]
    fn needs_score_blend() {
        // 76 * 0.4 + 80 * 0.3 + 60 * 0.3 = 72.4
        assert_eq!(needs_score(76, Some(DensityCategory::High), 7_500), 72);
        // Unknown density counts as 50.
        assert_eq!(needs_score(0, None, 0), 21);
        assert_eq!(needs_score(100, Some(DensityCategory::VeryHigh), 50_000), 100);
    }

    #[test]
    fn recommendation_band_edges() {
        assert_eq!(recommendation(100), Recommendation::Critical);
        assert_eq!(recommendation(90), Recommendation::Critical);
        assert_eq!(recommendation(89), Recommendation::High);
        assert_eq!(recommendation(75), Recommendation::High);
        assert_eq!(recommendation(74), Recommendation::Moderate);
        assert_eq!(recommendation(60), Recommendation::Moderate);
        assert_eq!(recommendation(59), Recommendation::Low);
        assert_eq!(recommendation(45), Recommendation::Low);
        assert_eq!(recommendation(44), Recommendation::VeryLow);
        assert_eq!(recommendation(0), Recommendation::VeryLow);
    }

    #[test]
    fn density_category_modes() {
        let percentiles = DensityPercentiles {
            p25: 100.0,
            p50: 300.0,
            p75: 800.0,
            p90: 2_000.0,
        };
        assert_eq!(density_category(50.0, Some(&percentiles)), DensityCategory::VeryLow);
        assert_eq!(density_category(100.0, Some(&percentiles)), DensityCategory::Low);
        assert_eq!(density_category(799.0, Some(&percentiles)), DensityCategory::Medium);
        assert_eq!(density_category(1_999.0, Some(&percentiles)), DensityCategory::High);
        assert_eq!(density_category(2_000.0, Some(&percentiles)), DensityCategory::VeryHigh);

        assert_eq!(density_category(200.0, None), DensityCategory::Medium);
        assert_eq!(density_category(1_000.0, None), DensityCategory::High);
        assert_eq!(density_category(1_000.5, None), DensityCategory::VeryHigh);
        assert_eq!(density_category(20.0, None), DensityCategory::VeryLow);
        assert_eq!(density_category(21.0, None), DensityCategory::Low);
    }

    #[test]
    fn composite_site_score_weights() {
        let score = composite_site_score(25_000, Some(20.0), 500.0);
        assert!((score.population_score - 0.5).abs() < 1e-12);
        assert!((score.coverage_score - 0.8).abs() < 1e-12);
        assert!((score.density_score - 0.5).abs() < 1e-12);
        assert!((score.composite_score - 0.77).abs() < 1e-12);

        let outside = composite_site_score(100_000, None, 5_000.0);
        assert!(outside.coverage_score.abs() < f64::EPSILON);
        assert!((outside.composite_score - 0.9).abs() < 1e-12);
    }

    #[test]
    fn site_rating_band_edges() {
        assert_eq!(site_rating(1.3), SiteRating::Excellent);
        assert_eq!(site_rating(0.8), SiteRating::Excellent);
        assert_eq!(site_rating(0.79), SiteRating::VeryGood);
        assert_eq!(site_rating(0.6), SiteRating::VeryGood);
        assert_eq!(site_rating(0.4), SiteRating::Good);
        assert_eq!(site_rating(0.2), SiteRating::Fair);
        assert_eq!(site_rating(0.19), SiteRating::Poor);
        assert_eq!(site_rating(f64::NAN), SiteRating::Poor);
        assert_eq!(SiteRating::VeryGood.to_string(), "Very Good");
    }

    proptest! {
        #[test]
        fn coverage_score_is_bounded(population in proptest::option::of(0u64..1_000_000), pct in -50.0f64..200.0) {
            prop_assert!(coverage_score(population, pct) <= 100);
        }

        #[test]
        fn coverage_score_monotone_in_population(a in 0u64..100_000, b in 0u64..100_000, pct in 0.0f64..100.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(coverage_score(Some(lo), pct) <= coverage_score(Some(hi), pct));
            prop_assert!(coverage_score(None, pct) <= coverage_score(Some(lo), pct));
        }

        #[test]
        fn coverage_score_monotone_in_pct(population in 0u64..100_000, a in 0.0f64..100.0, b in 0.0f64..100.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(coverage_score(Some(population), lo) <= coverage_score(Some(population), hi));
        }

        #[test]
        fn recommendation_bands_are_contiguous(score in 0u8..=100) {
            let band = recommendation(score);
            let expected = Recommendation::ALL
                .iter()
                .copied()
                .find(|band| match band {
                    Recommendation::Critical => score >= 90,
                    Recommendation::High => (75..90).contains(&score),
                    Recommendation::Moderate => (60..75).contains(&score),
                    Recommendation::Low => (45..60).contains(&score),
                    Recommendation::VeryLow => score < 45,
                });
            prop_assert_eq!(Some(band), expected);
            if score > 0 {
                // Bands never get more urgent as the score drops.
                prop_assert!(recommendation(score - 1) >= band);
            }
        }

        #[test]
        fn site_rating_bands_are_contiguous(score in -0.5f64..1.5) {
            let rating = site_rating(score);
            let expected = SiteRating::ALL
                .iter()
                .copied()
                .find(|rating| match rating {
                    SiteRating::Excellent => score >= 0.8,
                    SiteRating::VeryGood => (0.6..0.8).contains(&score),
                    SiteRating::Good => (0.4..0.6).contains(&score),
                    SiteRating::Fair => (0.2..0.4).contains(&score),
                    SiteRating::Poor => score < 0.2,
                });
            prop_assert_eq!(Some(rating), expected);
            // Ratings never improve as the score drops.
            prop_assert!(site_rating(score - 0.01) >= rating);
        }

        #[test]
        fn needs_score_is_bounded(existing in 0u8..=255, population in 0u64..10_000_000) {
            for category in [None, Some(DensityCategory::VeryLow), Some(DensityCategory::VeryHigh)] {
                prop_assert!(needs_score(existing, category, population) <= 100);
            }
        }
    }
}
